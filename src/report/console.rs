//! Interactive console output.

use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use crate::message::{DiagnosticLevel, Message, MessageSink, TestOutcome};
use crate::orchestrator::TestExecutionSummaries;

/// Message sink that shows progress and results in the terminal.
///
/// Failures, skips and diagnostics are always printed; passing tests only
/// when `verbose` is set. The final table is printed by
/// [`print_summary`](Self::print_summary) once every assembly has run.
pub struct ConsoleSink {
    progress: Mutex<Option<ProgressBar>>,
    summaries: Mutex<Option<TestExecutionSummaries>>,
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            summaries: Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        match self.progress.lock().ok().as_deref().and_then(Option::as_ref) {
            // A hidden bar (stdout is not a terminal) swallows println.
            Some(pb) if !pb.is_hidden() => pb.println(line),
            _ => println!("{}", line),
        }
    }

    fn start_progress(&self, length: Option<u64>) {
        let Ok(mut progress) = self.progress.lock() else {
            return;
        };
        if let Some(pb) = progress.as_ref() {
            if let Some(length) = length {
                pb.set_length(length);
            }
            return;
        }

        let pb = match length {
            Some(length) => ProgressBar::new(length),
            None => ProgressBar::no_length(),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        *progress = Some(pb);
    }

    fn finish_progress(&self) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }
    }

    /// Prints the totals of the last aggregate received.
    pub fn print_summary(&self) {
        self.finish_progress();
        let Some(summaries) = self.summaries.lock().ok().and_then(|s| s.clone()) else {
            return;
        };
        let totals = summaries.totals();

        println!();
        println!("Test Results:");
        println!("  Total:   {}", totals.total);
        println!("  Passed:  {}", console::style(totals.passed()).green());
        println!("  Failed:  {}", console::style(totals.failed).red());
        println!("  Skipped: {}", console::style(totals.skipped).yellow());
        if totals.not_run > 0 {
            println!("  Not Run: {}", console::style(totals.not_run).dim());
        }
        if totals.errors > 0 {
            println!("  Errors:  {}", console::style(totals.errors).red().bold());
        }
        println!("  Duration: {:?}", summaries.elapsed_clock_time);

        println!();
        if summaries.failed_and_errored() == 0 {
            println!("{}", console::style("All tests passed!").green().bold());
        } else {
            println!("{}", console::style("Some tests failed.").red().bold());
        }
    }
}

#[async_trait]
impl MessageSink for ConsoleSink {
    async fn on_message(&self, message: &Message) -> bool {
        match message {
            Message::AssemblyStarting { assembly_name, .. } => {
                println!("Running {}", console::style(assembly_name).bold());
                self.start_progress(None);
            }
            Message::DiscoveryComplete {
                test_cases_to_run, ..
            } => {
                self.start_progress(Some(*test_cases_to_run as u64));
            }
            Message::TestStarting { test } if self.verbose => {
                self.println(format!("Running: {}", test.display_name));
            }
            Message::TestFinished(finished) => {
                if let Ok(progress) = self.progress.lock()
                    && let Some(pb) = progress.as_ref()
                {
                    pb.inc(1);
                }

                let status = match finished.outcome {
                    TestOutcome::Passed => console::style("PASS").green(),
                    TestOutcome::Failed => console::style("FAIL").red(),
                    TestOutcome::Skipped => console::style("SKIP").yellow(),
                    TestOutcome::NotRun => console::style("NRUN").dim(),
                };
                if self.verbose || finished.outcome != TestOutcome::Passed {
                    self.println(format!("{} {}", status, finished.test.display_name));
                }
                if finished.outcome == TestOutcome::Failed {
                    if let Some(reason) = &finished.reason {
                        self.println(format!("    {}", console::style(reason).dim()));
                    }
                    for line in finished.output.lines() {
                        self.println(format!("      {}", line));
                    }
                }
            }
            Message::AssemblyFinished { .. } => self.finish_progress(),
            Message::Diagnostic {
                level: DiagnosticLevel::Info,
                message,
            } => self.println(format!("{}", console::style(message).dim())),
            Message::Diagnostic {
                level: DiagnosticLevel::Warning,
                message,
            } => self.println(format!("{}", console::style(message).yellow())),
            Message::InternalDiagnostic { message } => {
                self.println(format!("{}", console::style(message).dim().italic()))
            }
            Message::Error(error) => self.println(format!(
                "{}",
                console::style(format!("{}: {}", error.kind, error.message)).red()
            )),
            Message::LongRunningTests { threshold, tests } => {
                for test in tests {
                    self.println(format!(
                        "{}",
                        console::style(format!(
                            "[Long running test] '{}' ({:?} > {:?})",
                            test.test.display_name, test.running_for, threshold
                        ))
                        .yellow()
                    ));
                }
            }
            Message::ExecutionSummaries(summaries) => {
                if let Ok(mut last) = self.summaries.lock() {
                    *last = Some(summaries.clone());
                }
            }
            _ => {}
        }
        true
    }
}
