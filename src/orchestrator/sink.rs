//! The execution sink: tallies one assembly's run into an
//! [`ExecutionSummary`].
//!
//! The sink sits between the front-end and the caller's message sink. It
//! forwards every message, but on the way it:
//!
//! - counts finished test cases and error messages,
//! - turns skips into failures when `fail_skips` is set,
//! - turns passing tests with warnings into failures when `fail_warns` is set,
//! - reports tests running longer than the long-running threshold,
//! - optionally records results for report transformers,
//! - tells the producer to stop once the cancellation check fires.
//!
//! The summary is final only after [`finish`](ExecutionSink::finish), which
//! the coordinator calls once the front-end has returned.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::summary::ExecutionSummary;
use crate::message::{
    ErrorMessage, LongRunningTest, Message, MessageSink, TestCaseInfo, TestFinished, TestOutcome,
};
use crate::options::ExecutionOptions;
use crate::report::AssemblyReport;

/// Behavior switches of an [`ExecutionSink`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSinkOptions {
    pub fail_skips: bool,
    pub fail_warns: bool,
    /// Report tests running longer than this. `None` disables detection.
    pub long_running: Option<Duration>,
    /// Keep per-test results for the assembly report.
    pub record_results: bool,
}

impl ExecutionSinkOptions {
    pub fn from_execution_options(options: &ExecutionOptions, record_results: bool) -> Self {
        Self {
            fail_skips: options.fail_skips,
            fail_warns: options.fail_warns,
            long_running: (options.long_running_seconds > 0)
                .then(|| Duration::from_secs(options.long_running_seconds)),
            record_results,
        }
    }
}

#[derive(Default)]
struct SinkState {
    summary: ExecutionSummary,
    assembly_unique_id: Option<String>,
    assembly_finished: bool,
    running: HashMap<String, (TestCaseInfo, Instant)>,
    results: Vec<TestFinished>,
    errors: Vec<ErrorMessage>,
}

/// Forwarding sink that produces the run's [`ExecutionSummary`].
pub struct ExecutionSink<'a> {
    assembly_name: String,
    inner: &'a dyn MessageSink,
    options: ExecutionSinkOptions,
    cancel_check: Box<dyn Fn() -> bool + Send + Sync + 'a>,
    started: Instant,
    run_date: DateTime<Utc>,
    state: Mutex<SinkState>,
}

impl<'a> ExecutionSink<'a> {
    /// Creates a sink forwarding to `inner`.
    ///
    /// `cancel_check` is consulted after every message; once it returns
    /// `true` the sink asks the producer to stop.
    pub fn new(
        assembly_name: impl Into<String>,
        inner: &'a dyn MessageSink,
        options: ExecutionSinkOptions,
        cancel_check: impl Fn() -> bool + Send + Sync + 'a,
    ) -> Self {
        Self {
            assembly_name: assembly_name.into(),
            inner,
            options,
            cancel_check: Box::new(cancel_check),
            started: Instant::now(),
            run_date: Utc::now(),
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Snapshot of the counts so far.
    pub fn summary(&self) -> ExecutionSummary {
        self.state
            .lock()
            .map(|state| state.summary.clone())
            .unwrap_or_default()
    }

    /// Awaits `work` while watching for long-running tests.
    ///
    /// Without a long-running threshold this is a plain `.await`.
    pub async fn drive<F: Future>(&self, work: F) -> F::Output {
        let Some(threshold) = self.options.long_running else {
            return work.await;
        };

        tokio::pin!(work);
        let mut ticker = tokio::time::interval(threshold);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => self.report_long_running(threshold).await,
            }
        }
    }

    async fn report_long_running(&self, threshold: Duration) {
        let now = Instant::now();
        let tests: Vec<LongRunningTest> = match self.state.lock() {
            Ok(state) => state
                .running
                .values()
                .filter(|(_, started)| now.duration_since(*started) >= threshold)
                .map(|(test, started)| LongRunningTest {
                    test: test.clone(),
                    running_for: now.duration_since(*started),
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        if !tests.is_empty() {
            self.inner
                .on_message(&Message::LongRunningTests { threshold, tests })
                .await;
        }
    }

    /// Applies `fail_skips` / `fail_warns` to a result.
    fn adjust(&self, finished: &TestFinished) -> Option<TestFinished> {
        match finished.outcome {
            TestOutcome::Skipped if self.options.fail_skips => {
                let reason = match &finished.reason {
                    Some(reason) => format!("Skipped test treated as failure: {}", reason),
                    None => "Skipped test treated as failure".to_string(),
                };
                let mut adjusted = finished.clone();
                adjusted.outcome = TestOutcome::Failed;
                adjusted.reason = Some(reason);
                Some(adjusted)
            }
            TestOutcome::Passed if self.options.fail_warns && !finished.warnings.is_empty() => {
                let mut adjusted = finished.clone();
                adjusted.outcome = TestOutcome::Failed;
                adjusted.reason = Some(format!(
                    "Passing test produced {} warning(s)",
                    finished.warnings.len()
                ));
                Some(adjusted)
            }
            _ => None,
        }
    }

    /// Records the effect of one message on the tallies.
    fn record(&self, message: &Message) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        match message {
            Message::AssemblyStarting {
                assembly_unique_id, ..
            } => {
                state.assembly_unique_id = Some(assembly_unique_id.clone());
            }
            Message::TestStarting { test } => {
                state
                    .running
                    .insert(test.unique_id.clone(), (test.clone(), Instant::now()));
            }
            Message::TestFinished(finished) => {
                state.running.remove(&finished.test.unique_id);
                state.summary.total += 1;
                match finished.outcome {
                    TestOutcome::Passed => {}
                    TestOutcome::Failed => state.summary.failed += 1,
                    TestOutcome::Skipped => state.summary.skipped += 1,
                    TestOutcome::NotRun => state.summary.not_run += 1,
                }
                if self.options.record_results {
                    state.results.push(finished.clone());
                }
            }
            Message::Error(error) => {
                state.summary.errors += 1;
                if self.options.record_results {
                    state.errors.push(error.clone());
                }
            }
            Message::AssemblyFinished { execution_time, .. } => {
                state.summary.time = *execution_time;
                state.assembly_finished = true;
            }
            _ => {}
        }
    }

    /// Finalizes the summary and, if recording, the assembly report.
    ///
    /// Without an `AssemblyFinished` message, the time is measured from the
    /// sink's creation.
    pub fn finish(self, assembly_unique_id: &str) -> (ExecutionSummary, Option<AssemblyReport>) {
        let state = self.state.into_inner().unwrap_or_else(|e| e.into_inner());

        let mut summary = state.summary;
        if !state.assembly_finished {
            summary.time = self.started.elapsed();
        }
        debug!(
            "Execution summary for {}: {} total, {} failed, {} skipped, {} errors",
            self.assembly_name, summary.total, summary.failed, summary.skipped, summary.errors
        );

        let report = self.options.record_results.then(|| AssemblyReport {
            name: self.assembly_name,
            unique_id: state
                .assembly_unique_id
                .unwrap_or_else(|| assembly_unique_id.to_string()),
            run_date: self.run_date,
            summary: summary.clone(),
            results: state.results,
            errors: state.errors,
        });

        (summary, report)
    }
}

#[async_trait]
impl MessageSink for ExecutionSink<'_> {
    async fn on_message(&self, message: &Message) -> bool {
        let message = match message {
            Message::TestFinished(finished) => match self.adjust(finished) {
                Some(adjusted) => Cow::Owned(Message::TestFinished(adjusted)),
                None => Cow::Borrowed(message),
            },
            _ => Cow::Borrowed(message),
        };

        self.record(&message);
        let keep_going = self.inner.on_message(&message).await;
        keep_going && !(self.cancel_check)()
    }
}
