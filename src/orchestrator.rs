//! Run coordination: the state machine behind `discover` and `run`.
//!
//! A [`RunCoordinator`] owns the shared cancellation token, the injected
//! front controller factory and the cross-run [`TestExecutionSummaries`].
//! Each call to [`RunCoordinator::run`] drives one assembly through:
//!
//! ```text
//!   Idle
//!     │ validate assembly, capture working directory
//!     ▼
//!   PipelineStarted ──── (startup handed in by the caller)
//!     │ factory.create()  ─► tracked for disposal
//!     ▼
//!   FrameworkAcquired
//!     │ attach pipeline startup
//!     ▼
//!   Discovering / Executing ──── selection::resolve_and_run()
//!     │                              │
//!     │                              ▼
//!     │                        ExecutionSink ─► message sink
//!     ▼
//!   ResultsAggregated ──── summary merged, fail-fast check
//!     │
//!     ▼
//!   Finalized ──── elapsed time, diagnostics summary, aggregate sent,
//!                  working directory restored, report transformers
//! ```
//!
//! `Finalized` is reached on every path. Errors raised between acquiring
//! the front controller and aggregating results are reported (the whole
//! cause chain, one record at a time) and turn the run's status into `1`;
//! they are not returned to the caller.
//!
//! # Exit Status
//!
//! | Situation | Status |
//! |-----------|--------|
//! | Error escaped the run | `1` |
//! | Otherwise | failed + errored, summed over every assembly run so far |

pub mod discovery;
pub mod dispose;
pub mod selection;
pub mod sink;
pub mod startup;
pub mod summary;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembly::TestAssembly;
use crate::diagnostics::{DiagnosticContext, ErrorRecord, RunnerLogger};
use crate::framework::{FrontController, FrontControllerFactory, FrontEndError};
use crate::message::{Message, MessageSink};
use crate::options::ReportMode;
use crate::pipeline::PipelineStartup;
use crate::report::{AssembliesReport, AssemblyReport, ReportTransformer};

pub use discovery::DiscoveredTestCase;
pub use dispose::DisposalTracker;
pub use selection::SelectionError;
pub use sink::{ExecutionSink, ExecutionSinkOptions};
pub use startup::{PipelineConfigurationError, invoke_pipeline_startup};
pub use summary::{ExecutionSummary, TestExecutionSummaries};

/// Errors raised by a discovery or run call.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Invalid test assembly: {0}")]
    InvalidAssembly(String),

    #[error("Pipeline startup configuration error")]
    PipelineConfiguration(#[from] PipelineConfigurationError),

    #[error("Front-end failure")]
    FrontEnd(#[from] FrontEndError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot of the process working directory, restored on exit.
///
/// [`restore`](Self::restore) is the normal path; `Drop` covers a run
/// future that is dropped midway.
struct WorkingDirGuard {
    original: Option<PathBuf>,
}

impl WorkingDirGuard {
    fn capture() -> std::io::Result<Self> {
        Ok(Self {
            original: Some(std::env::current_dir()?),
        })
    }

    fn restore(mut self) {
        if let Some(dir) = self.original.take()
            && let Err(e) = std::env::set_current_dir(&dir)
        {
            warn!(
                "Failed to restore working directory {}: {}",
                dir.display(),
                e
            );
        }
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.original.take() {
            let _ = std::env::set_current_dir(dir);
        }
    }
}

/// Coordinates discovery and execution of test assemblies.
///
/// One coordinator accumulates results across every assembly it runs;
/// [`run`](Self::run) returns a status covering all of them, so a caller
/// running several assemblies can use the last status as the process exit
/// code.
pub struct RunCoordinator {
    factory: Arc<dyn FrontControllerFactory>,
    cancellation: CancellationToken,
    report_mode: ReportMode,
    internal_diagnostics: bool,
    transformers: Vec<Box<dyn ReportTransformer>>,
    summaries: TestExecutionSummaries,
    reports: Vec<AssemblyReport>,
}

impl RunCoordinator {
    /// Creates a coordinator.
    ///
    /// `cancellation` is shared with the caller, the front-end and every
    /// discovery callback. The coordinator sets it when fail-fast triggers.
    pub fn new(factory: Arc<dyn FrontControllerFactory>, cancellation: CancellationToken) -> Self {
        Self {
            factory,
            cancellation,
            report_mode: ReportMode::default(),
            internal_diagnostics: false,
            transformers: Vec::new(),
            summaries: TestExecutionSummaries::new(),
            reports: Vec::new(),
        }
    }

    pub fn with_report_mode(mut self, mode: ReportMode) -> Self {
        self.report_mode = mode;
        self
    }

    /// Include stack traces in interactive error output and forward
    /// internal diagnostics.
    pub fn with_internal_diagnostics(mut self, enabled: bool) -> Self {
        self.internal_diagnostics = enabled;
        self
    }

    pub fn with_transformer<T: ReportTransformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn summaries(&self) -> &TestExecutionSummaries {
        &self.summaries
    }

    /// Runs one assembly and returns the exit status.
    ///
    /// Only an invalid assembly or an unreadable working directory is
    /// returned as an error; everything that goes wrong after that is
    /// reported through `message_sink`/`logger` and yields status `1`.
    pub async fn run(
        &mut self,
        assembly: &TestAssembly,
        message_sink: &dyn MessageSink,
        diagnostic_sink: Option<&dyn MessageSink>,
        logger: &dyn RunnerLogger,
        pipeline_startup: Option<Arc<dyn PipelineStartup>>,
        test_case_ids: Option<&HashSet<String>>,
    ) -> Result<i32, RunError> {
        assembly.validate().map_err(RunError::InvalidAssembly)?;
        let working_dir = WorkingDirGuard::capture()?;
        let started = Instant::now();

        let options = &assembly.execution_options;
        let internal_diagnostics = options.internal_diagnostics || self.internal_diagnostics;
        let context = DiagnosticContext::new(
            diagnostic_sink,
            options.diagnostic_messages,
            internal_diagnostics,
        );

        let mut tracker = DisposalTracker::new();
        let outcome = self
            .execute(
                assembly,
                message_sink,
                &context,
                logger,
                pipeline_startup,
                test_case_ids,
                &mut tracker,
            )
            .await;
        tracker.dispose_all().await;

        let failed = match outcome {
            Ok(()) => false,
            Err(e) => {
                error!("Run of {} failed: {}", assembly.name, e);
                let record = ErrorRecord::from_error(
                    &anyhow::Error::from(e),
                    cfg!(debug_assertions) || internal_diagnostics,
                );
                self.report_error(&record, &context, logger).await;
                true
            }
        };

        self.summaries.elapsed_clock_time = started.elapsed();
        self.summaries.diagnostics = context.summary();
        message_sink
            .on_message(&Message::ExecutionSummaries(self.summaries.clone()))
            .await;
        working_dir.restore();
        self.transform_reports(logger);

        if failed {
            Ok(1)
        } else {
            Ok(self.summaries.failed_and_errored() as i32)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &mut self,
        assembly: &TestAssembly,
        message_sink: &dyn MessageSink,
        context: &DiagnosticContext<'_>,
        logger: &dyn RunnerLogger,
        pipeline_startup: Option<Arc<dyn PipelineStartup>>,
        test_case_ids: Option<&HashSet<String>>,
        tracker: &mut DisposalTracker,
    ) -> Result<(), RunError> {
        let front = self
            .acquire_front_controller(assembly, pipeline_startup, context, tracker)
            .await?;
        let assembly_unique_id = front.assembly_unique_id().to_string();
        context
            .internal(format!("Running {} ({})", assembly.name, assembly_unique_id))
            .await;

        let options = &assembly.execution_options;
        let cancellation = self.cancellation.clone();
        let sink = ExecutionSink::new(
            assembly.name.clone(),
            message_sink,
            ExecutionSinkOptions::from_execution_options(options, !self.transformers.is_empty()),
            move || cancellation.is_cancelled(),
        );

        let result = selection::resolve_and_run(
            front.as_ref(),
            assembly,
            test_case_ids,
            &sink,
            context,
            &self.cancellation,
        )
        .await;
        let (summary, report) = sink.finish(&assembly_unique_id);
        result?;

        let failed = summary.failed;
        self.summaries.add(assembly_unique_id, summary);
        if let Some(report) = report {
            self.record_report(report);
        }

        if failed > 0 && options.stop_on_fail && !self.cancellation.is_cancelled() {
            self.cancellation.cancel();
            info!("[{}] Cancelling due to test failure", assembly.name);
            if self.report_mode.is_automated() {
                message_sink
                    .on_message(&Message::info("Cancelling due to test failure"))
                    .await;
            } else {
                logger.log_important_message(&format!(
                    "[{}] Cancelling due to test failure; remaining tests will not run",
                    assembly.name
                ));
            }
        }

        Ok(())
    }

    /// Creates a front controller for this call and registers it for
    /// disposal before anything else can fail.
    async fn acquire_front_controller(
        &self,
        assembly: &TestAssembly,
        pipeline_startup: Option<Arc<dyn PipelineStartup>>,
        context: &DiagnosticContext<'_>,
        tracker: &mut DisposalTracker,
    ) -> Result<Arc<dyn FrontController>, RunError> {
        let mut front = self.factory.create(assembly, context).await?;
        if let Some(startup) = pipeline_startup {
            front.attach_pipeline_startup(startup);
        }

        let front: Arc<dyn FrontController> = Arc::from(front);
        tracker.add(front.clone());
        debug!(
            "Acquired front controller for {} ({})",
            assembly.name,
            front.assembly_unique_id()
        );
        Ok(front)
    }

    async fn report_error(
        &self,
        record: &ErrorRecord,
        context: &DiagnosticContext<'_>,
        logger: &dyn RunnerLogger,
    ) {
        for link in record.iter() {
            if self.report_mode.is_automated() {
                context.on_message(&Message::Error(link.to_message())).await;
                continue;
            }

            logger.log_error(&format!("{}: {}", link.kind, link.message));
            if let Some(stack_trace) = &link.stack_trace {
                logger.log_error(stack_trace);
            }
        }
    }

    /// Keeps one report per assembly unique ID; a re-run replaces the
    /// earlier entry, like the summary aggregate.
    fn record_report(&mut self, report: AssemblyReport) {
        match self
            .reports
            .iter_mut()
            .find(|existing| existing.unique_id == report.unique_id)
        {
            Some(existing) => *existing = report,
            None => self.reports.push(report),
        }
    }

    fn transform_reports(&self, logger: &dyn RunnerLogger) {
        if self.transformers.is_empty() {
            return;
        }

        let report = AssembliesReport::new(self.reports.clone());
        for transformer in &self.transformers {
            if let Err(e) = transformer.transform(&report) {
                warn!("Report transformer '{}' failed: {:#}", transformer.id(), e);
                logger.log_warning(&format!(
                    "Report transformer '{}' failed: {:#}",
                    transformer.id(),
                    e
                ));
            }
        }
    }
}
