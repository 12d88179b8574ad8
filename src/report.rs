//! Reporting: the report document handed to transformers, and the
//! message sinks used for console and machine-readable output.
//!
//! Transformers run at the end of every [`RunCoordinator::run`] call with a
//! document covering every assembly the coordinator has run so far, so the
//! file written after the last run describes the whole invocation.
//!
//! [`RunCoordinator::run`]: crate::orchestrator::RunCoordinator::run

pub mod console;
pub mod json;
pub mod junit;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{ErrorMessage, TestFinished};
use crate::orchestrator::ExecutionSummary;

pub use console::ConsoleSink;
pub use json::JsonSink;
pub use junit::JunitTransformer;

/// Result element of one assembly's run.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub name: String,
    pub unique_id: String,
    pub run_date: DateTime<Utc>,
    pub summary: ExecutionSummary,
    pub results: Vec<TestFinished>,
    pub errors: Vec<ErrorMessage>,
}

/// The document handed to report transformers.
#[derive(Debug, Clone, Serialize)]
pub struct AssembliesReport {
    pub timestamp: DateTime<Utc>,
    pub assemblies: Vec<AssemblyReport>,
}

impl AssembliesReport {
    pub fn new(assemblies: Vec<AssemblyReport>) -> Self {
        Self {
            timestamp: Utc::now(),
            assemblies,
        }
    }

    /// Totals over all assemblies.
    pub fn totals(&self) -> ExecutionSummary {
        self.assemblies
            .iter()
            .fold(ExecutionSummary::default(), |mut acc, a| {
                acc.total += a.summary.total;
                acc.failed += a.summary.failed;
                acc.skipped += a.summary.skipped;
                acc.not_run += a.summary.not_run;
                acc.errors += a.summary.errors;
                acc.time += a.summary.time;
                acc
            })
    }
}

/// Turns the report document into some output format.
///
/// Failures are logged by the coordinator and never change a run's status.
pub trait ReportTransformer: Send + Sync {
    /// Short identifier used in log output.
    fn id(&self) -> &str;

    fn transform(&self, report: &AssembliesReport) -> anyhow::Result<()>;
}
