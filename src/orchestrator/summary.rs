//! Per-assembly execution summaries and the cross-run aggregate.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticSummary;

/// Counts for one assembly's run.
///
/// `total` counts every finished test case, including skipped and not-run
/// ones. `errors` counts error messages, which are not tied to a test case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_run: usize,
    pub errors: usize,
    pub time: Duration,
}

impl ExecutionSummary {
    /// Number of test cases that passed.
    pub fn passed(&self) -> usize {
        self.total
            .saturating_sub(self.failed + self.skipped + self.not_run)
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

/// Summaries of every assembly processed by one coordinator.
///
/// Entries are keyed by assembly unique ID; adding an existing key
/// overwrites it. The aggregate is never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionSummaries {
    summaries: BTreeMap<String, ExecutionSummary>,

    /// Wall-clock time of the most recent run.
    pub elapsed_clock_time: Duration,

    /// Diagnostics reported during the most recent run.
    pub diagnostics: DiagnosticSummary,
}

impl TestExecutionSummaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the summary for an assembly.
    pub fn add(&mut self, assembly_unique_id: impl Into<String>, summary: ExecutionSummary) {
        self.summaries.insert(assembly_unique_id.into(), summary);
    }

    pub fn get(&self, assembly_unique_id: &str) -> Option<&ExecutionSummary> {
        self.summaries.get(assembly_unique_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExecutionSummary)> {
        self.summaries.iter().map(|(id, s)| (id.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    /// Sum of failed and errored counts over all assemblies.
    ///
    /// Always recomputed from the current entries.
    pub fn failed_and_errored(&self) -> usize {
        self.summaries.values().map(|s| s.failed + s.errors).sum()
    }

    /// Totals over all assemblies (time is summed too).
    pub fn totals(&self) -> ExecutionSummary {
        self.summaries
            .values()
            .fold(ExecutionSummary::default(), |mut acc, s| {
                acc.total += s.total;
                acc.failed += s.failed;
                acc.skipped += s.skipped;
                acc.not_run += s.not_run;
                acc.errors += s.errors;
                acc.time += s.time;
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total: usize, failed: usize, errors: usize) -> ExecutionSummary {
        ExecutionSummary {
            total,
            failed,
            errors,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_overwrites_existing_entry() {
        let mut summaries = TestExecutionSummaries::new();
        summaries.add("calc", summary(4, 1, 0));
        summaries.add("calc", summary(4, 0, 0));

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries.failed_and_errored(), 0);
    }

    #[test]
    fn test_failed_and_errored_spans_assemblies() {
        let mut summaries = TestExecutionSummaries::new();
        summaries.add("calc", summary(4, 1, 0));
        summaries.add("io", summary(2, 1, 2));

        assert_eq!(summaries.failed_and_errored(), 4);
        assert_eq!(summaries.totals().total, 6);
    }

    #[test]
    fn test_passed_count() {
        let s = ExecutionSummary {
            total: 10,
            failed: 2,
            skipped: 3,
            not_run: 1,
            ..Default::default()
        };
        assert_eq!(s.passed(), 4);
        assert!(!s.is_success());
        assert!(ExecutionSummary::default().is_success());
    }
}
