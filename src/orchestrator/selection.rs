//! Test selection: turning the assembly's selection inputs into the set of
//! test cases to execute, then executing it.
//!
//! Three inputs are resolved in priority order:
//!
//! | Serialized cases | IDs | Behavior |
//! |------------------|-----|----------|
//! | empty | empty | front-end discovers and runs in one pass |
//! | any | non-empty | ID lookup pass, then run the resolved list |
//! | non-empty | empty | run the deserialized list |
//!
//! Malformed serialized entries are dropped with a warning; they never
//! abort the run.

use std::collections::HashSet;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::discovery::IdSelector;
use super::sink::ExecutionSink;
use crate::assembly::TestAssembly;
use crate::diagnostics::DiagnosticContext;
use crate::framework::{AsyncDispose, FrontController, FrontEndError, TestCaseRef};
use crate::message::NullSink;
use crate::options::ExplicitOption;

/// A selection input that could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("Dropped serialized test case #{index}")]
    Deserialization {
        index: usize,
        #[source]
        source: FrontEndError,
    },
}

/// Deserializes the pre-supplied test cases, dropping failures.
pub(crate) fn deserialize_test_cases(
    front: &dyn FrontController,
    serialized: &[String],
) -> (Vec<TestCaseRef>, Vec<SelectionError>) {
    let mut test_cases = Vec::with_capacity(serialized.len());
    let mut dropped = Vec::new();
    for (index, entry) in serialized.iter().enumerate() {
        match front.deserialize(entry) {
            Ok(test_case) => test_cases.push(test_case),
            Err(source) => dropped.push(SelectionError::Deserialization { index, source }),
        }
    }
    (test_cases, dropped)
}

/// Resolves the execution set for one run and executes it through `sink`.
pub(crate) async fn resolve_and_run(
    front: &dyn FrontController,
    assembly: &TestAssembly,
    test_case_ids: Option<&HashSet<String>>,
    sink: &ExecutionSink<'_>,
    context: &DiagnosticContext<'_>,
    cancel: &CancellationToken,
) -> Result<(), FrontEndError> {
    let (mut test_cases, dropped) =
        deserialize_test_cases(front, &assembly.serialized_test_cases);
    for error in &dropped {
        let SelectionError::Deserialization { source, .. } = error;
        warn!("[{}] {}: {}", assembly.name, error, source);
        context
            .warning(format!("[{}] {}: {}", assembly.name, error, source))
            .await;
    }

    let mut ids = assembly.test_case_ids.clone();
    if let Some(extra) = test_case_ids {
        ids.extend(extra.iter().cloned());
    }

    let filter = assembly.filter();
    let mut execution_options = assembly.execution_options.clone();

    if test_cases.is_empty() && ids.is_empty() {
        debug!("[{}] No selection given; discovering and running", assembly.name);
        return sink
            .drive(front.find_and_run(
                sink,
                &assembly.discovery_options,
                &execution_options,
                &filter,
                cancel,
            ))
            .await;
    }

    let result = async {
        if !ids.is_empty() {
            let already_selected = test_cases
                .iter()
                .map(|tc| tc.unique_id().to_string())
                .collect();
            let mut selector = IdSelector::new(&ids, already_selected, cancel);
            front
                .find(
                    &NullSink,
                    &assembly.discovery_options,
                    &filter,
                    cancel,
                    &mut selector,
                )
                .await?;
            test_cases.extend(selector.into_selected());
        }

        if assembly.auto_enable_explicit
            && !test_cases.is_empty()
            && test_cases.iter().all(|tc| tc.explicit())
        {
            info!(
                "[{}] All selected test cases are explicit; running explicit tests only",
                assembly.name
            );
            execution_options.explicit = ExplicitOption::Only;
        }

        debug!(
            "[{}] Running {} resolved test case(s)",
            assembly.name,
            test_cases.len()
        );
        sink.drive(front.run(sink, &execution_options, &test_cases, cancel))
            .await
    }
    .await;

    release_all(test_cases).await;
    result
}

/// Releases resolved test cases once the run that consumed them is over.
async fn release_all(test_cases: Vec<TestCaseRef>) {
    let results = join_all(test_cases.iter().map(|tc| tc.dispose())).await;
    for (test_case, result) in test_cases.iter().zip(results) {
        if let Err(e) = result {
            warn!("Failed to release test case {}: {:#}", test_case.unique_id(), e);
        }
    }
}
