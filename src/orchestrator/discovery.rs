//! Discovery passes: the standalone `discover` entry point and the
//! per-case callbacks used by it and by ID-based selection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::dispose::DisposalTracker;
use super::{RunCoordinator, RunError};
use crate::assembly::TestAssembly;
use crate::diagnostics::DiagnosticContext;
use crate::framework::{AsyncDispose, DiscoveryCallback, FrontController, TestCaseRef};
use crate::message::{Message, MessageSink, NullSink, TestCaseInfo};
use crate::pipeline::PipelineStartup;

/// A test case reported by a discovery pass.
#[derive(Clone)]
pub struct DiscoveredTestCase {
    pub test_case: TestCaseRef,
    pub passed_filter: bool,
}

impl std::fmt::Debug for DiscoveredTestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredTestCase")
            .field("unique_id", &self.test_case.unique_id())
            .field("passed_filter", &self.passed_filter)
            .finish()
    }
}

async fn release(test_case: TestCaseRef) {
    if let Err(e) = test_case.dispose().await {
        warn!("Failed to release test case {}: {:#}", test_case.unique_id(), e);
    }
}

/// Callback of a standalone discovery pass.
///
/// Appends every case to the optional collector and announces the ones
/// that passed the filter. Cases that are not collected are released
/// immediately.
pub(crate) struct DiscoveryCollector<'a> {
    assembly_unique_id: &'a str,
    front: &'a dyn FrontController,
    sink: &'a dyn MessageSink,
    cancel: &'a CancellationToken,
    collector: Option<&'a mut Vec<DiscoveredTestCase>>,
    passed: usize,
}

impl<'a> DiscoveryCollector<'a> {
    pub(crate) fn new(
        assembly_unique_id: &'a str,
        front: &'a dyn FrontController,
        sink: &'a dyn MessageSink,
        cancel: &'a CancellationToken,
        collector: Option<&'a mut Vec<DiscoveredTestCase>>,
    ) -> Self {
        Self {
            assembly_unique_id,
            front,
            sink,
            cancel,
            collector,
            passed: 0,
        }
    }

    /// Number of cases that passed the filter so far.
    pub(crate) fn passed(&self) -> usize {
        self.passed
    }
}

#[async_trait]
impl DiscoveryCallback for DiscoveryCollector<'_> {
    async fn on_test_case(&mut self, test_case: TestCaseRef, passed_filter: bool) -> bool {
        let mut accepted = true;
        if passed_filter {
            self.passed += 1;
            let serialization = match self.front.serialize(test_case.as_ref()) {
                Ok(serialization) => serialization,
                Err(e) => {
                    debug!("Could not serialize {}: {}", test_case.unique_id(), e);
                    String::new()
                }
            };
            let message = Message::TestCaseDiscovered {
                assembly_unique_id: self.assembly_unique_id.to_string(),
                test_case: TestCaseInfo::from_test_case(test_case.as_ref()),
                serialization,
            };
            accepted = self.sink.on_message(&message).await;
        }

        match self.collector.as_deref_mut() {
            Some(collected) => collected.push(DiscoveredTestCase {
                test_case,
                passed_filter,
            }),
            None => release(test_case).await,
        }

        accepted && !self.cancel.is_cancelled()
    }
}

/// Callback of the ID lookup pass.
///
/// Keeps a case only if it passed the filter and its ID was requested.
/// Never stops early on its own; only cancellation ends the pass.
pub(crate) struct IdSelector<'a> {
    ids: &'a HashSet<String>,
    already_selected: HashSet<String>,
    cancel: &'a CancellationToken,
    selected: Vec<TestCaseRef>,
}

impl<'a> IdSelector<'a> {
    /// `already_selected` holds IDs resolved by other means; those are not
    /// selected a second time.
    pub(crate) fn new(
        ids: &'a HashSet<String>,
        already_selected: HashSet<String>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            ids,
            already_selected,
            cancel,
            selected: Vec::new(),
        }
    }

    pub(crate) fn into_selected(self) -> Vec<TestCaseRef> {
        self.selected
    }
}

#[async_trait]
impl DiscoveryCallback for IdSelector<'_> {
    async fn on_test_case(&mut self, test_case: TestCaseRef, passed_filter: bool) -> bool {
        let id = test_case.unique_id();
        if passed_filter && self.ids.contains(id) && self.already_selected.insert(id.to_string()) {
            self.selected.push(test_case);
        } else {
            release(test_case).await;
        }
        !self.cancel.is_cancelled()
    }
}

impl RunCoordinator {
    /// Runs a discovery pass without executing anything.
    ///
    /// Every case the front-end reports is appended to `collector` (if
    /// given) together with its filter verdict. Cases that passed the
    /// filter are announced on `message_sink`. Discovery stops early when
    /// the sink refuses a message or the coordinator's cancellation token
    /// fires. The front controller is released on every exit path.
    pub async fn discover(
        &self,
        assembly: &TestAssembly,
        pipeline_startup: Option<Arc<dyn PipelineStartup>>,
        message_sink: Option<&dyn MessageSink>,
        diagnostic_sink: Option<&dyn MessageSink>,
        collector: Option<&mut Vec<DiscoveredTestCase>>,
    ) -> Result<(), RunError> {
        assembly.validate().map_err(RunError::InvalidAssembly)?;

        let options = &assembly.discovery_options;
        let context = DiagnosticContext::new(
            diagnostic_sink,
            options.diagnostic_messages,
            options.internal_diagnostics || self.internal_diagnostics,
        );
        let message_sink = message_sink.unwrap_or(&NullSink);

        let mut tracker = DisposalTracker::new();
        let result = self
            .discover_tracked(
                assembly,
                pipeline_startup,
                message_sink,
                &context,
                collector,
                &mut tracker,
            )
            .await;
        tracker.dispose_all().await;
        result
    }

    async fn discover_tracked(
        &self,
        assembly: &TestAssembly,
        pipeline_startup: Option<Arc<dyn PipelineStartup>>,
        message_sink: &dyn MessageSink,
        context: &DiagnosticContext<'_>,
        collector: Option<&mut Vec<DiscoveredTestCase>>,
        tracker: &mut DisposalTracker,
    ) -> Result<(), RunError> {
        let front = self
            .acquire_front_controller(assembly, pipeline_startup, context, tracker)
            .await?;
        let assembly_unique_id = front.assembly_unique_id().to_string();
        context
            .internal(format!("Discovering {} ({})", assembly.name, assembly_unique_id))
            .await;

        message_sink
            .on_message(&Message::DiscoveryStarting {
                assembly_unique_id: assembly_unique_id.clone(),
                assembly_name: assembly.name.clone(),
            })
            .await;

        let filter = assembly.filter();
        let mut callback = DiscoveryCollector::new(
            &assembly_unique_id,
            front.as_ref(),
            message_sink,
            &self.cancellation,
            collector,
        );
        front
            .find(
                message_sink,
                &assembly.discovery_options,
                &filter,
                &self.cancellation,
                &mut callback,
            )
            .await?;
        let test_cases_to_run = callback.passed();

        message_sink
            .on_message(&Message::DiscoveryComplete {
                assembly_unique_id,
                test_cases_to_run,
            })
            .await;
        debug!(
            "Discovery of {} found {} test case(s) to run",
            assembly.name, test_cases_to_run
        );
        Ok(())
    }
}
