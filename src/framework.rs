//! Front-end abstractions: test cases and the test framework facade.
//!
//! The orchestrator never executes tests itself. It drives a
//! [`FrontController`], a facade over some test framework that can enumerate
//! opaque [`TestCase`]s and run them, streaming
//! [`Message`](crate::message::Message)s into a sink.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     FrontController                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  find(filter, callback) ───────► callback(test_case, passed)    │
//! │                                                                  │
//! │  find_and_run(filter) ─────────► Message stream ──► sink        │
//! │                                                                  │
//! │  run(&[test_case]) ────────────► Message stream ──► sink        │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Front controllers are not looked up by inspecting types at runtime. A
//! [`FrontControllerFactory`] is injected into the orchestrator and hands out
//! a fresh controller for every run.
//!
//! # Built-in Front-ends
//!
//! | Implementation | Source of test cases | Execution |
//! |----------------|----------------------|-----------|
//! | [`manifest::ManifestFrontController`] | TOML manifest | one process per test case |

pub mod manifest;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::assembly::TestAssembly;
use crate::diagnostics::DiagnosticContext;
use crate::message::MessageSink;
use crate::options::{DiscoveryOptions, ExecutionOptions};
use crate::pipeline::PipelineStartup;

/// Result type for front-end operations.
pub type FrontEndResult<T> = Result<T, FrontEndError>;

/// Errors raised by a front-end while loading, discovering or executing.
///
/// The orchestrator catches these at the run boundary, reports the whole
/// cause chain and marks the run as failed.
#[derive(Debug, thiserror::Error)]
pub enum FrontEndError {
    /// The test assembly could not be loaded.
    #[error("Failed to load test assembly: {0}")]
    LoadFailed(String),

    /// Enumerating test cases failed.
    #[error("Failed to discover tests: {0}")]
    DiscoveryFailed(String),

    /// Running test cases failed as a whole (not an individual test failure).
    #[error("Test execution failed: {0}")]
    ExecFailed(String),

    /// A serialized test case could not be turned back into a test case.
    #[error("Invalid test case serialization: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Front-end error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Asynchronous release of resources.
///
/// Anything the orchestrator tracks for deterministic cleanup implements
/// this. The default does nothing, which leaves synchronous cleanup to
/// `Drop`.
#[async_trait]
pub trait AsyncDispose: Send + Sync {
    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<D: AsyncDispose + ?Sized> AsyncDispose for Arc<D> {
    async fn dispose(&self) -> anyhow::Result<()> {
        (**self).dispose().await
    }
}

/// One opaque unit of test work.
///
/// Test cases are created by the front-end during discovery (or by
/// deserialization), handed to the orchestrator, and released once the run
/// that consumed them has finished.
pub trait TestCase: AsyncDispose {
    /// Identifier that is unique within the assembly and stable across
    /// discovery passes.
    fn unique_id(&self) -> &str;

    /// Human-readable name. Defaults to the unique ID.
    fn display_name(&self) -> &str {
        self.unique_id()
    }

    /// Explicit tests only run when selected deliberately.
    fn explicit(&self) -> bool {
        false
    }

    /// Value of a named trait (tag) on this test case, if any.
    fn trait_value(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Shared handle to a test case.
pub type TestCaseRef = Arc<dyn TestCase>;

/// Filter predicate: `(assembly short name, test case) -> keep?`.
pub type TestFilter<'a> = dyn Fn(&str, &dyn TestCase) -> bool + Send + Sync + 'a;

/// Receives each test case during a discovery pass.
///
/// Callbacks are invoked in enumeration order, one at a time. Returning
/// `false` asks the front-end to stop enumerating.
#[async_trait]
pub trait DiscoveryCallback: Send {
    async fn on_test_case(&mut self, test_case: TestCaseRef, passed_filter: bool) -> bool;
}

/// Facade over a test framework bound to one test assembly.
///
/// A controller is owned by exactly one discovery or run invocation and is
/// disposed when that invocation ends.
///
/// # Cancellation
///
/// Every method receives the run's [`CancellationToken`]. Implementations
/// check it between test cases and return promptly once it is cancelled.
#[async_trait]
pub trait FrontController: AsyncDispose {
    /// Unique identifier of the loaded assembly. Summaries are keyed by it.
    fn assembly_unique_id(&self) -> &str;

    /// Hands the assembly's started pipeline startup to the framework.
    ///
    /// Called before any discovery or execution.
    fn attach_pipeline_startup(&mut self, startup: Arc<dyn PipelineStartup>);

    /// Serializes the identity of a test case so it can be re-run later.
    fn serialize(&self, test_case: &dyn TestCase) -> FrontEndResult<String>;

    /// Rebuilds a live test case from [`serialize`](Self::serialize) output.
    fn deserialize(&self, serialized: &str) -> FrontEndResult<TestCaseRef>;

    /// Enumerates test cases without running them.
    async fn find(
        &self,
        sink: &dyn MessageSink,
        options: &DiscoveryOptions,
        filter: &TestFilter<'_>,
        cancel: &CancellationToken,
        callback: &mut dyn DiscoveryCallback,
    ) -> FrontEndResult<()>;

    /// Discovers and runs every test case that passes the filter.
    ///
    /// Test cases produced here are owned and released by the front-end.
    async fn find_and_run(
        &self,
        sink: &dyn MessageSink,
        discovery_options: &DiscoveryOptions,
        execution_options: &ExecutionOptions,
        filter: &TestFilter<'_>,
        cancel: &CancellationToken,
    ) -> FrontEndResult<()>;

    /// Runs the given, already resolved, test cases.
    async fn run(
        &self,
        sink: &dyn MessageSink,
        execution_options: &ExecutionOptions,
        test_cases: &[TestCaseRef],
        cancel: &CancellationToken,
    ) -> FrontEndResult<()>;
}

/// Creates front controllers for test assemblies.
///
/// Injected into the orchestrator at construction time. Each call must
/// return a fresh controller; the caller owns and disposes it.
#[async_trait]
pub trait FrontControllerFactory: Send + Sync {
    async fn create(
        &self,
        assembly: &TestAssembly,
        context: &DiagnosticContext<'_>,
    ) -> FrontEndResult<Box<dyn FrontController>>;
}
