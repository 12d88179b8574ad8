//! Messages streamed between the front-end, the orchestrator and sinks.
//!
//! Every observable event of a discovery or execution pass is a
//! [`Message`]. Sinks receive messages one at a time through
//! [`MessageSink::on_message`] and answer whether the producer may keep
//! going: `false` means "stop producing" (the sink is saturated, closed, or
//! the run was cancelled). A refusal is a flow-control signal, not an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::framework::TestCase;
use crate::orchestrator::TestExecutionSummaries;

/// Identity of a test case as carried inside messages.
///
/// Messages never hold live test case objects; they carry this snapshot so
/// that sinks can be serialized or outlive the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseInfo {
    pub unique_id: String,
    pub display_name: String,
    pub explicit: bool,
}

impl TestCaseInfo {
    pub fn from_test_case(test_case: &dyn TestCase) -> Self {
        Self {
            unique_id: test_case.unique_id().to_string(),
            display_name: test_case.display_name().to_string(),
            explicit: test_case.explicit(),
        }
    }
}

/// The outcome of one executed (or deliberately not executed) test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    /// Selected but not run, e.g. an explicit test while explicit tests are off.
    NotRun,
}

/// Result of a single test case execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFinished {
    pub test: TestCaseInfo,
    pub outcome: TestOutcome,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// Failure message or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TestFinished {
    pub fn new(test: TestCaseInfo, outcome: TestOutcome) -> Self {
        Self {
            test,
            outcome,
            duration: Duration::ZERO,
            output: String::new(),
            reason: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warning,
}

/// One structured error record (one link of an error cause chain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// A test that has been running longer than the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongRunningTest {
    pub test: TestCaseInfo,
    pub running_for: Duration,
}

/// Every event the orchestrator, front-end and sinks exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    DiscoveryStarting {
        assembly_unique_id: String,
        assembly_name: String,
    },
    TestCaseDiscovered {
        assembly_unique_id: String,
        test_case: TestCaseInfo,
        /// Opaque serialized form, usable to re-run exactly this case.
        serialization: String,
    },
    DiscoveryComplete {
        assembly_unique_id: String,
        test_cases_to_run: usize,
    },
    AssemblyStarting {
        assembly_unique_id: String,
        assembly_name: String,
    },
    TestStarting {
        test: TestCaseInfo,
    },
    TestFinished(TestFinished),
    AssemblyFinished {
        assembly_unique_id: String,
        execution_time: Duration,
    },
    Diagnostic {
        level: DiagnosticLevel,
        message: String,
    },
    InternalDiagnostic {
        message: String,
    },
    Error(ErrorMessage),
    LongRunningTests {
        threshold: Duration,
        tests: Vec<LongRunningTest>,
    },
    ExecutionSummaries(TestExecutionSummaries),
}

impl Message {
    pub fn info(message: impl Into<String>) -> Self {
        Message::Diagnostic {
            level: DiagnosticLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Message::Diagnostic {
            level: DiagnosticLevel::Warning,
            message: message.into(),
        }
    }
}

/// A consumer of streamed messages.
///
/// Returning `false` asks the producer to stop sending messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn on_message(&self, message: &Message) -> bool;
}

/// A sink that accepts and discards everything.
pub struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn on_message(&self, _message: &Message) -> bool {
        true
    }
}

/// A sink that fans messages out to several sinks.
///
/// Every sink sees every message; the producer may continue only if all
/// of them agreed.
pub struct MultiSink {
    sinks: Vec<Box<dyn MessageSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink<S: MessageSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for MultiSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for MultiSink {
    async fn on_message(&self, message: &Message) -> bool {
        let mut keep_going = true;
        for sink in &self.sinks {
            keep_going &= sink.on_message(message).await;
        }
        keep_going
    }
}
