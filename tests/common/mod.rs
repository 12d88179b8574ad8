//! Test doubles shared by the integration tests.
//!
//! `SpyFactory` hands out front controllers over a fixed list of test cases
//! and records every call made against them, so tests can assert on what
//! the coordinator did rather than on what a real framework printed.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tally::assembly::TestAssembly;
use tally::diagnostics::{DiagnosticContext, RunnerLogger};
use tally::framework::{
    AsyncDispose, DiscoveryCallback, FrontController, FrontControllerFactory, FrontEndError,
    FrontEndResult, TestCase, TestCaseRef, TestFilter,
};
use tally::message::{Message, MessageSink, TestCaseInfo, TestFinished, TestOutcome};
use tally::options::{DiscoveryOptions, ExecutionOptions, ExplicitOption};
use tally::pipeline::PipelineStartup;
use tally::report::{AssembliesReport, ReportTransformer};

/// Everything the spies observed.
#[derive(Debug, Default)]
pub struct Calls {
    pub created: usize,
    pub find: usize,
    pub find_and_run: usize,
    /// IDs handed to each `run` call.
    pub run: Vec<Vec<String>>,
    /// Explicit option of each `run`/`find_and_run` call.
    pub explicit: Vec<ExplicitOption>,
    pub executed: Vec<String>,
    pub attached_startup: bool,
    pub disposed_fronts: usize,
    pub released_cases: Vec<String>,
}

pub type SharedCalls = Arc<Mutex<Calls>>;

#[derive(Debug, Clone)]
pub struct CaseDef {
    pub id: String,
    pub explicit: bool,
    pub outcome: TestOutcome,
}

pub fn passing(id: &str) -> CaseDef {
    CaseDef {
        id: id.to_string(),
        explicit: false,
        outcome: TestOutcome::Passed,
    }
}

pub fn failing(id: &str) -> CaseDef {
    CaseDef {
        id: id.to_string(),
        explicit: false,
        outcome: TestOutcome::Failed,
    }
}

pub fn explicit(id: &str) -> CaseDef {
    CaseDef {
        id: id.to_string(),
        explicit: true,
        outcome: TestOutcome::Passed,
    }
}

pub struct SpyCase {
    def: CaseDef,
    calls: SharedCalls,
}

#[async_trait]
impl AsyncDispose for SpyCase {
    async fn dispose(&self) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .released_cases
            .push(self.def.id.clone());
        Ok(())
    }
}

impl TestCase for SpyCase {
    fn unique_id(&self) -> &str {
        &self.def.id
    }

    fn explicit(&self) -> bool {
        self.def.explicit
    }
}

/// What the spy front-end does when asked to execute.
#[derive(Debug, Clone, Default)]
pub enum ExecBehavior {
    #[default]
    Normal,
    /// Fail the whole execution with a front-end error.
    Fail(String),
    /// Change the working directory, then behave normally.
    ChangeDir(PathBuf),
    /// Change the working directory, then fail.
    ChangeDirAndFail(PathBuf),
}

pub struct SpyFront {
    assembly_name: String,
    assembly_unique_id: String,
    cases: Vec<CaseDef>,
    calls: SharedCalls,
    behavior: ExecBehavior,
}

impl SpyFront {
    fn case(&self, def: &CaseDef) -> TestCaseRef {
        Arc::new(SpyCase {
            def: def.clone(),
            calls: self.calls.clone(),
        })
    }

    async fn execute(
        &self,
        sink: &dyn MessageSink,
        options: &ExecutionOptions,
        test_cases: &[TestCaseRef],
        cancel: &CancellationToken,
    ) -> FrontEndResult<()> {
        self.calls.lock().unwrap().explicit.push(options.explicit);

        match &self.behavior {
            ExecBehavior::Normal => {}
            ExecBehavior::Fail(message) => {
                return Err(FrontEndError::ExecFailed(message.clone()));
            }
            ExecBehavior::ChangeDir(dir) => std::env::set_current_dir(dir)?,
            ExecBehavior::ChangeDirAndFail(dir) => {
                std::env::set_current_dir(dir)?;
                return Err(FrontEndError::ExecFailed("changed directory".to_string()));
            }
        }

        sink.on_message(&Message::AssemblyStarting {
            assembly_unique_id: self.assembly_unique_id.clone(),
            assembly_name: self.assembly_name.clone(),
        })
        .await;

        for test_case in test_cases {
            if cancel.is_cancelled() {
                break;
            }
            let info = TestCaseInfo::from_test_case(test_case.as_ref());
            let outcome = if !options.explicit.should_run(test_case.explicit()) {
                TestOutcome::NotRun
            } else {
                self.calls
                    .lock()
                    .unwrap()
                    .executed
                    .push(info.unique_id.clone());
                self.cases
                    .iter()
                    .find(|c| c.id == info.unique_id)
                    .map(|c| c.outcome)
                    .unwrap_or(TestOutcome::Passed)
            };

            sink.on_message(&Message::TestStarting { test: info.clone() }).await;
            if !sink
                .on_message(&Message::TestFinished(TestFinished::new(info, outcome)))
                .await
            {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncDispose for SpyFront {
    async fn dispose(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().disposed_fronts += 1;
        Ok(())
    }
}

#[async_trait]
impl FrontController for SpyFront {
    fn assembly_unique_id(&self) -> &str {
        &self.assembly_unique_id
    }

    fn attach_pipeline_startup(&mut self, _startup: Arc<dyn PipelineStartup>) {
        self.calls.lock().unwrap().attached_startup = true;
    }

    fn serialize(&self, test_case: &dyn TestCase) -> FrontEndResult<String> {
        Ok(format!("spy:{}", test_case.unique_id()))
    }

    fn deserialize(&self, serialized: &str) -> FrontEndResult<TestCaseRef> {
        let id = serialized
            .strip_prefix("spy:")
            .ok_or_else(|| FrontEndError::Deserialization(serialized.to_string()))?;
        self.cases
            .iter()
            .find(|c| c.id == id)
            .map(|def| self.case(def))
            .ok_or_else(|| FrontEndError::Deserialization(format!("unknown id {}", id)))
    }

    async fn find(
        &self,
        _sink: &dyn MessageSink,
        _options: &DiscoveryOptions,
        filter: &TestFilter<'_>,
        cancel: &CancellationToken,
        callback: &mut dyn DiscoveryCallback,
    ) -> FrontEndResult<()> {
        self.calls.lock().unwrap().find += 1;
        for def in &self.cases {
            if cancel.is_cancelled() {
                break;
            }
            let test_case = self.case(def);
            let passed = filter(self.assembly_name.as_str(), test_case.as_ref());
            if !callback.on_test_case(test_case, passed).await {
                break;
            }
        }
        Ok(())
    }

    async fn find_and_run(
        &self,
        sink: &dyn MessageSink,
        _discovery_options: &DiscoveryOptions,
        execution_options: &ExecutionOptions,
        filter: &TestFilter<'_>,
        cancel: &CancellationToken,
    ) -> FrontEndResult<()> {
        self.calls.lock().unwrap().find_and_run += 1;
        let selected: Vec<TestCaseRef> = self
            .cases
            .iter()
            .map(|def| self.case(def))
            .filter(|tc| filter(self.assembly_name.as_str(), tc.as_ref()))
            .collect();
        self.execute(sink, execution_options, &selected, cancel)
            .await
    }

    async fn run(
        &self,
        sink: &dyn MessageSink,
        execution_options: &ExecutionOptions,
        test_cases: &[TestCaseRef],
        cancel: &CancellationToken,
    ) -> FrontEndResult<()> {
        self.calls.lock().unwrap().run.push(
            test_cases
                .iter()
                .map(|tc| tc.unique_id().to_string())
                .collect(),
        );
        self.execute(sink, execution_options, test_cases, cancel)
            .await
    }
}

/// Factory for [`SpyFront`]s. The assembly unique ID is `id-<name>`.
pub struct SpyFactory {
    pub cases: Vec<CaseDef>,
    pub calls: SharedCalls,
    pub behavior: ExecBehavior,
    pub fail_create: bool,
}

impl SpyFactory {
    pub fn new(cases: Vec<CaseDef>) -> Self {
        Self {
            cases,
            calls: SharedCalls::default(),
            behavior: ExecBehavior::Normal,
            fail_create: false,
        }
    }

    pub fn with_behavior(mut self, behavior: ExecBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn failing_to_create(mut self) -> Self {
        self.fail_create = true;
        self
    }
}

#[async_trait]
impl FrontControllerFactory for SpyFactory {
    async fn create(
        &self,
        assembly: &TestAssembly,
        _context: &DiagnosticContext<'_>,
    ) -> FrontEndResult<Box<dyn FrontController>> {
        if self.fail_create {
            return Err(FrontEndError::LoadFailed(format!(
                "cannot load {}",
                assembly.name
            )));
        }
        self.calls.lock().unwrap().created += 1;
        Ok(Box::new(SpyFront {
            assembly_name: assembly.name.clone(),
            assembly_unique_id: format!("id-{}", assembly.name),
            cases: self.cases.clone(),
            calls: self.calls.clone(),
            behavior: self.behavior.clone(),
        }))
    }
}

/// Records every message; optionally refuses after `accept` messages.
#[derive(Default)]
pub struct SpySink {
    pub messages: Mutex<Vec<Message>>,
    pub accept: Option<usize>,
}

impl SpySink {
    pub fn refusing_after(accept: usize) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            accept: Some(accept),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Diagnostic {
                    level: tally::message::DiagnosticLevel::Warning,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Diagnostic {
                    level: tally::message::DiagnosticLevel::Info,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Error(e) => Some((e.kind, e.message)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageSink for SpySink {
    async fn on_message(&self, message: &Message) -> bool {
        let mut messages = self.messages.lock().unwrap();
        messages.push(message.clone());
        match self.accept {
            Some(limit) => messages.len() < limit,
            None => true,
        }
    }
}

/// Records log lines as `(level, line)`.
#[derive(Default)]
pub struct SpyLogger {
    pub lines: Mutex<Vec<(&'static str, String)>>,
}

impl SpyLogger {
    pub fn lines(&self, level: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl RunnerLogger for SpyLogger {
    fn log_message(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(("message", message.to_string()));
    }

    fn log_important_message(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(("important", message.to_string()));
    }

    fn log_warning(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(("warning", message.to_string()));
    }

    fn log_error(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(("error", message.to_string()));
    }

    fn log_raw(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(("raw", message.to_string()));
    }
}

/// Counts transformer invocations and the assemblies they saw.
#[derive(Default, Clone)]
pub struct SpyTransformer {
    pub seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ReportTransformer for SpyTransformer {
    fn id(&self) -> &str {
        "spy"
    }

    fn transform(&self, report: &AssembliesReport) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(
            report
                .assemblies
                .iter()
                .map(|a| a.unique_id.clone())
                .collect(),
        );
        Ok(())
    }
}
