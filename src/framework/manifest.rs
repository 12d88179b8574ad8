//! Manifest front-end: test cases declared in TOML, run as processes.
//!
//! A manifest describes one test assembly:
//!
//! ```toml
//! [assembly]
//! name = "calc"
//! working_dir = "."          # relative to the manifest, default: its directory
//! pipeline_startup = [{ type = "command", start = "make fixtures" }]
//!
//! [[tests]]
//! id = "calc::add"
//! command = "sh -c 'test $((1 + 1)) = 2'"
//!
//! [[tests]]
//! id = "calc::soak"
//! command = "./soak.sh"
//! explicit = true
//! traits = { category = "slow" }
//!
//! [[tests]]
//! id = "calc::div"
//! command = "./div.sh"
//! skip = "rounding bug"
//! ```
//!
//! Each selected test runs its command once. Exit status 0 passes, anything
//! else fails. Lines the command writes to stderr starting with
//! `warning: ` are recorded as warnings on the result.
//!
//! The assembly unique ID is the SHA-256 of the canonical manifest path, so
//! it is stable across runs on the same machine.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    AsyncDispose, DiscoveryCallback, FrontController, FrontControllerFactory, FrontEndError,
    FrontEndResult, TestCase, TestCaseRef, TestFilter,
};
use crate::assembly::{PipelineStartupDeclaration, TestAssembly};
use crate::diagnostics::DiagnosticContext;
use crate::message::{ErrorMessage, Message, MessageSink, TestCaseInfo, TestFinished, TestOutcome};
use crate::options::{DiscoveryOptions, ExecutionOptions};
use crate::pipeline::PipelineStartup;

const WARNING_PREFIX: &str = "warning: ";

/// A parsed test manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub assembly: ManifestAssembly,

    #[serde(default)]
    pub tests: Vec<ManifestTest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestAssembly {
    pub name: String,

    #[serde(default)]
    pub pipeline_startup: Vec<PipelineStartupDeclaration>,

    /// Directory the test commands run in, relative to the manifest.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// One declared test case.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestTest {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub command: String,

    #[serde(default)]
    pub explicit: bool,

    /// Skip reason. A skipped test is reported without being run.
    #[serde(default)]
    pub skip: Option<String>,

    #[serde(default)]
    pub traits: BTreeMap<String, String>,
}

/// Parses and checks a manifest.
pub fn parse_manifest(content: &str) -> anyhow::Result<Manifest> {
    let manifest: Manifest = toml::from_str(content).context("Failed to parse manifest")?;

    if manifest.assembly.name.trim().is_empty() {
        bail!("assembly.name must not be empty");
    }

    let mut seen = HashSet::new();
    for test in &manifest.tests {
        if test.id.trim().is_empty() {
            bail!("test IDs must not be empty");
        }
        if !seen.insert(test.id.as_str()) {
            bail!("duplicate test ID '{}'", test.id);
        }
        if test.command.trim().is_empty() {
            bail!("test '{}' has an empty command", test.id);
        }
    }

    Ok(manifest)
}

/// Loads a manifest from disk.
pub fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    parse_manifest(&content).with_context(|| format!("Invalid manifest: {}", path.display()))
}

/// Unique ID of the assembly loaded from `canonical_path`.
pub fn assembly_unique_id(canonical_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A test case declared in a manifest.
#[derive(Debug)]
pub struct ManifestTestCase {
    test: ManifestTest,
}

impl ManifestTestCase {
    pub fn new(test: ManifestTest) -> Self {
        Self { test }
    }

    pub fn command(&self) -> &str {
        &self.test.command
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.test.skip.as_deref()
    }
}

impl AsyncDispose for ManifestTestCase {}

impl TestCase for ManifestTestCase {
    fn unique_id(&self) -> &str {
        &self.test.id
    }

    fn display_name(&self) -> &str {
        self.test.name.as_deref().unwrap_or(&self.test.id)
    }

    fn explicit(&self) -> bool {
        self.test.explicit
    }

    fn trait_value(&self, name: &str) -> Option<&str> {
        self.test.traits.get(name).map(String::as_str)
    }
}

#[derive(Serialize, Deserialize)]
struct SerializedTestCase {
    assembly: String,
    id: String,
}

/// Front controller over one loaded manifest.
pub struct ManifestFrontController {
    assembly_unique_id: String,
    assembly_name: String,
    working_dir: PathBuf,
    tests: Vec<Arc<ManifestTestCase>>,
    pipeline_startup: Option<Arc<dyn PipelineStartup>>,
}

impl ManifestFrontController {
    /// Builds a controller from an already parsed manifest.
    ///
    /// `canonical_path` identifies the assembly; relative working
    /// directories are resolved against its parent.
    pub fn new(manifest: Manifest, canonical_path: &Path) -> Self {
        let base = canonical_path.parent().unwrap_or(Path::new("."));
        let working_dir = match &manifest.assembly.working_dir {
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        };

        Self {
            assembly_unique_id: assembly_unique_id(canonical_path),
            assembly_name: manifest.assembly.name,
            working_dir,
            tests: manifest
                .tests
                .into_iter()
                .map(|test| Arc::new(ManifestTestCase::new(test)))
                .collect(),
            pipeline_startup: None,
        }
    }

    pub fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    pub fn has_pipeline_startup(&self) -> bool {
        self.pipeline_startup.is_some()
    }

    fn passes(&self, filter: &TestFilter<'_>, test_case: &ManifestTestCase) -> bool {
        filter(&self.assembly_name, test_case)
    }

    fn lookup(&self, id: &str) -> Option<&Arc<ManifestTestCase>> {
        self.tests.iter().find(|tc| tc.unique_id() == id)
    }

    /// Runs the given cases in order, stopping on cancellation or when the
    /// sink refuses a result.
    async fn execute(
        &self,
        sink: &dyn MessageSink,
        options: &ExecutionOptions,
        test_cases: &[TestCaseRef],
        cancel: &CancellationToken,
    ) -> FrontEndResult<()> {
        let started = Instant::now();
        let keep_going = sink
            .on_message(&Message::AssemblyStarting {
                assembly_unique_id: self.assembly_unique_id.clone(),
                assembly_name: self.assembly_name.clone(),
            })
            .await;

        if keep_going {
            for test_case in test_cases {
                if cancel.is_cancelled() {
                    debug!("Cancelled; {} stops running tests", self.assembly_name);
                    break;
                }
                if !self.execute_one(sink, options, test_case.as_ref(), cancel).await {
                    break;
                }
            }
        }

        sink.on_message(&Message::AssemblyFinished {
            assembly_unique_id: self.assembly_unique_id.clone(),
            execution_time: started.elapsed(),
        })
        .await;
        Ok(())
    }

    /// Runs one case and reports it. Returns whether to continue.
    async fn execute_one(
        &self,
        sink: &dyn MessageSink,
        options: &ExecutionOptions,
        test_case: &dyn TestCase,
        cancel: &CancellationToken,
    ) -> bool {
        let info = TestCaseInfo::from_test_case(test_case);

        let Some(test) = self.lookup(test_case.unique_id()) else {
            sink.on_message(&Message::Error(ErrorMessage {
                kind: "FrontEndError".to_string(),
                message: format!(
                    "Test case '{}' does not belong to {}",
                    info.unique_id, self.assembly_name
                ),
                stack_trace: None,
            }))
            .await;
            return sink
                .on_message(&Message::TestFinished(TestFinished::new(info, TestOutcome::NotRun)))
                .await;
        };

        if !options.explicit.should_run(test.explicit()) {
            let reason = if test.explicit() {
                "Explicit test not selected"
            } else {
                "Only explicit tests are running"
            };
            return sink
                .on_message(&Message::TestFinished(
                    TestFinished::new(info, TestOutcome::NotRun).with_reason(reason),
                ))
                .await;
        }

        if let Some(reason) = test.skip_reason() {
            return sink
                .on_message(&Message::TestFinished(
                    TestFinished::new(info, TestOutcome::Skipped).with_reason(reason),
                ))
                .await;
        }

        if !sink
            .on_message(&Message::TestStarting { test: info.clone() })
            .await
        {
            return false;
        }

        let finished = match self.run_command(test.command(), info.clone(), cancel).await {
            Ok(finished) => finished,
            Err(e) => {
                sink.on_message(&Message::Error(ErrorMessage {
                    kind: "FrontEndError".to_string(),
                    message: format!("Failed to run '{}': {:#}", info.unique_id, e),
                    stack_trace: None,
                }))
                .await;
                TestFinished::new(info, TestOutcome::NotRun).with_reason("Failed to start")
            }
        };

        if options.internal_diagnostics {
            sink.on_message(&Message::InternalDiagnostic {
                message: format!(
                    "{} finished in {:?}",
                    finished.test.unique_id, finished.duration
                ),
            })
            .await;
        }
        sink.on_message(&Message::TestFinished(finished)).await
    }

    async fn run_command(
        &self,
        command: &str,
        info: TestCaseInfo,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TestFinished> {
        let argv = shell_words::split(command)
            .with_context(|| format!("invalid command line: {}", command))?;
        let Some((program, args)) = argv.split_first() else {
            bail!("command line is empty");
        };

        debug!("Running {}: {:?}", info.unique_id, argv);
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .env("TALLY_TEST_ID", &info.unique_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", program))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.context("Failed to wait for test process")?,
            _ = cancel.cancelled() => {
                return Ok(TestFinished::new(info, TestOutcome::NotRun)
                    .with_duration(started.elapsed())
                    .with_reason("Cancelled"));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut finished = TestFinished::new(
            info,
            if output.status.success() {
                TestOutcome::Passed
            } else {
                TestOutcome::Failed
            },
        )
        .with_duration(started.elapsed())
        .with_output(format!("{}{}", stdout, stderr).trim_end());

        for line in stderr.lines() {
            if let Some(warning) = line.strip_prefix(WARNING_PREFIX) {
                finished = finished.with_warning(warning.trim());
            }
        }

        if !output.status.success() {
            finished = finished.with_reason(match output.status.code() {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            });
        }

        Ok(finished)
    }
}

#[async_trait]
impl AsyncDispose for ManifestFrontController {
    async fn dispose(&self) -> anyhow::Result<()> {
        debug!("Releasing front controller for {}", self.assembly_name);
        Ok(())
    }
}

#[async_trait]
impl FrontController for ManifestFrontController {
    fn assembly_unique_id(&self) -> &str {
        &self.assembly_unique_id
    }

    fn attach_pipeline_startup(&mut self, startup: Arc<dyn PipelineStartup>) {
        self.pipeline_startup = Some(startup);
    }

    fn serialize(&self, test_case: &dyn TestCase) -> FrontEndResult<String> {
        let serialized = SerializedTestCase {
            assembly: self.assembly_unique_id.clone(),
            id: test_case.unique_id().to_string(),
        };
        serde_json::to_string(&serialized).map_err(|e| FrontEndError::Other(e.into()))
    }

    fn deserialize(&self, serialized: &str) -> FrontEndResult<TestCaseRef> {
        let parsed: SerializedTestCase = serde_json::from_str(serialized)
            .map_err(|e| FrontEndError::Deserialization(e.to_string()))?;

        if parsed.assembly != self.assembly_unique_id {
            return Err(FrontEndError::Deserialization(format!(
                "test case '{}' belongs to another assembly",
                parsed.id
            )));
        }

        match self.lookup(&parsed.id) {
            Some(test_case) => Ok(test_case.clone()),
            None => Err(FrontEndError::Deserialization(format!(
                "unknown test case '{}'",
                parsed.id
            ))),
        }
    }

    async fn find(
        &self,
        sink: &dyn MessageSink,
        options: &DiscoveryOptions,
        filter: &TestFilter<'_>,
        cancel: &CancellationToken,
        callback: &mut dyn DiscoveryCallback,
    ) -> FrontEndResult<()> {
        if options.diagnostic_messages {
            sink.on_message(&Message::info(format!(
                "Discovering {} test case(s) in {}",
                self.tests.len(),
                self.assembly_name
            )))
            .await;
        }

        for test_case in &self.tests {
            if cancel.is_cancelled() {
                break;
            }
            let passed_filter = self.passes(filter, test_case);
            let test_case: TestCaseRef = test_case.clone();
            if !callback.on_test_case(test_case, passed_filter).await {
                break;
            }
        }
        Ok(())
    }

    async fn find_and_run(
        &self,
        sink: &dyn MessageSink,
        discovery_options: &DiscoveryOptions,
        execution_options: &ExecutionOptions,
        filter: &TestFilter<'_>,
        cancel: &CancellationToken,
    ) -> FrontEndResult<()> {
        let selected: Vec<TestCaseRef> = self
            .tests
            .iter()
            .filter(|tc| self.passes(filter, tc))
            .map(|tc| -> TestCaseRef { tc.clone() })
            .collect();

        if discovery_options.diagnostic_messages {
            sink.on_message(&Message::info(format!(
                "{}: {} of {} test case(s) selected",
                self.assembly_name,
                selected.len(),
                self.tests.len()
            )))
            .await;
        }
        sink.on_message(&Message::DiscoveryComplete {
            assembly_unique_id: self.assembly_unique_id.clone(),
            test_cases_to_run: selected.len(),
        })
        .await;

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
        self.execute(sink, execution_options, test_cases, cancel)
            .await
    }
}

/// Creates [`ManifestFrontController`]s from the assembly path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestFactory;

#[async_trait]
impl FrontControllerFactory for ManifestFactory {
    async fn create(
        &self,
        assembly: &TestAssembly,
        context: &DiagnosticContext<'_>,
    ) -> FrontEndResult<Box<dyn FrontController>> {
        let canonical = tokio::fs::canonicalize(&assembly.path).await.map_err(|e| {
            FrontEndError::LoadFailed(format!("{}: {}", assembly.path.display(), e))
        })?;
        let content = tokio::fs::read_to_string(&canonical).await.map_err(|e| {
            FrontEndError::LoadFailed(format!("{}: {}", canonical.display(), e))
        })?;
        let manifest = parse_manifest(&content)
            .map_err(|e| FrontEndError::LoadFailed(format!("{}: {:#}", canonical.display(), e)))?;

        context
            .info(format!(
                "Loaded {} test case(s) for {} from {}",
                manifest.tests.len(),
                assembly.name,
                canonical.display()
            ))
            .await;

        Ok(Box::new(ManifestFrontController::new(manifest, &canonical)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::message::NullSink;
    use crate::options::ExplicitOption;

    const MANIFEST: &str = r#"
        [assembly]
        name = "calc"

        [[tests]]
        id = "calc::add"
        command = "true"
        traits = { category = "fast" }

        [[tests]]
        id = "calc::div"
        command = "sh -c 'echo boom; echo \"warning: slow path\" >&2; exit 3'"

        [[tests]]
        id = "calc::soak"
        command = "true"
        explicit = true

        [[tests]]
        id = "calc::skipped"
        command = "true"
        skip = "not today"
    "#;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Message>>);

    impl Recorder {
        fn finished(&self) -> Vec<TestFinished> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|m| match m {
                    Message::TestFinished(f) => Some(f.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl MessageSink for Recorder {
        async fn on_message(&self, message: &Message) -> bool {
            self.0.lock().unwrap().push(message.clone());
            true
        }
    }

    struct Collect(Vec<(String, bool)>);

    #[async_trait]
    impl DiscoveryCallback for Collect {
        async fn on_test_case(&mut self, test_case: TestCaseRef, passed_filter: bool) -> bool {
            self.0.push((test_case.unique_id().to_string(), passed_filter));
            true
        }
    }

    fn controller() -> ManifestFrontController {
        let manifest = parse_manifest(MANIFEST).unwrap();
        ManifestFrontController::new(manifest, &std::env::temp_dir().join("calc.toml"))
    }

    #[test]
    fn test_parse_manifest_rejects_duplicate_ids() {
        let err = parse_manifest(
            r#"
            [assembly]
            name = "calc"
            [[tests]]
            id = "a"
            command = "true"
            [[tests]]
            id = "a"
            command = "true"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate test ID 'a'"));
    }

    #[test]
    fn test_parse_manifest_reads_pipeline_startup() {
        let manifest = parse_manifest(
            r#"
            [assembly]
            name = "calc"
            pipeline_startup = [{ type = "command", start = "make fixtures" }]
            "#,
        )
        .unwrap();
        let declaration = &manifest.assembly.pipeline_startup[0];
        assert_eq!(declaration.type_name, "command");
        assert_eq!(declaration.setting("start"), Some("make fixtures"));
    }

    #[test]
    fn test_assembly_unique_id_is_stable_sha256() {
        let id = assembly_unique_id(Path::new("/tmp/calc.toml"));
        assert_eq!(id.len(), 64);
        assert_eq!(id, assembly_unique_id(Path::new("/tmp/calc.toml")));
        assert_ne!(id, assembly_unique_id(Path::new("/tmp/other.toml")));
    }

    #[test]
    fn test_serialization_resolves_same_case() {
        let front = controller();
        let case = front.lookup("calc::div").unwrap().clone();

        let serialized = front.serialize(&*case).unwrap();
        let resolved = front.deserialize(&serialized).unwrap();

        assert_eq!(resolved.unique_id(), "calc::div");
    }

    #[test]
    fn test_deserialize_rejects_garbage_and_unknown_ids() {
        let front = controller();
        assert!(matches!(
            front.deserialize("{\"assembly\":"),
            Err(FrontEndError::Deserialization(_))
        ));

        let unknown = format!(
            "{{\"assembly\":\"{}\",\"id\":\"calc::nope\"}}",
            front.assembly_unique_id()
        );
        assert!(matches!(
            front.deserialize(&unknown),
            Err(FrontEndError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_find_reports_filter_verdicts_in_order() {
        let front = controller();
        let mut collect = Collect(Vec::new());
        let filter = |_: &str, tc: &dyn TestCase| tc.trait_value("category") == Some("fast");

        front
            .find(
                &NullSink,
                &DiscoveryOptions::default(),
                &filter,
                &CancellationToken::new(),
                &mut collect,
            )
            .await
            .unwrap();

        assert_eq!(
            collect.0,
            vec![
                ("calc::add".to_string(), true),
                ("calc::div".to_string(), false),
                ("calc::soak".to_string(), false),
                ("calc::skipped".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_find_and_run_reports_every_outcome() {
        let front = controller();
        let sink = Recorder::default();
        let filter = |_: &str, _: &dyn TestCase| true;

        front
            .find_and_run(
                &sink,
                &DiscoveryOptions::default(),
                &ExecutionOptions::default(),
                &filter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let finished = sink.finished();
        let outcomes: Vec<_> = finished
            .iter()
            .map(|f| (f.test.unique_id.as_str(), f.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("calc::add", TestOutcome::Passed),
                ("calc::div", TestOutcome::Failed),
                ("calc::soak", TestOutcome::NotRun),
                ("calc::skipped", TestOutcome::Skipped),
            ]
        );

        let div = &finished[1];
        assert_eq!(div.reason.as_deref(), Some("exit status 3"));
        assert!(div.output.contains("boom"));
        assert_eq!(div.warnings, vec!["slow path".to_string()]);
    }

    #[tokio::test]
    async fn test_run_explicit_only() {
        let front = controller();
        let sink = Recorder::default();
        let cases: Vec<TestCaseRef> = vec![
            front.lookup("calc::add").unwrap().clone(),
            front.lookup("calc::soak").unwrap().clone(),
        ];
        let options = ExecutionOptions {
            explicit: ExplicitOption::Only,
            ..Default::default()
        };

        front
            .run(&sink, &options, &cases, &CancellationToken::new())
            .await
            .unwrap();

        let outcomes: Vec<_> = sink.finished().iter().map(|f| f.outcome).collect();
        assert_eq!(outcomes, vec![TestOutcome::NotRun, TestOutcome::Passed]);
    }

    #[tokio::test]
    async fn test_cancelled_run_executes_nothing() {
        let front = controller();
        let sink = Recorder::default();
        let cases: Vec<TestCaseRef> = vec![front.lookup("calc::add").unwrap().clone()];
        let cancel = CancellationToken::new();
        cancel.cancel();

        front
            .run(&sink, &ExecutionOptions::default(), &cases, &cancel)
            .await
            .unwrap();

        assert!(sink.finished().is_empty());
        let messages = sink.0.lock().unwrap();
        assert!(matches!(messages.last(), Some(Message::AssemblyFinished { .. })));
    }

    #[tokio::test]
    async fn test_factory_reports_missing_manifest() {
        let assembly = TestAssembly::new("calc", "/definitely/not/here.toml");
        let context = DiagnosticContext::new(None, false, false);

        let err = ManifestFactory.create(&assembly, &context).await.err().unwrap();
        assert!(matches!(err, FrontEndError::LoadFailed(_)));
    }
}
