//! The test assembly model and test filters.
//!
//! A [`TestAssembly`] is everything the orchestrator needs to know about one
//! loadable unit of tests: where it lives, how it is named, which pipeline
//! startup it declares, which tests to select, and the options to run them
//! with. It is pure data; loading and executing is the front-end's job.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::framework::TestCase;
use crate::options::{DiscoveryOptions, ExecutionOptions};

/// A declared pipeline startup designation.
///
/// Declarations name a type registered in a
/// [`TypeRegistry`](crate::pipeline::TypeRegistry); the remaining keys are
/// handed to that type's factory.
///
/// ```toml
/// pipeline_startup = [{ type = "command", start = "make fixtures" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineStartupDeclaration {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(flatten)]
    pub settings: BTreeMap<String, String>,
}

impl PipelineStartupDeclaration {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

/// Test filters applied during discovery.
///
/// A test case passes when:
/// - the assembly list is empty or contains the assembly's short name,
/// - no include pattern is given or at least one matches the unique ID,
/// - no exclude pattern matches the unique ID,
/// - every required trait has the required value.
#[derive(Debug, Clone, Default)]
pub struct TestFilters {
    assemblies: Vec<String>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    traits: BTreeMap<String, String>,
}

impl TestFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to the named assemblies.
    pub fn with_assembly(mut self, name: impl Into<String>) -> Self {
        self.assemblies.push(name.into());
        self
    }

    pub fn with_include(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.include.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_exclude(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.exclude.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_trait(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.insert(name.into(), value.into());
        self
    }

    /// Returns `true` if nothing is filtered.
    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
            && self.include.is_empty()
            && self.exclude.is_empty()
            && self.traits.is_empty()
    }

    /// Applies the filter to one test case.
    pub fn matches(&self, assembly_name: &str, test_case: &dyn TestCase) -> bool {
        if !self.assemblies.is_empty() && !self.assemblies.iter().any(|a| a == assembly_name) {
            return false;
        }

        let id = test_case.unique_id();
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(id)) {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(id)) {
            return false;
        }

        self.traits
            .iter()
            .all(|(name, value)| test_case.trait_value(name) == Some(value.as_str()))
    }
}

/// One test assembly together with its selection and options.
#[derive(Debug, Clone)]
pub struct TestAssembly {
    /// Short name, passed to filters and shown in output.
    pub name: String,

    /// Location the front-end loads the assembly from.
    pub path: PathBuf,

    /// Pipeline startup designations declared by the assembly.
    pub pipeline_startups: Vec<PipelineStartupDeclaration>,

    pub filters: TestFilters,

    pub discovery_options: DiscoveryOptions,

    pub execution_options: ExecutionOptions,

    /// Switch to explicit-only execution when every selected test case is
    /// explicit.
    pub auto_enable_explicit: bool,

    /// Pre-serialized test cases to run instead of discovering.
    pub serialized_test_cases: Vec<String>,

    /// Unique IDs of test cases to run instead of running everything.
    pub test_case_ids: HashSet<String>,
}

impl TestAssembly {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            pipeline_startups: Vec::new(),
            filters: TestFilters::default(),
            discovery_options: DiscoveryOptions::default(),
            execution_options: ExecutionOptions::default(),
            auto_enable_explicit: true,
            serialized_test_cases: Vec::new(),
            test_case_ids: HashSet::new(),
        }
    }

    pub fn with_pipeline_startup(mut self, declaration: PipelineStartupDeclaration) -> Self {
        self.pipeline_startups.push(declaration);
        self
    }

    pub fn with_filters(mut self, filters: TestFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_discovery_options(mut self, options: DiscoveryOptions) -> Self {
        self.discovery_options = options;
        self
    }

    pub fn with_execution_options(mut self, options: ExecutionOptions) -> Self {
        self.execution_options = options;
        self
    }

    pub fn with_auto_enable_explicit(mut self, enabled: bool) -> Self {
        self.auto_enable_explicit = enabled;
        self
    }

    pub fn with_serialized_test_case(mut self, serialized: impl Into<String>) -> Self {
        self.serialized_test_cases.push(serialized.into());
        self
    }

    pub fn with_test_case_id(mut self, id: impl Into<String>) -> Self {
        self.test_case_ids.insert(id.into());
        self
    }

    /// Checks that the assembly can be handed to a front-end.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!(
                "assembly at '{}' has an empty name",
                self.path.display()
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(format!("assembly '{}' has an empty path", self.name));
        }
        Ok(())
    }

    /// The filter predicate handed to the front-end.
    pub fn filter(&self) -> impl Fn(&str, &dyn TestCase) -> bool + Send + Sync + '_ {
        move |assembly_name, test_case| self.filters.matches(assembly_name, test_case)
    }
}
