//! Configuration schema definitions for tally.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunnerConfig           - Reporting mode, fail-fast, explicit handling
//! ├── FiltersConfig          - Include/exclude patterns, traits, assemblies
//! ├── AssemblyConfig[]       - One entry per test manifest
//! └── ReportConfig           - Report transformers (JUnit)
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::options::{ExplicitOption, ReportMode};

/// Root configuration structure for tally.
///
/// # TOML Structure
///
/// ```toml
/// [runner]
/// stop_on_fail = true
///
/// [filters]
/// include = ["^calc::"]
///
/// [[assemblies]]
/// manifest = "tests/calc.toml"
///
/// [report]
/// junit = "test-results/junit.xml"
/// ```
///
/// # Example
///
/// ```
/// use tally::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [[assemblies]]
///     manifest = "calc.toml"
/// "#).unwrap();
/// assert_eq!(config.assemblies.len(), 1);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Filters applied to every assembly.
    #[serde(default)]
    pub filters: FiltersConfig,

    #[serde(default)]
    pub assemblies: Vec<AssemblyConfig>,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Runner behavior.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `report_mode` | `"interactive"` |
/// | `auto_enable_explicit` | true |
/// | `explicit` | `"off"` |
/// | `long_running_seconds` | 0 (disabled) |
/// | everything else | false |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub report_mode: ReportMode,

    /// Forward internal diagnostics and show stack traces.
    #[serde(default)]
    pub internal_diagnostics: bool,

    /// Forward informational diagnostics.
    #[serde(default)]
    pub diagnostic_messages: bool,

    /// Cancel the remaining work after the first failing assembly.
    #[serde(default)]
    pub stop_on_fail: bool,

    /// Run explicit tests only when everything selected is explicit.
    #[serde(default = "default_true")]
    pub auto_enable_explicit: bool,

    #[serde(default)]
    pub explicit: ExplicitOption,

    #[serde(default)]
    pub fail_skips: bool,

    #[serde(default)]
    pub fail_warns: bool,

    /// Report tests running longer than this many seconds. 0 disables.
    #[serde(default)]
    pub long_running_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            report_mode: ReportMode::default(),
            internal_diagnostics: false,
            diagnostic_messages: false,
            stop_on_fail: false,
            auto_enable_explicit: default_true(),
            explicit: ExplicitOption::default(),
            fail_skips: false,
            fail_warns: false,
            long_running_seconds: 0,
        }
    }
}

/// Test filters.
///
/// ```toml
/// [filters]
/// assemblies = ["calc"]
/// include = ["^calc::"]
/// exclude = ["::slow_"]
/// traits = { category = "fast" }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FiltersConfig {
    /// Assembly short names to run. Empty means all.
    #[serde(default)]
    pub assemblies: Vec<String>,

    /// Regular expressions matched against test unique IDs.
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Required trait values.
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
}

/// One test assembly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssemblyConfig {
    /// Path to the test manifest. `~` is expanded; relative paths are
    /// resolved against the configuration file's directory.
    pub manifest: PathBuf,

    /// Run only these test case IDs.
    #[serde(default)]
    pub test_case_ids: Vec<String>,

    /// Run these serialized test cases (as printed by `tally discover
    /// --format json`).
    #[serde(default)]
    pub serialized_test_cases: Vec<String>,
}

/// Report transformers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Write a JUnit XML report to this path.
    #[serde(default)]
    pub junit: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
