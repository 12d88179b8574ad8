//! Configuration loading for tally.
//!
//! The runner configuration (`tally.toml`) names the test manifests to
//! run and the options to run them with. [`load_assemblies`] turns it into
//! [`TestAssembly`] values ready for the coordinator.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::assembly::{TestAssembly, TestFilters};
use crate::framework::manifest::load_manifest;
use crate::options::{DiscoveryOptions, ExecutionOptions};

/// Loads tally configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use tally::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("tally.toml"))?;
/// println!("Assemblies: {}", config.assemblies.len());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads tally configuration from a TOML string.
///
/// ```
/// use tally::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [runner]
///     stop_on_fail = true
/// "#).unwrap();
/// assert!(config.runner.stop_on_fail);
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

impl RunnerConfig {
    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            diagnostic_messages: self.diagnostic_messages,
            internal_diagnostics: self.internal_diagnostics,
        }
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            stop_on_fail: self.stop_on_fail,
            explicit: self.explicit,
            fail_skips: self.fail_skips,
            fail_warns: self.fail_warns,
            long_running_seconds: self.long_running_seconds,
            diagnostic_messages: self.diagnostic_messages,
            internal_diagnostics: self.internal_diagnostics,
        }
    }
}

impl FiltersConfig {
    /// Compiles the patterns into a [`TestFilters`].
    pub fn to_filters(&self) -> Result<TestFilters> {
        let mut filters = TestFilters::new();
        for name in &self.assemblies {
            filters = filters.with_assembly(name);
        }
        for pattern in &self.include {
            filters = filters
                .with_include(pattern)
                .with_context(|| format!("Invalid include pattern: {}", pattern))?;
        }
        for pattern in &self.exclude {
            filters = filters
                .with_exclude(pattern)
                .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
        }
        for (name, value) in &self.traits {
            filters = filters.with_trait(name, value);
        }
        Ok(filters)
    }
}

/// Resolves a manifest path: expands `~`, then makes relative paths
/// relative to `base_dir`.
pub fn resolve_manifest_path(manifest: &Path, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&manifest.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Builds the test assembly for one `[[assemblies]]` entry.
///
/// The manifest is read for the assembly name and its pipeline startup
/// declarations; test cases are left to the front-end.
pub fn load_assembly(
    config: &Config,
    entry: &AssemblyConfig,
    filters: &TestFilters,
    base_dir: &Path,
) -> Result<TestAssembly> {
    let path = resolve_manifest_path(&entry.manifest, base_dir);
    let manifest = load_manifest(&path)?;

    let mut assembly = TestAssembly::new(manifest.assembly.name, path)
        .with_filters(filters.clone())
        .with_discovery_options(config.runner.discovery_options())
        .with_execution_options(config.runner.execution_options())
        .with_auto_enable_explicit(config.runner.auto_enable_explicit);
    for declaration in manifest.assembly.pipeline_startup {
        assembly = assembly.with_pipeline_startup(declaration);
    }
    for id in &entry.test_case_ids {
        assembly = assembly.with_test_case_id(id);
    }
    for serialized in &entry.serialized_test_cases {
        assembly = assembly.with_serialized_test_case(serialized);
    }
    Ok(assembly)
}

/// Builds every configured test assembly.
///
/// `base_dir` is usually the directory holding the configuration file.
pub fn load_assemblies(config: &Config, base_dir: &Path) -> Result<Vec<TestAssembly>> {
    let filters = config.filters.to_filters()?;
    config
        .assemblies
        .iter()
        .map(|entry| {
            load_assembly(config, entry, &filters, base_dir).with_context(|| {
                format!("Failed to load assembly {}", entry.manifest.display())
            })
        })
        .collect()
}
