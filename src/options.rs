//! Discovery and execution options handed to the front-end.
//!
//! Options are plain data. The coordinator clones them per run, so any
//! per-run adjustment (for example enabling explicit-only execution when
//! every selected test is explicit) never leaks into the next run.

use serde::{Deserialize, Serialize};

/// How explicit tests are treated during execution.
///
/// | Value | Non-explicit tests | Explicit tests |
/// |-------|--------------------|----------------|
/// | `off` | run | not run |
/// | `on` | run | run |
/// | `only` | not run | run |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplicitOption {
    #[default]
    Off,
    On,
    Only,
}

impl ExplicitOption {
    /// Returns `true` if a test with the given explicit flag should run.
    pub fn should_run(&self, explicit: bool) -> bool {
        match self {
            ExplicitOption::Off => !explicit,
            ExplicitOption::On => true,
            ExplicitOption::Only => explicit,
        }
    }
}

/// Whether the runner talks to a human or to another program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Human-readable console lines.
    #[default]
    Interactive,

    /// Structured messages only; nothing is written as free text.
    Automated,
}

impl ReportMode {
    pub fn is_automated(&self) -> bool {
        matches!(self, ReportMode::Automated)
    }
}

/// Options that influence test discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Forward diagnostic messages from the front-end.
    #[serde(default)]
    pub diagnostic_messages: bool,

    /// Forward internal diagnostic messages (runner debugging aid).
    #[serde(default)]
    pub internal_diagnostics: bool,
}

/// Options that influence test execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Request cancellation once a run reports a failure.
    #[serde(default)]
    pub stop_on_fail: bool,

    /// Explicit test handling.
    #[serde(default)]
    pub explicit: ExplicitOption,

    /// Treat skipped tests as failures.
    #[serde(default)]
    pub fail_skips: bool,

    /// Treat passing tests that produced warnings as failures.
    #[serde(default)]
    pub fail_warns: bool,

    /// Report tests still running after this many seconds. `0` disables.
    #[serde(default)]
    pub long_running_seconds: u64,

    /// Forward diagnostic messages from the front-end.
    #[serde(default)]
    pub diagnostic_messages: bool,

    /// Forward internal diagnostic messages (runner debugging aid).
    #[serde(default)]
    pub internal_diagnostics: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_option_should_run() {
        assert!(ExplicitOption::Off.should_run(false));
        assert!(!ExplicitOption::Off.should_run(true));
        assert!(ExplicitOption::On.should_run(false));
        assert!(ExplicitOption::On.should_run(true));
        assert!(!ExplicitOption::Only.should_run(false));
        assert!(ExplicitOption::Only.should_run(true));
    }

    #[test]
    fn test_explicit_option_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            explicit: ExplicitOption,
        }

        let w: Wrapper = toml::from_str(r#"explicit = "only""#).unwrap();
        assert_eq!(w.explicit, ExplicitOption::Only);
    }
}
