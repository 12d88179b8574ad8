//! tally: in-process test orchestration.
//!
//! tally sequences discovery and execution of test cases against test
//! assemblies, honoring filters, explicit-test selection and fail-fast
//! cancellation, and folds the results into one cross-assembly summary.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Framework**: front-end facade that enumerates and runs test cases
//!   (built-in: TOML manifests of shell commands)
//! - **Pipeline**: optional one-time startup hook per assembly
//! - **Orchestrator**: run coordinator, test selection, execution sink,
//!   summary aggregation
//! - **Report**: console and JSON message sinks, JUnit XML transformer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally::diagnostics::ConsoleLogger;
//! use tally::framework::manifest::ManifestFactory;
//! use tally::orchestrator::RunCoordinator;
//! use tally::report::ConsoleSink;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = tally::config::load_config(std::path::Path::new("tally.toml"))?;
//!     let assemblies = tally::config::load_assemblies(&config, std::path::Path::new("."))?;
//!
//!     let mut coordinator = RunCoordinator::new(Arc::new(ManifestFactory), CancellationToken::new());
//!     let sink = ConsoleSink::new(false);
//!     let mut status = 0;
//!     for assembly in &assemblies {
//!         status = coordinator
//!             .run(assembly, &sink, None, &ConsoleLogger, None, None)
//!             .await?;
//!     }
//!     std::process::exit(status);
//! }
//! ```

pub mod assembly;
pub mod config;
pub mod diagnostics;
pub mod framework;
pub mod message;
pub mod options;
pub mod orchestrator;
pub mod pipeline;
pub mod report;

use std::sync::LazyLock;

// Re-export commonly used types
pub use assembly::{TestAssembly, TestFilters};
pub use config::{Config, load_config};
pub use framework::{FrontController, FrontControllerFactory, TestCase};
pub use message::{Message, MessageSink};
pub use orchestrator::{RunCoordinator, TestExecutionSummaries, invoke_pipeline_startup};

static BANNER: LazyLock<String> = LazyLock::new(|| {
    format!(
        "tally v{} [in-process runner/{}-bit/{}-{}]",
        env!("CARGO_PKG_VERSION"),
        usize::BITS,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

/// Human-readable runner banner: name, version, pointer width and
/// platform.
pub fn banner() -> &'static str {
    &BANNER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_names_runner_and_platform() {
        let banner = banner();
        assert!(banner.starts_with(&format!("tally v{}", env!("CARGO_PKG_VERSION"))));
        assert!(banner.contains(&format!("{}-bit", usize::BITS)));
        assert!(banner.contains(std::env::consts::ARCH));
    }
}
