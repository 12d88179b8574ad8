//! tally CLI - In-process test orchestration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tally::assembly::TestAssembly;
use tally::config::{self, Config};
use tally::diagnostics::{ConsoleLogger, RunnerLogger, TracingLogger};
use tally::framework::manifest::ManifestFactory;
use tally::message::{Message, MessageSink, TestCaseInfo};
use tally::options::ReportMode;
use tally::orchestrator::{DiscoveredTestCase, RunCoordinator, invoke_pipeline_startup};
use tally::pipeline::{PipelineStartup, TypeRegistry};
use tally::report::{ConsoleSink, JsonSink, JunitTransformer};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "In-process test orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "tally.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    Run {
        /// Run only the test case with this ID (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Emit JSON lines instead of console output
        #[arg(long)]
        automated: bool,

        /// Cancel remaining tests after the first failure
        #[arg(long)]
        stop_on_fail: bool,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// Discover tests without running them
    Discover {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            ids,
            automated,
            stop_on_fail,
            junit,
        } => {
            let status =
                run_tests(&cli.config, ids, automated, stop_on_fail, junit, cli.verbose).await?;
            std::process::exit(status);
        }
        Commands::Discover { format } => discover_tests(&cli.config, &format).await,
        Commands::Validate => validate_config(&cli.config),
    }
}

/// Directory relative manifest paths are resolved against.
fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn load(config_path: &Path) -> Result<(Config, Vec<TestAssembly>)> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let assemblies = config::load_assemblies(&config, &config_dir(config_path))?;
    Ok((config, assemblies))
}

async fn run_tests(
    config_path: &Path,
    ids: Vec<String>,
    automated: bool,
    stop_on_fail: bool,
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> Result<i32> {
    let (mut config, mut assemblies) = load(config_path)?;

    // Apply overrides
    if automated {
        config.runner.report_mode = ReportMode::Automated;
    }
    if stop_on_fail {
        for assembly in &mut assemblies {
            assembly.execution_options.stop_on_fail = true;
        }
    }
    let report_mode = config.runner.report_mode;

    let cancellation = CancellationToken::new();
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling the run");
            ctrl_c.cancel();
        }
    });

    let mut coordinator = RunCoordinator::new(Arc::new(ManifestFactory), cancellation.clone())
        .with_report_mode(report_mode)
        .with_internal_diagnostics(config.runner.internal_diagnostics);
    if let Some(path) = junit_path.or_else(|| config.report.junit.clone()) {
        coordinator = coordinator.with_transformer(JunitTransformer::new(path));
    }

    let console_sink = ConsoleSink::new(verbose);
    let json_sink = JsonSink::stdout();
    let (sink, logger): (&dyn MessageSink, &dyn RunnerLogger) = if report_mode.is_automated() {
        (&json_sink, &TracingLogger)
    } else {
        ConsoleLogger.log_important_message(tally::banner());
        (&console_sink, &ConsoleLogger)
    };

    let ids: HashSet<String> = ids.into_iter().collect();
    let registry = TypeRegistry::with_builtins();
    let mut startups: Vec<Arc<dyn PipelineStartup>> = Vec::new();

    let result = async {
        let mut status = 0;
        for assembly in &assemblies {
            if cancellation.is_cancelled() {
                debug!("Cancelled; skipping {}", assembly.name);
                continue;
            }

            let startup = invoke_pipeline_startup(assembly, &registry, Some(sink))
                .await
                .with_context(|| format!("Pipeline startup for {} failed", assembly.name))?;
            if let Some(startup) = &startup {
                startups.push(startup.clone());
            }

            status = coordinator
                .run(
                    assembly,
                    sink,
                    Some(sink),
                    logger,
                    startup,
                    (!ids.is_empty()).then_some(&ids),
                )
                .await?;
        }
        Ok::<i32, anyhow::Error>(status)
    }
    .await;

    stop_pipeline_startups(&startups).await;
    if !report_mode.is_automated() {
        console_sink.print_summary();
    }
    result
}

async fn stop_pipeline_startups(startups: &[Arc<dyn PipelineStartup>]) {
    for startup in startups.iter().rev() {
        if let Err(e) = startup.stop().await {
            warn!("Failed to stop pipeline startup: {:#}", e);
        }
    }
}

/// Discovered test case as printed by `discover --format json`.
#[derive(Serialize)]
struct DiscoveredEntry {
    assembly: String,
    #[serde(flatten)]
    test_case: TestCaseInfo,
    serialization: String,
}

/// Collects announcements of test cases that passed the filters.
#[derive(Default)]
struct DiscoveryListing {
    assembly: Mutex<String>,
    entries: Mutex<Vec<DiscoveredEntry>>,
}

#[async_trait]
impl MessageSink for DiscoveryListing {
    async fn on_message(&self, message: &Message) -> bool {
        match message {
            Message::DiscoveryStarting { assembly_name, .. } => {
                if let Ok(mut assembly) = self.assembly.lock() {
                    *assembly = assembly_name.clone();
                }
            }
            Message::TestCaseDiscovered {
                test_case,
                serialization,
                ..
            } => {
                let assembly = self
                    .assembly
                    .lock()
                    .map(|a| a.clone())
                    .unwrap_or_default();
                if let Ok(mut entries) = self.entries.lock() {
                    entries.push(DiscoveredEntry {
                        assembly,
                        test_case: test_case.clone(),
                        serialization: serialization.clone(),
                    });
                }
            }
            _ => {}
        }
        true
    }
}

async fn discover_tests(config_path: &Path, format: &str) -> Result<()> {
    let (_config, assemblies) = load(config_path)?;

    let coordinator = RunCoordinator::new(Arc::new(ManifestFactory), CancellationToken::new());
    let registry = TypeRegistry::with_builtins();
    let listing = DiscoveryListing::default();
    let mut total = 0;

    for assembly in &assemblies {
        let startup = invoke_pipeline_startup(assembly, &registry, None)
            .await
            .with_context(|| format!("Pipeline startup for {} failed", assembly.name))?;

        let mut collected: Vec<DiscoveredTestCase> = Vec::new();
        let result = coordinator
            .discover(
                assembly,
                startup.clone(),
                Some(&listing),
                None,
                Some(&mut collected),
            )
            .await;
        if let Some(startup) = startup {
            stop_pipeline_startups(&[startup]).await;
        }
        result.with_context(|| format!("Discovery of {} failed", assembly.name))?;
        total += collected.len();
    }

    let entries = listing
        .entries
        .into_inner()
        .map_err(|_| anyhow::anyhow!("discovery listing lock poisoned"))?;
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&entries)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "Discovered {} tests ({} match the filters):",
                total,
                entries.len()
            );
            for entry in &entries {
                let marker = if entry.test_case.explicit {
                    " [explicit]"
                } else {
                    ""
                };
                println!("  [{}] {}{}", entry.assembly, entry.test_case.unique_id, marker);
            }
        }
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match load(config_path) {
        Ok((config, assemblies)) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Report mode: {:?}", config.runner.report_mode);
            println!("  Stop on fail: {}", config.runner.stop_on_fail);
            println!("  Explicit: {:?}", config.runner.explicit);
            if let Some(junit) = &config.report.junit {
                println!("  JUnit: {}", junit.display());
            }

            let registry = TypeRegistry::with_builtins();
            println!("  Assemblies:");
            for assembly in &assemblies {
                println!("    {} ({})", assembly.name, assembly.path.display());
                for declaration in &assembly.pipeline_startups {
                    let known = if registry.get(&declaration.type_name).is_some() {
                        ""
                    } else {
                        " (unknown, ignored)"
                    };
                    println!("      pipeline startup: {}{}", declaration.type_name, known);
                }
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
