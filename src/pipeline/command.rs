//! Built-in pipeline startup that runs shell-style commands.
//!
//! # Example Declaration
//!
//! ```toml
//! [assembly]
//! name = "calc"
//! pipeline_startup = [
//!     { type = "command", start = "make fixtures", stop = "make clean-fixtures", working_dir = "." },
//! ]
//! ```
//!
//! Commands are split with shell quoting rules and executed directly, not
//! through a shell.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

use super::PipelineStartup;
use crate::assembly::PipelineStartupDeclaration;
use crate::message::{Message, MessageSink};

/// Runs `start` when the pipeline starts and `stop` when it stops.
#[derive(Debug, Clone)]
pub struct CommandPipelineStartup {
    start: Option<Vec<String>>,
    stop: Option<Vec<String>>,
    working_dir: Option<PathBuf>,
}

impl CommandPipelineStartup {
    /// Builds the startup from `start`, `stop` and `working_dir` settings.
    ///
    /// # Errors
    ///
    /// Fails if a command has unbalanced quotes, is empty, or if an
    /// unknown setting is present.
    pub fn from_declaration(declaration: &PipelineStartupDeclaration) -> Result<Self> {
        for key in declaration.settings.keys() {
            if !matches!(key.as_str(), "start" | "stop" | "working_dir") {
                bail!("unknown setting '{}' for command pipeline startup", key);
            }
        }

        Ok(Self {
            start: declaration.setting("start").map(split_command).transpose()?,
            stop: declaration.setting("stop").map(split_command).transpose()?,
            working_dir: declaration.setting("working_dir").map(PathBuf::from),
        })
    }

    async fn execute(&self, argv: &[String]) -> Result<String> {
        let (program, args) = argv
            .split_first()
            .context("command pipeline startup has an empty command")?;

        let mut process = tokio::process::Command::new(program);
        process.args(args);
        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());

        let output = process
            .output()
            .await
            .with_context(|| format!("failed to spawn '{}'", program))?;

        if !output.status.success() {
            bail!(
                "'{}' exited with {}: {}",
                argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl PipelineStartup for CommandPipelineStartup {
    async fn start(&self, diagnostic_sink: &dyn MessageSink) -> Result<()> {
        let Some(argv) = &self.start else {
            return Ok(());
        };

        debug!("Running pipeline startup command: {:?}", argv);
        let stdout = self.execute(argv).await?;
        if !stdout.is_empty() {
            diagnostic_sink
                .on_message(&Message::info(format!("[pipeline startup] {}", stdout)))
                .await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(argv) = &self.stop {
            debug!("Running pipeline stop command: {:?}", argv);
            self.execute(argv).await?;
        }
        Ok(())
    }
}

fn split_command(command: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(command)
        .with_context(|| format!("invalid command line: {}", command))?;
    if argv.is_empty() {
        bail!("command line is empty");
    }
    Ok(argv)
}
