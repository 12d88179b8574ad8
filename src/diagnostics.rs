//! Diagnostics: the per-call diagnostic context, error records and loggers.
//!
//! # Diagnostic context
//!
//! Every `discover` and `run` call builds its own [`DiagnosticContext`] and
//! threads it through the calls that need it. Nothing is stored in global
//! state, so one call's diagnostic sink can never leak into another.
//!
//! # Error records
//!
//! Errors escaping a run are converted into an owned chain of
//! [`ErrorRecord`]s (kind, message, optional stack trace, optional cause)
//! and rendered one link at a time, outermost first.
//!
//! # Loggers
//!
//! [`RunnerLogger`] is the free-text channel used in interactive mode.
//! [`ConsoleLogger`] writes styled lines to the terminal, [`TracingLogger`]
//! forwards to `tracing`.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::framework::FrontEndError;
use crate::message::{DiagnosticLevel, ErrorMessage, Message, MessageSink, NullSink};
use crate::orchestrator::{PipelineConfigurationError, RunError, SelectionError};

static NULL_SINK: NullSink = NullSink;

/// Counts of diagnostics that went through a [`DiagnosticContext`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    pub warnings: usize,
    pub errors: usize,
}

/// Diagnostic sink plus the flags that gate what is forwarded to it.
///
/// Also usable as a [`MessageSink`] itself; messages routed through it are
/// counted so the final [`DiagnosticSummary`] covers everything reported
/// during the call.
pub struct DiagnosticContext<'a> {
    sink: &'a dyn MessageSink,
    diagnostic_messages: bool,
    internal_diagnostics: bool,
    warnings: AtomicUsize,
    errors: AtomicUsize,
}

impl<'a> DiagnosticContext<'a> {
    /// Creates a context. Without a sink, diagnostics are discarded.
    pub fn new(
        sink: Option<&'a dyn MessageSink>,
        diagnostic_messages: bool,
        internal_diagnostics: bool,
    ) -> Self {
        Self {
            sink: sink.unwrap_or(&NULL_SINK),
            diagnostic_messages,
            internal_diagnostics,
            warnings: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    pub fn diagnostic_messages(&self) -> bool {
        self.diagnostic_messages
    }

    pub fn internal_diagnostics(&self) -> bool {
        self.internal_diagnostics
    }

    /// Informational diagnostic; forwarded only when diagnostic messages
    /// are enabled.
    pub async fn info(&self, message: impl Into<String>) {
        if self.diagnostic_messages {
            self.on_message(&Message::info(message)).await;
        }
    }

    /// Warning diagnostic; always forwarded.
    pub async fn warning(&self, message: impl Into<String>) {
        self.on_message(&Message::warning(message)).await;
    }

    /// Internal diagnostic; forwarded only when internal diagnostics are
    /// enabled.
    pub async fn internal(&self, message: impl Into<String>) {
        if self.internal_diagnostics {
            self.on_message(&Message::InternalDiagnostic {
                message: message.into(),
            })
            .await;
        }
    }

    pub fn summary(&self) -> DiagnosticSummary {
        DiagnosticSummary {
            warnings: self.warnings.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl MessageSink for DiagnosticContext<'_> {
    async fn on_message(&self, message: &Message) -> bool {
        match message {
            Message::Diagnostic {
                level: DiagnosticLevel::Warning,
                ..
            } => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            Message::Error(_) => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        self.sink.on_message(message).await
    }
}

/// One link of an error cause chain, owned and detached from the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack_trace: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Builds the record chain for an error and all of its sources.
    ///
    /// With `include_stack_trace`, the outermost record carries the error's
    /// own backtrace, or one captured here when the error has none.
    pub fn from_error(error: &anyhow::Error, include_stack_trace: bool) -> Self {
        let mut links: Vec<ErrorRecord> = error
            .chain()
            .map(|link| ErrorRecord::new(error_kind(link), link.to_string()))
            .collect();

        if include_stack_trace && let Some(first) = links.first_mut() {
            let stack_trace = match error.backtrace().status() {
                BacktraceStatus::Captured => error.backtrace().to_string(),
                _ => Backtrace::force_capture().to_string(),
            };
            first.stack_trace = Some(stack_trace);
        }

        let mut record = links
            .pop()
            .unwrap_or_else(|| ErrorRecord::new("Error", error.to_string()));
        while let Some(outer) = links.pop() {
            record = outer.with_cause(record);
        }
        record
    }

    /// Walks the chain outermost first.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        std::iter::successors(Some(self), |record| record.cause.as_deref())
    }

    /// The structured message for this link alone.
    pub fn to_message(&self) -> ErrorMessage {
        ErrorMessage {
            kind: self.kind.clone(),
            message: self.message.clone(),
            stack_trace: self.stack_trace.clone(),
        }
    }
}

/// Name used for an error in reports.
fn error_kind(error: &(dyn StdError + 'static)) -> String {
    let kind = if error.is::<PipelineConfigurationError>() {
        "PipelineConfigurationError"
    } else if error.is::<FrontEndError>() {
        "FrontEndError"
    } else if error.is::<SelectionError>() {
        "SelectionError"
    } else if error.is::<RunError>() {
        "RunError"
    } else if error.is::<std::io::Error>() {
        "IoError"
    } else {
        "Error"
    };
    kind.to_string()
}

/// Free-text logger used in interactive mode.
pub trait RunnerLogger: Send + Sync {
    fn log_message(&self, message: &str);

    fn log_important_message(&self, message: &str) {
        self.log_message(message);
    }

    fn log_warning(&self, message: &str);

    fn log_error(&self, message: &str);

    /// Writes the line untouched.
    fn log_raw(&self, message: &str);
}

/// Logger writing styled lines to the terminal.
pub struct ConsoleLogger;

impl RunnerLogger for ConsoleLogger {
    fn log_message(&self, message: &str) {
        println!("{}", message);
    }

    fn log_important_message(&self, message: &str) {
        println!("{}", console::style(message).bold());
    }

    fn log_warning(&self, message: &str) {
        eprintln!("{}", console::style(message).yellow());
    }

    fn log_error(&self, message: &str) {
        eprintln!("{}", console::style(message).red());
    }

    fn log_raw(&self, message: &str) {
        println!("{}", message);
    }
}

/// Logger forwarding to `tracing`.
pub struct TracingLogger;

impl RunnerLogger for TracingLogger {
    fn log_message(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn log_warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn log_error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn log_raw(&self, message: &str) {
        tracing::info!("{}", message);
    }
}
