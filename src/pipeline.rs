//! Pipeline startup: an optional one-time initialization hook per assembly.
//!
//! A test assembly may declare (at most) one pipeline startup type. The
//! type is resolved through a [`TypeRegistry`], an explicit name-to-factory
//! table that replaces runtime type inspection. The registered factory
//! builds the instance from the declaration's settings; the orchestrator
//! then starts it and hands it to the front-end.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tally::message::MessageSink;
//! use tally::pipeline::{PipelineStartup, TypeRegistry};
//!
//! struct Fixtures;
//!
//! #[async_trait]
//! impl PipelineStartup for Fixtures {
//!     async fn start(&self, _diagnostics: &dyn MessageSink) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let registry = TypeRegistry::new()
//!     .with_pipeline_startup("fixtures", |_decl| Ok(Arc::new(Fixtures)));
//! assert!(registry.get("fixtures").is_some());
//! ```

pub mod command;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::assembly::PipelineStartupDeclaration;
use crate::message::MessageSink;

pub use command::CommandPipelineStartup;

/// One-time initialization hook for a test assembly.
///
/// Started once before any discovery or execution against the assembly and
/// stopped by the caller after the last run. Instances are shared with the
/// front-end, hence `Send + Sync`.
#[async_trait]
pub trait PipelineStartup: Send + Sync {
    /// Performs initialization. Diagnostics go to `diagnostic_sink`.
    async fn start(&self, diagnostic_sink: &dyn MessageSink) -> anyhow::Result<()>;

    /// Undoes initialization.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds a pipeline startup instance from its declaration.
pub type PipelineStartupFactory = Box<
    dyn Fn(&PipelineStartupDeclaration) -> anyhow::Result<Arc<dyn PipelineStartup>> + Send + Sync,
>;

/// What the registry knows about a type name.
pub enum RegisteredType {
    /// The type provides the pipeline startup capability.
    PipelineStartup(PipelineStartupFactory),

    /// The type is known but provides no pipeline startup capability.
    Plain,
}

impl std::fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisteredType::PipelineStartup(_) => f.write_str("PipelineStartup(..)"),
            RegisteredType::Plain => f.write_str("Plain"),
        }
    }
}

/// Name-to-type table used to resolve declarations.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `command` pipeline startup.
    pub fn with_builtins() -> Self {
        Self::new().with_pipeline_startup("command", |declaration| {
            Ok(Arc::new(CommandPipelineStartup::from_declaration(
                declaration,
            )?))
        })
    }

    pub fn with_pipeline_startup<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PipelineStartupDeclaration) -> anyhow::Result<Arc<dyn PipelineStartup>>
            + Send
            + Sync
            + 'static,
    {
        self.types
            .insert(name.into(), RegisteredType::PipelineStartup(Box::new(factory)));
        self
    }

    /// Registers a type that exists but is not a pipeline startup.
    pub fn with_plain_type(mut self, name: impl Into<String>) -> Self {
        self.types.insert(name.into(), RegisteredType::Plain);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredType> {
        self.types.get(name)
    }
}
