//! Locating, creating and starting an assembly's pipeline startup.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::assembly::{PipelineStartupDeclaration, TestAssembly};
use crate::message::{Message, MessageSink, NullSink};
use crate::pipeline::{PipelineStartup, RegisteredType, TypeRegistry};

/// Invalid pipeline startup configuration. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineConfigurationError {
    #[error("More than one pipeline startup type was declared: {}", .0.join(", "))]
    MultipleDeclarations(Vec<String>),

    #[error("Pipeline startup type '{0}' does not implement PipelineStartup")]
    NotAPipelineStartup(String),

    #[error("Pipeline startup type '{type_name}' could not be created")]
    ConstructionFailed {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Pipeline startup type '{type_name}' failed to start")]
    StartFailed {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Finds, creates and starts the assembly's pipeline startup, if any.
///
/// - No declaration: returns `Ok(None)`.
/// - More than one declaration: [`PipelineConfigurationError::MultipleDeclarations`].
/// - Declared type is not a pipeline startup: [`PipelineConfigurationError::NotAPipelineStartup`].
/// - Factory fails: [`PipelineConfigurationError::ConstructionFailed`] with the cause.
///
/// Declarations naming unregistered types are skipped with a warning.
/// Warnings are flushed to `diagnostic_sink` whether or not the call
/// succeeds.
pub async fn invoke_pipeline_startup(
    assembly: &TestAssembly,
    registry: &TypeRegistry,
    diagnostic_sink: Option<&dyn MessageSink>,
) -> Result<Option<Arc<dyn PipelineStartup>>, PipelineConfigurationError> {
    let mut warnings = Vec::new();
    let result = locate_and_start(assembly, registry, diagnostic_sink, &mut warnings).await;

    for warning in warnings {
        warn!("{}", warning);
        if let Some(sink) = diagnostic_sink {
            sink.on_message(&Message::warning(warning)).await;
        }
    }

    result
}

async fn locate_and_start(
    assembly: &TestAssembly,
    registry: &TypeRegistry,
    diagnostic_sink: Option<&dyn MessageSink>,
    warnings: &mut Vec<String>,
) -> Result<Option<Arc<dyn PipelineStartup>>, PipelineConfigurationError> {
    let mut found: Vec<(&PipelineStartupDeclaration, &RegisteredType)> = Vec::new();
    for declaration in &assembly.pipeline_startups {
        match registry.get(&declaration.type_name) {
            Some(registered) => found.push((declaration, registered)),
            None => warnings.push(format!(
                "[{}] Pipeline startup type '{}' is not registered and will be ignored",
                assembly.name, declaration.type_name
            )),
        }
    }

    let (declaration, registered) = match found.as_slice() {
        [] => return Ok(None),
        [single] => *single,
        many => {
            return Err(PipelineConfigurationError::MultipleDeclarations(
                many.iter().map(|(d, _)| d.type_name.clone()).collect(),
            ));
        }
    };

    let RegisteredType::PipelineStartup(factory) = registered else {
        return Err(PipelineConfigurationError::NotAPipelineStartup(
            declaration.type_name.clone(),
        ));
    };

    let startup =
        factory(declaration).map_err(|source| PipelineConfigurationError::ConstructionFailed {
            type_name: declaration.type_name.clone(),
            source,
        })?;

    debug!(
        "Starting pipeline startup '{}' for {}",
        declaration.type_name, assembly.name
    );
    startup
        .start(diagnostic_sink.unwrap_or(&NullSink))
        .await
        .map_err(|source| PipelineConfigurationError::StartFailed {
            type_name: declaration.type_name.clone(),
            source,
        })?;

    Ok(Some(startup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    struct CountingStartup(Arc<AtomicUsize>);

    #[async_trait]
    impl PipelineStartup for CountingStartup {
        async fn start(&self, _diagnostic_sink: &dyn MessageSink) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct WarningSink(Mutex<Vec<String>>);

    #[async_trait]
    impl MessageSink for WarningSink {
        async fn on_message(&self, message: &Message) -> bool {
            if let Message::Diagnostic { message, .. } = message {
                self.0.lock().unwrap().push(message.clone());
            }
            true
        }
    }

    fn registry(starts: Arc<AtomicUsize>) -> TypeRegistry {
        TypeRegistry::new()
            .with_pipeline_startup("counting", move |_| {
                Ok(Arc::new(CountingStartup(starts.clone())))
            })
            .with_pipeline_startup("broken", |_| anyhow::bail!("constructor exploded"))
            .with_plain_type("plain")
    }

    #[tokio::test]
    async fn test_no_declaration_returns_none() {
        let assembly = TestAssembly::new("calc", "calc.toml");
        let result = invoke_pipeline_startup(&assembly, &TypeRegistry::new(), None).await;
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_declaration_is_created_and_started() {
        let starts = Arc::new(AtomicUsize::new(0));
        let assembly = TestAssembly::new("calc", "calc.toml")
            .with_pipeline_startup(PipelineStartupDeclaration::new("counting"));

        let startup = invoke_pipeline_startup(&assembly, &registry(starts.clone()), None)
            .await
            .unwrap();

        assert!(startup.is_some());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multiple_declarations_are_rejected() {
        let starts = Arc::new(AtomicUsize::new(0));
        let assembly = TestAssembly::new("calc", "calc.toml")
            .with_pipeline_startup(PipelineStartupDeclaration::new("counting"))
            .with_pipeline_startup(PipelineStartupDeclaration::new("plain"));

        let err = invoke_pipeline_startup(&assembly, &registry(starts.clone()), None)
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            PipelineConfigurationError::MultipleDeclarations(ref names) if names == &["counting", "plain"]
        ));
        assert!(err.to_string().contains("counting, plain"));
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_plain_type_is_rejected() {
        let assembly = TestAssembly::new("calc", "calc.toml")
            .with_pipeline_startup(PipelineStartupDeclaration::new("plain"));

        let err = invoke_pipeline_startup(&assembly, &registry(Arc::default()), None)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, PipelineConfigurationError::NotAPipelineStartup(_)));
        assert!(err.to_string().contains("PipelineStartup"));
    }

    #[tokio::test]
    async fn test_construction_failure_preserves_cause() {
        let assembly = TestAssembly::new("calc", "calc.toml")
            .with_pipeline_startup(PipelineStartupDeclaration::new("broken"));

        let err = invoke_pipeline_startup(&assembly, &registry(Arc::default()), None)
            .await
            .err()
            .unwrap();

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "constructor exploded");
    }

    #[tokio::test]
    async fn test_unregistered_type_warns_even_on_failure() {
        let sink = WarningSink::default();
        let assembly = TestAssembly::new("calc", "calc.toml")
            .with_pipeline_startup(PipelineStartupDeclaration::new("missing"))
            .with_pipeline_startup(PipelineStartupDeclaration::new("plain"));

        let result = invoke_pipeline_startup(&assembly, &registry(Arc::default()), Some(&sink)).await;

        assert!(result.is_err());
        let warnings = sink.0.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'missing'"));
    }
}
