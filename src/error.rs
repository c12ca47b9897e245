use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic error taxonomy for the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("process called with zero sections")]
    EmptySections,

    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("dependency \"{name}\" referenced by \"{referenced_by}\" is not declared")]
    MissingDependency { name: String, referenced_by: String },

    #[error("unable to place remaining dimensions in execution groups: {}", remaining.join(", "))]
    ExecutionGrouping { remaining: Vec<String> },

    #[error("Dimension \"{dimension}\" timed out after {ms}ms")]
    DimensionTimeout { dimension: String, ms: u64 },

    #[error("All providers failed for dimension \"{dimension}\". Tried: {}", tried.join(", "))]
    ProviderExhausted { dimension: String, tried: Vec<String> },

    #[error("fatal hook \"{hook}\" failed: {cause}")]
    Hook {
        hook: &'static str,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn hook(hook: &'static str, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Hook {
            hook,
            cause: Box::new(cause),
        }
    }
}
