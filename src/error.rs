use thiserror::Error;

/// Result type alias for pipeline operations
pub type EvalResult<T> = Result<T, EvalError>;

/// Error taxonomy for the evaluation pipeline.
///
/// Configuration and plugin-resolution failures abort the run before any
/// stage executes; inference and checker failures propagate unchanged with
/// no automatic retry.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Missing required file, malformed option blob, or similar startup precondition
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No plugin registered under the requested key
    #[error("{kind} plugin not registered: {key}")]
    PluginNotFound { kind: &'static str, key: String },

    /// Prompt template for a language was never added to the builder
    #[error("No prompt template for language: {language}")]
    MissingTemplate { language: String },

    /// Evaluation format the processor does not know how to render
    #[error("Unsupported dataset format: {eval_type}")]
    UnsupportedDatasetFormat { eval_type: String },

    /// Model backend call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Correctness checker subprocess failed or produced an unreadable verdict
    #[error("Checker error: {0}")]
    Checker(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new inference error
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Create a new checker error
    pub fn checker(message: impl Into<String>) -> Self {
        Self::Checker(message.into())
    }
}
