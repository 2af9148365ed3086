use thiserror::Error;

/// Errors surfaced by the evaluation core.
///
/// Malformed log lines are deliberately absent here: they are skipped and
/// counted during reconstruction, never raised. Failed checks are ordinary
/// `CaseResult` entries, not errors.
#[derive(Debug, Error)]
pub enum EddError {
    /// Invalid case definition. Aborts the run before any evaluation.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl EddError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Result type for core operations
pub type EddResult<T> = Result<T, EddError>;
