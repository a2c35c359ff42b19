use thiserror::Error;

use crate::convert::ConversionError;
use crate::instrument::TransformError;

#[derive(Error, Debug)]
pub enum JudgeletError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Sandbox errors
    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Backend '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Sandbox launch failed: {0}")]
    SandboxLaunch(String),

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),

    #[error("Execution controller was disposed")]
    Disposed,

    // Content errors
    #[error("Instrumentation failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Type conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Invalid test content: {0}")]
    InvalidContent(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JudgeletError {
    /// Errors caused by the learner's content rather than the host.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            Self::Transform(_) | Self::Conversion(_) | Self::InvalidContent(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, JudgeletError>;
