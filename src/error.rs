use std::path::PathBuf;
use thiserror::Error;

use crate::agent::AgentError;
use crate::embedding::EmbeddingError;
use crate::llm::ModelError;
use crate::retrieval::SearchError;

/// Main error type for Folio
#[derive(Error, Debug)]
pub enum FolioError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Document store errors
    #[error("Document store error: {0}")]
    Store(String),

    /// Retrieval errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Embedding errors
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Language model errors
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Generation loop errors
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Daemon errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// Request rejected before it could be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Daemon not reachable
    #[error("Daemon is not running (no socket at {path})")]
    DaemonNotRunning { path: PathBuf },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Folio operations
pub type Result<T> = std::result::Result<T, FolioError>;
