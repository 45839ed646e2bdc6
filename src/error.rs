//! Error types for the news pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Fetch failed for source {source_id}: {message}")]
    FetchError {
        source_id: String,
        message: String,
    },

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Enrichment failed after {attempts} attempts across {credentials} credentials")]
    EnrichmentFailed {
        attempts: u32,
        credentials: usize,
    },

    #[error("Persistence failed for {fingerprint}: {message}")]
    PersistenceError {
        fingerprint: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration source error: {0}")]
    ConfigSourceError(#[from] config::ConfigError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("API error: {code} - {message}")]
    ApiError {
        code: String,
        message: String,
    },

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl PipelineError {
    /// Wraps any error as a source-level fetch failure
    pub fn fetch(source_id: &str, error: impl std::fmt::Display) -> Self {
        Self::FetchError {
            source_id: source_id.to_string(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
