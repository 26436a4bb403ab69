//! Error types for engagement scoring

use thiserror::Error;

/// Errors that can occur around a scoring run.
///
/// Malformed individual events are not errors at this level; they are excluded
/// from their session and reported through `BatchOutcome::skipped`.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse event batch: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid scoring configuration: {0}")]
    ConfigError(String),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Event source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Score sink write failed: {0}")]
    SinkWrite(String),
}
