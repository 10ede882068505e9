//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid chunker config: {0}")]
    InvalidChunkerConfig(String),

    #[error("invalid build type: {0}")]
    InvalidBuildType(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("operation requires a {expected} manifest, got {found}")]
    WrongManifestType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("build type mismatch: old manifest is {old}, new manifest is {new}")]
    BuildTypeMismatch { old: String, new: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Manifest validation error, identifying the first offending field.
///
/// Field paths are dotted with array indices, e.g. `files[2].chunks[0].hash`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Syntax(String),

    #[error("manifest missing required field `{0}`")]
    MissingField(String),

    #[error("manifest field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("manifest type is missing or unknown: {0}")]
    UnknownManifestType(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
