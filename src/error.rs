//! Error types for the build core.
//!
//! Three classes of failure cross the public API: caller-input faults
//! (`Validation`), deliberately fenced-off functionality (`NotImplemented`)
//! and filesystem failures carrying the offending path (`Io`). Retrying is a
//! caller concern; nothing in this crate retries.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while building images or writing tarballs.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Malformed caller input: bad context directory, invalid build options
    /// or a configuration that fails validation. Never worth retrying.
    #[error("validation error: {0}")]
    Validation(String),

    /// A feature gated behind the MVP boundary was requested.
    #[error("advanced features not yet implemented: {0}")]
    NotImplemented(String),

    /// Filesystem failure while walking, reading or writing.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image reference that cannot be parsed even under weak validation.
    #[error("invalid image reference '{reference}': {reason}")]
    Reference { reference: String, reason: String },

    /// JSON (de)serialization failure for config, manifest or index blobs.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        BuildError::Reference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BuildError>;
