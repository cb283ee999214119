//! Error types for nodecounter.
//!
//! Library crates use [`NodeCounterError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all nodecounter operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeCounterError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Repository read, query, or commit failure.
    #[error("repository error: {0}")]
    Repository(String),

    /// A repository session could not be opened.
    #[error("session error: {0}")]
    Session(String),

    /// A structural query failed or is unsupported by the backend.
    #[error("query error: {0}")]
    Query(String),

    /// The configured root path does not exist in the repository.
    #[error("root path not found: {0}")]
    RootNotFound(String),

    /// A node expected to exist was not found.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The worker pool has been closed and no longer accepts batches.
    #[error("worker pool is closed")]
    PoolClosed,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad tree import, malformed property, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NodeCounterError>;

impl NodeCounterError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a repository error from anything displayable.
    pub fn repository(err: impl std::fmt::Display) -> Self {
        Self::Repository(err.to_string())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NodeCounterError::config("worker_count must be positive");
        assert_eq!(err.to_string(), "config error: worker_count must be positive");

        let err = NodeCounterError::RootNotFound("/content/missing".into());
        assert!(err.to_string().contains("/content/missing"));

        let err = NodeCounterError::repository("disk full");
        assert_eq!(err.to_string(), "repository error: disk full");
    }
}
