//! Error types for arqvist
//!
//! Errors returned from this crate abort the operation that produced them.
//! Failures on individual entries during a scan are *not* errors in this
//! sense: they are collected as [`ScanError`](crate::types::ScanError)s on the
//! resulting snapshot so one unreadable file never sinks a whole scan.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in arqvist
pub type Result<T> = std::result::Result<T, ArqvistError>;

/// Main error type for all arqvist operations
#[derive(Debug, Error)]
pub enum ArqvistError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scan root (or another required path) does not exist
    #[error("Path not found: {0:?}")]
    NotFound(PathBuf),

    /// Scan root exists but is not a directory
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    /// Permission denied for a path the operation cannot do without
    #[error("Permission denied: {path:?}")]
    PermissionDenied {
        /// Path where permission was denied
        path: PathBuf,
    },

    /// Manifest could not be deserialized or violates snapshot invariants
    #[error("Corrupt manifest {path:?}: {message}")]
    CorruptManifest {
        /// Manifest file
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// No manifest at the expected location
    #[error("Manifest not found: {0:?}")]
    ManifestNotFound(PathBuf),

    /// Manifest changed on disk between load and save
    #[error("Manifest {0:?} was modified by another writer")]
    ConcurrentWriteConflict(PathBuf),

    /// Directory is not tracked
    #[error("Not initialised: no .arqvist directory at {0:?}")]
    NotInitialized(PathBuf),

    /// Directory is already tracked
    #[error("Already initialised: {0:?}")]
    AlreadyInitialized(PathBuf),

    /// Path cannot be represented as a UTF-8 relative path
    #[error("Path conversion error: {0:?}")]
    PathConversion(PathBuf),

    /// Exclude pattern failed to parse
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for ArqvistError {
    fn from(err: globset::Error) -> Self {
        ArqvistError::InvalidPattern(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for ArqvistError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ArqvistError::ThreadPool(err.to_string())
    }
}

impl ArqvistError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ArqvistError::Internal(msg.into())
    }

    /// Create a corrupt-manifest error for `path`
    pub fn corrupt(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        ArqvistError::CorruptManifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Map an I/O error on `path` onto the path-carrying variants
    ///
    /// `NotFound` and `PermissionDenied` keep the offending path so the CLI
    /// can report it; anything else stays a plain I/O error.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ArqvistError::NotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => ArqvistError::PermissionDenied { path: path.into() },
            _ => ArqvistError::Io(err),
        }
    }

    /// Check if this error indicates a damaged or contended manifest
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ArqvistError::CorruptManifest { .. } | ArqvistError::ConcurrentWriteConflict(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ArqvistError::NotInitialized(path) => {
                format!("{:?} is not tracked. Run 'arqvist init' first.", path)
            }
            ArqvistError::AlreadyInitialized(path) => {
                format!("{:?} is already tracked. Use 'arqvist update' to refresh the manifest.", path)
            }
            ArqvistError::ConcurrentWriteConflict(path) => {
                format!(
                    "Manifest {:?} changed while this command was running. \
                     Another arqvist process may be writing to it; re-run once it has finished.",
                    path
                )
            }
            ArqvistError::CorruptManifest { path, message } => {
                format!(
                    "Manifest {:?} is unreadable ({}). Restore it from history or re-run 'arqvist init'.",
                    path, message
                )
            }
            _ => self.to_string(),
        }
    }
}
