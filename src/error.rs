use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffPackError {
    /// The comparison itself could not run. Trees that differ are not an error.
    #[error("tree comparison failed at {path}: {reason}")]
    ComparisonFailed { path: PathBuf, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("archive operation failed for {path}: {source}")]
    ArchiveFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Apply-to-copy would copy a tree into itself or over one of its ancestors.
    #[error("cannot copy {target} to {copy_to}: the two paths overlap")]
    OverlappingCopy { target: PathBuf, copy_to: PathBuf },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DiffPackError>;

/// Attach a human-readable context to an `io::Result`, turning it into a
/// [`DiffPackError::Io`].
pub trait IoContext<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| DiffPackError::Io {
            context: f(),
            source,
        })
    }
}

impl DiffPackError {
    pub(crate) fn comparison(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ComparisonFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArchiveFailure {
            path: path.into(),
            source,
        }
    }
}
