use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the pure tag codecs.
///
/// These are always recoverable: callers fall back to showing the raw value
/// (or a blank placeholder) for the one field that failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported value {value:?} for {what}")]
    UnsupportedValue { what: String, value: String },

    #[error("decode error: {0}")]
    Decode(String),
}

/// Failures while reading a file into a snapshot.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse metadata in {}: {message}", .path.display())]
    Metadata { path: PathBuf, message: String },
}

/// What went wrong inside the library-backed write path.
#[derive(Debug, Error)]
pub enum PersistCause {
    #[error("cannot open metadata container: {0}")]
    Open(String),

    #[error("cannot encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("cannot write metadata: {0}")]
    Write(String),
}

/// A library-backed commit failed. Nothing was written for this commit.
#[derive(Debug, Error)]
#[error("failed to persist metadata to {}: {cause}", .path.display())]
pub struct PersistFailure {
    pub path: PathBuf,
    #[source]
    pub cause: PersistCause,
}

impl PersistFailure {
    pub fn new(path: impl Into<PathBuf>, cause: PersistCause) -> Self {
        Self {
            path: path.into(),
            cause,
        }
    }
}

/// Failures of the worker-process backend.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker process failed to start: {0}")]
    StartFailure(String),

    #[error("worker is busy with another request")]
    Busy,

    #[error("worker did not answer within {0:?}")]
    Unresponsive(Duration),

    #[error("worker reported an error: {message}")]
    Reported { message: String },

    #[error("value for {key} contains a line break")]
    InvalidValue { key: String },

    #[error("worker has been shut down")]
    Stopped,

    #[error("worker pipe failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A commit through the facade failed; pending edits are left untouched.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Persist(#[from] PersistFailure),

    #[error("failed to commit metadata to {}: {source}", .path.display())]
    Worker {
        path: PathBuf,
        #[source]
        source: WorkerError,
    },
}
