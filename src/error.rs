use crate::mode::CacheMode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the engine boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} not permitted in {mode} mode")]
    ReadOnlyMode { op: &'static str, mode: CacheMode },

    #[error("folder {folder} is open read-only")]
    ReadOnlyState { folder: String },

    #[error("{mode} mode requires a remote store, but none is connected")]
    RemoteUnavailable { mode: CacheMode },

    #[error("remote operation failed on {context}: {source}")]
    RemoteTransient {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache layout violation at {}: {detail}", path.display())]
    Integrity { path: PathBuf, detail: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn integrity(path: impl Into<PathBuf>, detail: impl Into<String>) -> Error {
        Error::Integrity {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn folder_not_found(name: impl Into<String>) -> Error {
        Error::NotFound {
            kind: "folder",
            name: name.into(),
        }
    }

    pub(crate) fn message_not_found(name: impl Into<String>) -> Error {
        Error::NotFound {
            kind: "message",
            name: name.into(),
        }
    }
}
