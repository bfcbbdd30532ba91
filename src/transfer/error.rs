//! Transfer error types

use std::io;

use thiserror::Error;

use crate::path_utils::HomeLookupError;
use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    HomeLookup(#[from] HomeLookupError),

    #[error("Cannot stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Destination not found: {path}")]
    DestinationNotFound { path: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Not a regular file: {path}")]
    NotAFile { path: String },

    #[error("Source and destination are the same: {path}")]
    SameFile { path: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("SFTP subsystem not available: {0}")]
    Subsystem(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer task failed: {0}")]
    Task(String),
}

impl TransferError {
    pub(crate) fn stat(path: &str, source: io::Error) -> Self {
        Self::Stat {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn open(path: &str, source: io::Error) -> Self {
        Self::Open {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn io(path: &str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    /// Path the failure refers to, when there is one
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Stat { path, .. }
            | Self::Open { path, .. }
            | Self::Io { path, .. }
            | Self::DestinationNotFound { path }
            | Self::NotADirectory { path }
            | Self::NotAFile { path }
            | Self::SameFile { path } => Some(path),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Task(err.to_string())
        }
    }
}
