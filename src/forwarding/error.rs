//! Tunnel error types

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Unsupported network `{0}`, expected `tcp` or `unix`")]
    UnsupportedNetwork(String),

    #[error("Invalid address `{0}`")]
    InvalidAddress(String),

    #[error("Cannot listen on {address}: {reason}")]
    Listen { address: String, reason: String },

    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("Cannot reach {target} through the SSH connection: {reason}")]
    DialThroughConnection { target: String, reason: String },

    #[error("SSH connection closed")]
    SessionClosed,

    #[error("Tunnel task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for TunnelError {
    fn from(err: tokio::task::JoinError) -> Self {
        TunnelError::Task(err.to_string())
    }
}
