//! SSH Error types

use thiserror::Error;

use crate::path_utils::HomeLookupError;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Host key rejected for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Remote command `{command}` exited with status {status}")]
    CommandFailed { command: String, status: u32 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error(transparent)]
    HomeLookup(#[from] HomeLookupError),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}
