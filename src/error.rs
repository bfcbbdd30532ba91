//! Crate-level error

use thiserror::Error;

use crate::config::ConfigError;
use crate::forwarding::TunnelError;
use crate::ssh::SshError;
use crate::transfer::TransferError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
