//! sshrelay - transfer and tunneling over SSH
//!
//! Interactive shells, local/remote and remote/remote file transfer with
//! bounded concurrency and aggregated progress, and tcp/unix tunnels through
//! an authenticated russh connection.

pub mod client;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod path_utils;
pub mod ssh;
pub mod transfer;

pub use client::{FileTransfer, RemoteClient, ShellSession, TunnelForwarder};
pub use error::{Error, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Filter comes from `RUST_LOG`, `info` when unset. Calling it again is a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
