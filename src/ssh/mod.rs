//! SSH module - connections, host key verification and shell sessions
//!
//! Built on russh. A connection is owned by a single handle-owner task;
//! callers get a cloneable [`SshConnection`] that opens channels through it.
//!
//! # Features
//! - Password and private key authentication
//! - Host key verification (known_hosts, pinned fingerprint, or explicit opt-out)
//! - Exec with streamed output, interactive PTY shells
//! - Channel opening for SFTP and tunnels (direct-tcpip, direct-streamlocal)

mod client;
mod config;
mod connection;
mod error;
mod handle_owner;
pub mod known_hosts;
mod session;

pub use client::{ClientHandler, SshClient};
pub use config::{AuthMethod, HostKeyPolicy, SshConfig, DEFAULT_KEY_PATH};
pub use connection::SshConnection;
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use known_hosts::{fingerprint_matches, HostKeyVerification, KnownHostsStore};
pub use session::{interactive_shell, relay_shell, run_command, PtyRequest};
