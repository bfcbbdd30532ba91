//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to it
//! through a cloneable [`HandleController`] that sends commands over an mpsc
//! channel, so no caller ever holds a lock on the handle across `.await`.
//!
//! ```ignore
//! let controller = spawn_handle_owner_task(handle, connection_id);
//! let channel = controller.open_direct_tcpip("127.0.0.1", 5432, "127.0.0.1", 0).await?;
//! ```

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (shell, exec, sftp subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Open a direct-tcpip channel (tcp tunnel)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Open a direct-streamlocal channel (unix socket tunnel)
    ChannelOpenDirectStreamlocal {
        socket_path: String,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (it copies a sender). Any holder has full control of the
/// connection, so it must not leave the process.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    /// Fires once when the owner task exits
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    /// Build a controller around a raw command sender.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        let (disconnect_tx, _) = broadcast::channel(1);
        Self {
            cmd_tx,
            disconnect_tx,
        }
    }

    /// Receiver that gets `()` when the SSH connection is closed.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    async fn request(
        &self,
        cmd: HandleCommand,
        reply_rx: oneshot::Receiver<Result<Channel<Msg>, russh::Error>>,
    ) -> Result<Channel<Msg>, SshError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(HandleCommand::ChannelOpenSession { reply_tx }, reply_rx)
            .await
    }

    /// Open a direct-tcpip channel to `host:port` as seen from the server
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Open a direct-streamlocal channel to a unix socket on the server
    pub async fn open_direct_streamlocal(&self, socket_path: &str) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            HandleCommand::ChannelOpenDirectStreamlocal {
                socket_path: socket_path.to_string(),
                reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes the handle and returns a controller for sending commands.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    connection_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        let handle = handle;

        info!("Handle owner task started for connection {}", connection_id);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::ChannelOpenSession { reply_tx } => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving channel_open_session result");
                    }
                }

                HandleCommand::ChannelOpenDirectTcpip {
                    host,
                    port,
                    originator_host,
                    originator_port,
                    reply_tx,
                } => {
                    let result = handle
                        .channel_open_direct_tcpip(host, port, originator_host, originator_port)
                        .await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving direct_tcpip result");
                    }
                }

                HandleCommand::ChannelOpenDirectStreamlocal {
                    socket_path,
                    reply_tx,
                } => {
                    let result = handle.channel_open_direct_streamlocal(socket_path).await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving direct_streamlocal result");
                    }
                }

                HandleCommand::Disconnect => {
                    info!("Disconnect requested for connection {}", connection_id);
                    break;
                }
            }
        }

        let _ = disconnect_tx_clone.send(());
        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Connection closed", "en")
            .await;
        info!("Handle owner task terminated for connection {}", connection_id);
    });

    HandleController {
        cmd_tx,
        disconnect_tx,
    }
}

/// Drain all pending commands, returning Disconnect to each caller
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx }
            | HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. }
            | HandleCommand::ChannelOpenDirectStreamlocal { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {
                debug!("Duplicate disconnect ignored");
            }
        }
    }
}
