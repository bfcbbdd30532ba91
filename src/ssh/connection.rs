//! Authenticated SSH connection handle

use russh::client::Msg;
use russh::Channel;
use tokio::sync::broadcast;

use super::error::SshError;
use super::handle_owner::HandleController;

/// A live, authenticated SSH connection.
///
/// Clones share the same underlying session. Transfers and tunnels borrow a
/// connection per call and never close it; call [`SshConnection::disconnect`]
/// when the owner is done with it.
#[derive(Clone)]
pub struct SshConnection {
    id: String,
    host: String,
    port: u16,
    controller: HandleController,
}

impl SshConnection {
    pub fn new(id: String, host: String, port: u16, controller: HandleController) -> Self {
        Self {
            id,
            host,
            port,
            controller,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn controller(&self) -> &HandleController {
        &self.controller
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.controller.subscribe_disconnect()
    }

    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        self.controller.open_session_channel().await
    }

    pub async fn disconnect(&self) {
        self.controller.disconnect().await
    }
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
