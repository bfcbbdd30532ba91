//! Opening the far end of a tunnel

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::debug;

use super::error::TunnelError;
use super::setting::{Network, TunnelSetting};
use crate::ssh::SshConnection;

/// Any bidirectional byte stream a tunnel can relay
pub trait RelayStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RelayStream for T {}

pub type BoxedStream = Box<dyn RelayStream>;

/// Opens a stream to a remote tunnel target
#[async_trait]
pub trait TunnelDialer: Send + Sync + 'static {
    async fn dial(&self, target: &TunnelSetting) -> Result<BoxedStream, TunnelError>;

    /// Fires when the transport behind the dialer goes away
    fn subscribe_closed(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

#[async_trait]
impl TunnelDialer for SshConnection {
    async fn dial(&self, target: &TunnelSetting) -> Result<BoxedStream, TunnelError> {
        let dial_error = |reason: String| TunnelError::DialThroughConnection {
            target: target.to_string(),
            reason,
        };

        let channel = match target.network {
            Network::Tcp => {
                let (host, port) = target.host_port()?;
                self.controller()
                    .open_direct_tcpip(&host, port as u32, "127.0.0.1", 0)
                    .await
            }
            Network::Unix => {
                self.controller()
                    .open_direct_streamlocal(&target.address)
                    .await
            }
        }
        .map_err(|e| dial_error(e.to_string()))?;

        debug!("Opened channel to {} via {}", target, self.host());
        Ok(Box::new(channel.into_stream()))
    }

    fn subscribe_closed(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.subscribe_disconnect())
    }
}
