//! Remote client facade
//!
//! Capabilities are split into small traits so callers can depend on only
//! what they use. [`RemoteClient`] implements all of them over one
//! [`SshConnection`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tracing::info;

use crate::config::Settings;
use crate::error::Result;
use crate::forwarding::{ForwardingBinding, TunnelHandle, TunnelRelay};
use crate::ssh::{interactive_shell, run_command, PtyRequest, SshClient, SshConfig, SshConnection};
use crate::transfer::{RemoteRelay, TransferEngine, TransferReport};

/// Interactive and one-shot command execution
#[async_trait]
pub trait ShellSession {
    /// Interactive shell on this process's stdin/stdout. Returns the remote exit status.
    async fn login(&self) -> Result<Option<u32>>;

    /// Run `command`, streaming its stdout into `sink`
    async fn run(&self, command: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()>;
}

/// Copies between the local machine and the remote host
#[async_trait]
pub trait FileTransfer {
    async fn get(&self, remote: &str, local: &str) -> Result<TransferReport>;

    async fn push(&self, local: &str, remote: &str) -> Result<TransferReport>;
}

/// Local listeners forwarded through the remote host
#[async_trait]
pub trait TunnelForwarder {
    async fn start_tunnel(&self, binding: ForwardingBinding) -> Result<TunnelHandle>;
}

pub struct RemoteClient {
    connection: SshConnection,
    config: SshConfig,
    settings: Settings,
    engine: TransferEngine,
}

impl RemoteClient {
    /// Connect and authenticate
    pub async fn connect(config: SshConfig, settings: Settings) -> Result<Self> {
        let connection = SshClient::new(config.clone()).connect().await?;
        Ok(Self::from_connection(connection, config, settings))
    }

    /// Wrap a connection that is already authenticated
    pub fn from_connection(connection: SshConnection, config: SshConfig, settings: Settings) -> Self {
        let engine = TransferEngine::new(settings.transfer.clone());
        Self {
            connection,
            config,
            settings,
            engine,
        }
    }

    pub fn connection(&self) -> &SshConnection {
        &self.connection
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn pty_request(&self) -> PtyRequest {
        PtyRequest {
            term: self.settings.term.clone(),
            cols: self.config.cols,
            rows: self.config.rows,
        }
    }

    /// Copy `src_path` on this host to `dst_path` on `other`, streaming through
    /// this process
    pub async fn forward(
        &self,
        src_path: &str,
        other: &RemoteClient,
        dst_path: &str,
    ) -> Result<TransferReport> {
        let relay = RemoteRelay::new(self.settings.transfer.clone());
        Ok(relay
            .forward(src_path, dst_path, &self.connection, &other.connection)
            .await?)
    }

    pub async fn disconnect(&self) {
        info!("Disconnecting from {}", self.config.address());
        self.connection.disconnect().await;
    }
}

#[async_trait]
impl ShellSession for RemoteClient {
    async fn login(&self) -> Result<Option<u32>> {
        Ok(interactive_shell(&self.connection, &self.pty_request()).await?)
    }

    async fn run(&self, command: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        Ok(run_command(&self.connection, command, sink).await?)
    }
}

#[async_trait]
impl FileTransfer for RemoteClient {
    async fn get(&self, remote: &str, local: &str) -> Result<TransferReport> {
        Ok(self.engine.get(&self.connection, remote, local).await?)
    }

    async fn push(&self, local: &str, remote: &str) -> Result<TransferReport> {
        Ok(self.engine.push(&self.connection, local, remote).await?)
    }
}

#[async_trait]
impl TunnelForwarder for RemoteClient {
    async fn start_tunnel(&self, binding: ForwardingBinding) -> Result<TunnelHandle> {
        let dialer = Arc::new(self.connection.clone());
        Ok(TunnelRelay::new(binding).start(dialer).await?)
    }
}
