//! Remote-to-remote relay
//!
//! Moves a file or tree from one SSH host to another. Each side gets its own
//! SFTP session; bytes stream through this process without touching local disk.

use std::sync::Arc;

use tracing::info;

use super::engine::{close_sftp, TransferConfig, TransferEngine, TransferReport};
use super::error::TransferError;
use super::fs::{Endpoint, EndpointKind};
use super::remote::RemoteFs;
use crate::ssh::SshConnection;

pub struct RemoteRelay {
    engine: TransferEngine,
}

impl RemoteRelay {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            engine: TransferEngine::new(config),
        }
    }

    /// Copy `src_path` on `src_conn` to `dst_path` on `dst_conn`.
    ///
    /// Both paths may be home-relative. The connections stay open.
    pub async fn forward(
        &self,
        src_path: &str,
        dst_path: &str,
        src_conn: &SshConnection,
        dst_conn: &SshConnection,
    ) -> Result<TransferReport, TransferError> {
        info!(
            "Forwarding {}:{} -> {}:{}",
            src_conn.host(),
            src_path,
            dst_conn.host(),
            dst_path
        );

        let src_fs = Arc::new(RemoteFs::open(src_conn).await?);
        let dst_fs = match RemoteFs::open(dst_conn).await {
            Ok(fs) => Arc::new(fs),
            Err(e) => {
                close_sftp(&src_fs).await;
                return Err(e);
            }
        };

        let result = self
            .forward_between(
                &Endpoint::new(src_fs.clone(), src_path),
                &Endpoint::new(dst_fs.clone(), dst_path),
            )
            .await;

        close_sftp(&src_fs).await;
        close_sftp(&dst_fs).await;
        result
    }

    /// Relay between two already-open remote endpoints
    pub async fn forward_between(
        &self,
        src: &Endpoint,
        dst: &Endpoint,
    ) -> Result<TransferReport, TransferError> {
        for endpoint in [src, dst] {
            if endpoint.kind() != EndpointKind::Remote {
                return Err(TransferError::InvalidEndpoint(format!(
                    "{} is not a remote endpoint",
                    endpoint
                )));
            }
        }
        self.engine.transfer(src, dst).await
    }
}

impl Default for RemoteRelay {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}
