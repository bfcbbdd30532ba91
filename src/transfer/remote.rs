//! Remote filesystem endpoint over SFTP
//!
//! Each [`RemoteFs`] owns one SFTP subsystem channel opened on a borrowed
//! [`SshConnection`]. Closing it ends the subsystem, not the connection.

use std::io;

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tracing::{debug, info, warn};

use super::error::TransferError;
use super::fs::{BoxedReader, BoxedWriter, EndpointKind, FileStat, TransferFs, WalkEntry};
use crate::path_utils::{join_remote_path, remote_parent, HomeLookupError};
use crate::ssh::SshConnection;

/// One SFTP session on a remote host
pub struct RemoteFs {
    sftp: SftpSession,
    host: String,
    port: u16,
}

impl RemoteFs {
    /// Open the `sftp` subsystem on `conn`
    pub async fn open(conn: &SshConnection) -> Result<Self, TransferError> {
        info!("Opening SFTP subsystem on {}", conn.host());

        let channel = conn.open_session_channel().await?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            TransferError::Subsystem(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransferError::Subsystem(e.to_string()))?;

        debug!("SFTP subsystem opened on {}", conn.host());

        Ok(Self {
            sftp,
            host: conn.host().to_string(),
            port: conn.port(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

fn to_io(err: SftpErrorInner) -> io::Error {
    let kind = match &err {
        SftpErrorInner::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => io::ErrorKind::NotFound,
            StatusCode::PermissionDenied => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        },
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.to_string())
}

#[async_trait]
impl TransferFs for RemoteFs {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Remote
    }

    fn namespace(&self) -> String {
        format!("sftp://{}:{}", self.host, self.port)
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        self.sftp.canonicalize(path).await.map_err(to_io)
    }

    async fn home_dir(&self) -> Result<String, HomeLookupError> {
        self.sftp
            .canonicalize(".")
            .await
            .map_err(|e| HomeLookupError::Remote(e.to_string()))
    }

    async fn stat(&self, path: &str) -> io::Result<Option<FileStat>> {
        match self.sftp.metadata(path).await.map_err(to_io) {
            Ok(meta) => Ok(Some(FileStat {
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.size.unwrap_or(0) },
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn walk(&self, root: &str) -> io::Result<Vec<WalkEntry>> {
        let mut entries = Vec::new();
        // (directory path, its path relative to root)
        let mut stack = vec![(root.to_string(), String::new())];

        while let Some((dir, rel_dir)) = stack.pop() {
            let mut children: Vec<(String, String)> = self
                .sftp
                .read_dir(&dir)
                .await
                .map_err(to_io)?
                .map(|entry| entry.file_name())
                .filter(|name| name != "." && name != "..")
                .map(|name| {
                    let relative = join_remote_path(&rel_dir, &name)
                        .trim_start_matches('/')
                        .to_string();
                    (join_remote_path(&dir, &name), relative)
                })
                .collect();
            children.sort();

            let mut subdirs = Vec::new();
            for (path, relative) in children {
                let mut meta = self.sftp.symlink_metadata(&path).await.map_err(to_io)?;
                if meta.is_symlink() {
                    match self.sftp.metadata(&path).await {
                        Ok(target) if target.is_regular() => meta = target,
                        _ => {
                            warn!("Skipping symlink {} on {}", path, self.host);
                            continue;
                        }
                    }
                }
                let is_dir = meta.is_dir();
                if is_dir {
                    subdirs.push((path.clone(), relative.clone()));
                }
                entries.push(WalkEntry {
                    path,
                    relative,
                    is_dir,
                    size: if is_dir { 0 } else { meta.size.unwrap_or(0) },
                });
            }
            stack.extend(subdirs.into_iter().rev());
        }

        Ok(preorder(entries))
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        match self.sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) => match self.sftp.metadata(path).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                _ => Err(to_io(e)),
            },
        }
    }

    async fn open_read(&self, path: &str) -> io::Result<BoxedReader> {
        let file = self.sftp.open(path).await.map_err(to_io)?;
        Ok(Box::pin(file))
    }

    async fn create_file(&self, path: &str) -> io::Result<BoxedWriter> {
        let file = self.sftp.create(path).await.map_err(to_io)?;
        Ok(Box::pin(file))
    }

    fn join(&self, base: &str, component: &str) -> String {
        join_remote_path(base, component)
    }

    fn parent(&self, path: &str) -> Option<String> {
        remote_parent(path)
    }

    async fn close(&self) -> io::Result<()> {
        debug!("Closing SFTP session on {}", self.host);
        self.sftp.close().await.map_err(to_io)
    }
}

/// Reorder a breadth-by-level listing so every directory is directly
/// followed by its own subtree.
fn preorder(entries: Vec<WalkEntry>) -> Vec<WalkEntry> {
    let mut sorted = entries;
    sorted.sort_by(|a, b| {
        a.relative
            .split('/')
            .cmp(b.relative.split('/'))
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(relative: &str, is_dir: bool) -> WalkEntry {
        WalkEntry {
            path: format!("/srv/{}", relative),
            relative: relative.to_string(),
            is_dir,
            size: 0,
        }
    }

    #[test]
    fn test_preorder_keeps_parents_first() {
        let listed = vec![
            entry("a", true),
            entry("b.txt", false),
            entry("a-x", false),
            entry("a/z.txt", false),
            entry("a/sub", true),
            entry("a/sub/deep.txt", false),
        ];
        let ordered: Vec<_> = preorder(listed)
            .into_iter()
            .map(|e| e.relative)
            .collect();
        assert_eq!(
            ordered,
            ["a", "a/sub", "a/sub/deep.txt", "a/z.txt", "a-x", "b.txt"]
        );
    }
}
