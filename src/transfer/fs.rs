//! Filesystem abstraction shared by local and remote endpoints

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::local::LocalFs;
use crate::path_utils::{expand_home, is_home_relative, HomeLookupError};

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Which side of the SSH connection a path lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Local,
    Remote,
}

/// Result of a stat call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub size: u64,
}

/// One node found while walking a tree, in pre-order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Full path in the endpoint's namespace
    pub path: String,
    /// Path relative to the walk root, `/`-separated
    pub relative: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Operations the transfer engine needs from a filesystem.
///
/// Implementations return plain `io::Error`s; the engine attaches the path
/// and the operation that failed.
#[async_trait]
pub trait TransferFs: Send + Sync {
    fn kind(&self) -> EndpointKind;

    /// Names the file namespace this filesystem sees. Two filesystems with
    /// the same namespace may reach the same files under different paths.
    fn namespace(&self) -> String;

    /// Absolute path of an existing node with links and `.`/`..` resolved
    async fn canonicalize(&self, path: &str) -> io::Result<String>;

    /// Home directory used for `~` expansion
    async fn home_dir(&self) -> Result<String, HomeLookupError>;

    /// `Ok(None)` when nothing exists at `path`
    async fn stat(&self, path: &str) -> io::Result<Option<FileStat>>;

    /// Every entry below `root` (the root itself excluded), parents before children.
    ///
    /// Symbolic links are never descended. A link to a regular file is listed
    /// as that file; any other link is skipped.
    async fn walk(&self, root: &str) -> io::Result<Vec<WalkEntry>>;

    /// Create one directory. An existing directory is not an error.
    async fn create_dir(&self, path: &str) -> io::Result<()>;

    async fn open_read(&self, path: &str) -> io::Result<BoxedReader>;

    /// Create or truncate `path` for writing
    async fn create_file(&self, path: &str) -> io::Result<BoxedWriter>;

    fn join(&self, base: &str, component: &str) -> String;

    fn parent(&self, path: &str) -> Option<String>;

    /// Release any session the filesystem holds
    async fn close(&self) -> io::Result<()> {
        Ok(())
    }

    /// Expand a leading `~` against [`TransferFs::home_dir`]
    async fn resolve(&self, path: &str) -> Result<String, HomeLookupError> {
        if !is_home_relative(path) {
            return Ok(path.to_string());
        }
        let home = self.home_dir().await?;
        Ok(expand_home(path, &home))
    }
}

/// A path together with the filesystem it lives on
#[derive(Clone)]
pub struct Endpoint {
    fs: Arc<dyn TransferFs>,
    path: String,
}

impl Endpoint {
    pub fn new(fs: Arc<dyn TransferFs>, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    /// Endpoint on the local filesystem
    pub fn local(path: impl Into<String>) -> Self {
        Self::new(Arc::new(LocalFs), path)
    }

    pub fn kind(&self) -> EndpointKind {
        self.fs.kind()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fs(&self) -> &Arc<dyn TransferFs> {
        &self.fs
    }

    /// Same filesystem, different path
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            path: path.into(),
        }
    }

    /// Expand `~` in this endpoint's path
    pub async fn resolved(&self) -> Result<Self, HomeLookupError> {
        let path = self.fs.resolve(&self.path).await?;
        Ok(self.with_path(path))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.kind())
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            EndpointKind::Local => write!(f, "{}", self.path),
            EndpointKind::Remote => write!(f, "remote:{}", self.path),
        }
    }
}
