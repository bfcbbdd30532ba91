//! Filesystem doubles for engine and relay tests
//!
//! Everything is backed by the local disk. [`TestFs`] can pose as a remote
//! endpoint with its own home directory, fail reads of selected files, and
//! record how many writers are open at once.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use walkdir::WalkDir;

use super::fs::{BoxedReader, BoxedWriter, Endpoint, EndpointKind, FileStat, TransferFs, WalkEntry};
use super::local::LocalFs;
use crate::path_utils::HomeLookupError;

#[derive(Default)]
struct Probe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Default)]
pub struct TestFs {
    remote_home: Option<String>,
    fail_reads_matching: Option<String>,
    probe: Option<Arc<Probe>>,
}

#[async_trait]
impl TransferFs for TestFs {
    fn kind(&self) -> EndpointKind {
        if self.remote_home.is_some() {
            EndpointKind::Remote
        } else {
            EndpointKind::Local
        }
    }

    fn namespace(&self) -> String {
        LocalFs.namespace()
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        LocalFs.canonicalize(path).await
    }

    async fn home_dir(&self) -> Result<String, HomeLookupError> {
        match &self.remote_home {
            Some(home) => Ok(home.clone()),
            None => LocalFs.home_dir().await,
        }
    }

    async fn stat(&self, path: &str) -> io::Result<Option<FileStat>> {
        LocalFs.stat(path).await
    }

    async fn walk(&self, root: &str) -> io::Result<Vec<WalkEntry>> {
        LocalFs.walk(root).await
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        LocalFs.create_dir(path).await
    }

    async fn open_read(&self, path: &str) -> io::Result<BoxedReader> {
        if let Some(needle) = &self.fail_reads_matching {
            if path.contains(needle.as_str()) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "read refused by test filesystem",
                ));
            }
        }
        LocalFs.open_read(path).await
    }

    async fn create_file(&self, path: &str) -> io::Result<BoxedWriter> {
        let inner = LocalFs.create_file(path).await?;
        let Some(probe) = &self.probe else {
            return Ok(inner);
        };

        let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        probe.peak.fetch_max(now, Ordering::SeqCst);
        // Hold the slot long enough for sibling copies to overlap.
        tokio::time::sleep(Duration::from_millis(15)).await;

        Ok(Box::pin(ProbeWriter {
            inner,
            probe: Arc::clone(probe),
        }))
    }

    fn join(&self, base: &str, component: &str) -> String {
        LocalFs.join(base, component)
    }

    fn parent(&self, path: &str) -> Option<String> {
        LocalFs.parent(path)
    }
}

struct ProbeWriter {
    inner: BoxedWriter,
    probe: Arc<Probe>,
}

impl AsyncWrite for ProbeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}

impl Drop for ProbeWriter {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Local directory posing as a remote host whose home is `home`
pub fn remote_endpoint(home: &Path, path: &str) -> Endpoint {
    Endpoint::new(
        Arc::new(TestFs {
            remote_home: Some(home.to_string_lossy().to_string()),
            ..Default::default()
        }),
        path,
    )
}

/// Records the peak number of files being written at the same time
pub struct ConcurrencyProbe {
    probe: Arc<Probe>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn endpoint(&self, path: String) -> Endpoint {
        Endpoint::new(
            Arc::new(TestFs {
                probe: Some(Arc::clone(&self.probe)),
                ..Default::default()
            }),
            path,
        )
    }

    pub fn peak(&self) -> usize {
        self.probe.peak.load(Ordering::SeqCst)
    }
}

/// Refuses to open any source path containing a given substring
pub struct FailingFs;

impl FailingFs {
    pub fn endpoint(path: String, needle: &str) -> Endpoint {
        Endpoint::new(
            Arc::new(TestFs {
                fail_reads_matching: Some(needle.to_string()),
                ..Default::default()
            }),
            path,
        )
    }
}

/// Write `dirs` directories (nested up to three levels) with `files_per_dir`
/// files each. Returns the total number of file bytes written.
pub fn write_tree(root: &Path, dirs: usize, files_per_dir: usize, file_size: usize) -> u64 {
    let mut total = 0u64;
    let mut current = root.to_path_buf();

    for d in 0..dirs {
        current = if d % 3 == 0 {
            root.join(format!("d{}", d))
        } else {
            current.join(format!("d{}", d))
        };
        std::fs::create_dir_all(&current).unwrap();

        for f in 0..files_per_dir {
            let len = file_size + f * 17;
            let content: Vec<u8> = (0..len).map(|i| ((i + d * 31 + f) % 251) as u8).collect();
            std::fs::write(current.join(format!("f{}.dat", f)), &content).unwrap();
            total += len as u64;
        }
    }
    total
}

/// Relative path -> file content (`None` for directories)
pub fn read_tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let content = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).unwrap());
            (relative, content)
        })
        .collect()
}
