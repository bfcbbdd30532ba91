//! Transfer engine
//!
//! Copies single files and whole trees between any two [`Endpoint`]s.
//! Directory copies walk the source twice: once to size the progress bar,
//! once to create directories inline and dispatch one task per file. File
//! tasks share a semaphore so at most `max_concurrent` copies run at once.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::error::TransferError;
use super::fs::{Endpoint, FileStat};
use super::progress::{ProgressState, ProgressTracker, ProgressWriter};
use super::remote::RemoteFs;
use crate::path_utils::base_name;
use crate::ssh::SshConnection;

/// Default number of concurrent file copies
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// What a directory copy does when one file fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Abort outstanding copies and return the first error
    #[default]
    FailFast,
    /// Record the failure in the report and keep going
    ContinueOnError,
}

/// Transfer tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub error_mode: ErrorMode,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_show_progress() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            error_mode: ErrorMode::FailFast,
            show_progress: true,
        }
    }
}

/// One file copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub source_path: String,
    pub destination_path: String,
    pub size_bytes: u64,
}

/// A copy or directory creation that failed under [`ErrorMode::ContinueOnError`]
#[derive(Debug)]
pub struct TransferFailure {
    pub path: String,
    pub error: TransferError,
}

/// What a transfer did
#[derive(Debug, Default)]
pub struct TransferReport {
    pub completed: Vec<TransferTask>,
    pub directories_created: Vec<String>,
    pub bytes_copied: u64,
    pub failures: Vec<TransferFailure>,
    /// Tracker snapshot taken when the transfer ended
    pub progress: Option<ProgressState>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copies files and trees between endpoints
pub struct TransferEngine {
    config: TransferConfig,
    permits: Arc<Semaphore>,
}

impl TransferEngine {
    pub fn new(config: TransferConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    fn tracker(&self, source: &str, total: u64) -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new(
            &base_name(source),
            total,
            self.config.show_progress,
        ))
    }

    /// Copy one regular file. Returns the number of bytes written.
    pub async fn copy_file(&self, src: &Endpoint, dst: &Endpoint) -> Result<u64, TransferError> {
        let stat = stat_existing(src).await?;
        self.copy_regular(src, dst, stat)
            .await
            .map(|(bytes, _)| bytes)
    }

    async fn copy_regular(
        &self,
        src: &Endpoint,
        dst: &Endpoint,
        stat: FileStat,
    ) -> Result<(u64, ProgressState), TransferError> {
        if stat.is_dir {
            return Err(TransferError::NotAFile {
                path: src.path().to_string(),
            });
        }

        ensure_distinct(src, dst).await?;

        let tracker = self.tracker(src.path(), stat.size);
        match copy_stream(src, dst, &tracker).await {
            Ok(bytes) => {
                tracker.finish();
                debug!("Copied {} -> {} ({} bytes)", src, dst, bytes);
                Ok((bytes, tracker.state()))
            }
            Err(e) => {
                tracker.abandon();
                warn!("Copy {} -> {} failed: {}", src, dst, e);
                Err(e)
            }
        }
    }

    /// Copy the tree at `src` into the existing directory `dst`.
    ///
    /// The tree lands at `dst/<basename(src)>`.
    pub async fn copy_directory(
        &self,
        src: &Endpoint,
        dst: &Endpoint,
    ) -> Result<TransferReport, TransferError> {
        match dst
            .fs()
            .stat(dst.path())
            .await
            .map_err(|e| TransferError::stat(dst.path(), e))?
        {
            None => {
                return Err(TransferError::DestinationNotFound {
                    path: dst.path().to_string(),
                })
            }
            Some(stat) if !stat.is_dir => {
                return Err(TransferError::NotADirectory {
                    path: dst.path().to_string(),
                })
            }
            Some(_) => {}
        }

        if !stat_existing(src).await?.is_dir {
            return Err(TransferError::NotADirectory {
                path: src.path().to_string(),
            });
        }

        let sizing = src
            .fs()
            .walk(src.path())
            .await
            .map_err(|e| TransferError::io(src.path(), e))?;
        let total: u64 = sizing.iter().filter(|e| !e.is_dir).map(|e| e.size).sum();
        let file_count = sizing.iter().filter(|e| !e.is_dir).count();
        drop(sizing);

        info!(
            "Copying directory {} -> {} ({} files, {} bytes)",
            src, dst, file_count, total
        );

        let target = dst.with_path(dst.fs().join(dst.path(), &base_name(src.path())));
        ensure_distinct(src, &target).await?;
        let tracker = self.tracker(src.path(), total);

        let result = self.dispatch_tree(src, &target, &tracker).await;
        match &result {
            Ok(report) if report.is_success() => tracker.finish(),
            Ok(report) => {
                tracker.abandon();
                warn!(
                    "Directory copy {} finished with {} failures",
                    src,
                    report.failures.len()
                );
            }
            Err(e) => {
                tracker.abandon();
                warn!("Directory copy {} -> {} aborted: {}", src, dst, e);
            }
        }

        result.map(|mut report| {
            report.progress = Some(tracker.state());
            report
        })
    }

    async fn dispatch_tree(
        &self,
        src: &Endpoint,
        target: &Endpoint,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<TransferReport, TransferError> {
        let fail_fast = self.config.error_mode == ErrorMode::FailFast;
        let mut report = TransferReport::default();
        let mut tasks: JoinSet<(TransferTask, Result<u64, TransferError>)> = JoinSet::new();

        let entries = src
            .fs()
            .walk(src.path())
            .await
            .map_err(|e| TransferError::io(src.path(), e))?;

        // Root first, then every entry in walk order.
        let root = target.path().to_string();
        target
            .fs()
            .create_dir(&root)
            .await
            .map_err(|e| TransferError::io(&root, e))?;
        report.directories_created.push(root.clone());

        for entry in entries {
            let dst_path = target.fs().join(&root, &entry.relative);

            if entry.is_dir {
                match target.fs().create_dir(&dst_path).await {
                    Ok(()) => report.directories_created.push(dst_path),
                    Err(e) => {
                        let error = TransferError::io(&dst_path, e);
                        if fail_fast {
                            tasks.abort_all();
                            return Err(error);
                        }
                        warn!("{}", error);
                        report.failures.push(TransferFailure {
                            path: dst_path,
                            error,
                        });
                    }
                }
                continue;
            }

            let task = TransferTask {
                source_path: entry.path,
                destination_path: dst_path,
                size_bytes: entry.size,
            };
            let src_file = src.with_path(task.source_path.clone());
            let dst_file = target.with_path(task.destination_path.clone());
            let permits = Arc::clone(&self.permits);
            let tracker = Arc::clone(tracker);

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => copy_stream(&src_file, &dst_file, &tracker).await,
                    Err(_) => Err(TransferError::Cancelled),
                };
                (task, result)
            });
        }

        debug!("All file copies dispatched, waiting for {} tasks", tasks.len());

        while let Some(joined) = tasks.join_next().await {
            let (task, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tasks.abort_all();
                    return Err(e.into());
                }
            };
            match result {
                Ok(bytes) => {
                    report.bytes_copied += bytes;
                    report.completed.push(task);
                }
                Err(error) if fail_fast => {
                    tasks.abort_all();
                    return Err(error);
                }
                Err(error) => {
                    warn!("{}", error);
                    report.failures.push(TransferFailure {
                        path: task.source_path,
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Copy `src` to `dst`, whichever of file or directory `src` is.
    ///
    /// Both paths may start with `~`. A file copied onto an existing
    /// directory lands inside it.
    pub async fn transfer(
        &self,
        src: &Endpoint,
        dst: &Endpoint,
    ) -> Result<TransferReport, TransferError> {
        let src = src.resolved().await?;
        let dst = dst.resolved().await?;

        let stat = stat_existing(&src).await?;
        if stat.is_dir {
            return self.copy_directory(&src, &dst).await;
        }

        let dst = match dst
            .fs()
            .stat(dst.path())
            .await
            .map_err(|e| TransferError::stat(dst.path(), e))?
        {
            Some(existing) if existing.is_dir => {
                dst.with_path(dst.fs().join(dst.path(), &base_name(src.path())))
            }
            _ => dst,
        };

        let (bytes, progress) = self.copy_regular(&src, &dst, stat).await?;
        Ok(TransferReport {
            completed: vec![TransferTask {
                source_path: src.path().to_string(),
                destination_path: dst.path().to_string(),
                size_bytes: stat.size,
            }],
            bytes_copied: bytes,
            progress: Some(progress),
            ..Default::default()
        })
    }

    /// Download `remote` from `conn` to the local path `local`
    pub async fn get(
        &self,
        conn: &SshConnection,
        remote: &str,
        local: &str,
    ) -> Result<TransferReport, TransferError> {
        let sftp = Arc::new(RemoteFs::open(conn).await?);
        let result = self
            .transfer(&Endpoint::new(sftp.clone(), remote), &Endpoint::local(local))
            .await;
        close_sftp(&sftp).await;
        result
    }

    /// Upload the local path `local` to `remote` on `conn`
    pub async fn push(
        &self,
        conn: &SshConnection,
        local: &str,
        remote: &str,
    ) -> Result<TransferReport, TransferError> {
        let sftp = Arc::new(RemoteFs::open(conn).await?);
        let result = self
            .transfer(&Endpoint::local(local), &Endpoint::new(sftp.clone(), remote))
            .await;
        close_sftp(&sftp).await;
        result
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

pub(crate) async fn close_sftp(sftp: &RemoteFs) {
    use super::fs::TransferFs;

    if let Err(e) = sftp.close().await {
        debug!("SFTP close on {} failed: {}", sftp.host(), e);
    }
}

/// Stat that treats a missing path as an error
async fn stat_existing(endpoint: &Endpoint) -> Result<FileStat, TransferError> {
    endpoint
        .fs()
        .stat(endpoint.path())
        .await
        .map_err(|e| TransferError::stat(endpoint.path(), e))?
        .ok_or_else(|| {
            TransferError::stat(
                endpoint.path(),
                io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            )
        })
}

/// Refuse a copy whose destination already is its source.
///
/// Only endpoints in one namespace can collide; a destination that does not
/// exist yet cannot be the source.
async fn ensure_distinct(src: &Endpoint, dst: &Endpoint) -> Result<(), TransferError> {
    if src.fs().namespace() != dst.fs().namespace() {
        return Ok(());
    }

    let dst_real = match dst.fs().canonicalize(dst.path()).await {
        Ok(real) => real,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(TransferError::stat(dst.path(), e)),
    };
    let src_real = src
        .fs()
        .canonicalize(src.path())
        .await
        .map_err(|e| TransferError::stat(src.path(), e))?;

    if src_real == dst_real {
        warn!("Refusing to copy {} onto itself", src_real);
        return Err(TransferError::SameFile { path: src_real });
    }
    Ok(())
}

/// Stream `src` into `dst`, counting bytes into `tracker`
async fn copy_stream(
    src: &Endpoint,
    dst: &Endpoint,
    tracker: &Arc<ProgressTracker>,
) -> Result<u64, TransferError> {
    if let Some(parent) = dst.fs().parent(dst.path()) {
        let parent_stat = dst
            .fs()
            .stat(&parent)
            .await
            .map_err(|e| TransferError::stat(&parent, e))?;
        if !matches!(parent_stat, Some(FileStat { is_dir: true, .. })) {
            return Err(TransferError::DestinationNotFound { path: parent });
        }
    }

    let mut reader = src
        .fs()
        .open_read(src.path())
        .await
        .map_err(|e| TransferError::open(src.path(), e))?;
    let writer = dst
        .fs()
        .create_file(dst.path())
        .await
        .map_err(|e| TransferError::open(dst.path(), e))?;
    let mut writer = ProgressWriter::new(writer, Arc::clone(tracker));

    let copied = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|e| TransferError::io(dst.path(), e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| TransferError::io(dst.path(), e))?;

    if copied == 0 {
        tracker.add(0);
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::test_support::{
        read_tree, remote_endpoint, write_tree, ConcurrencyProbe, FailingFs,
    };
    use tempfile::tempdir;

    fn engine(max_concurrent: usize, error_mode: ErrorMode) -> TransferEngine {
        TransferEngine::new(TransferConfig {
            max_concurrent,
            error_mode,
            show_progress: false,
        })
    }

    fn p(path: &std::path::Path) -> String {
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_copy_file_counts_bytes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![3u8; 70_000]).unwrap();

        let bytes = TransferEngine::default()
            .copy_file(
                &Endpoint::local(p(&dir.path().join("a.bin"))),
                &Endpoint::local(p(&dir.path().join("b.bin"))),
            )
            .await
            .unwrap();

        assert_eq!(bytes, 70_000);
        assert_eq!(
            std::fs::read(dir.path().join("b.bin")).unwrap(),
            vec![3u8; 70_000]
        );
    }

    #[tokio::test]
    async fn test_copy_empty_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();

        let report = engine(2, ErrorMode::FailFast)
            .transfer(
                &Endpoint::local(p(&dir.path().join("empty"))),
                &Endpoint::local(p(&dir.path().join("copy"))),
            )
            .await
            .unwrap();

        assert_eq!(report.bytes_copied, 0);
        assert_eq!(report.progress.unwrap().percent(), 100.0);
        assert!(dir.path().join("copy").exists());
    }

    #[tokio::test]
    async fn test_missing_destination_parent() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"data").unwrap();
        let dst = dir.path().join("missing").join("a.txt");

        let err = engine(2, ErrorMode::FailFast)
            .copy_file(&Endpoint::local(p(&dir.path().join("a.txt"))), &Endpoint::local(p(&dst)))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::DestinationNotFound { .. }), "{err}");
        assert_eq!(err.path(), Some(p(&dir.path().join("missing")).as_str()));
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn test_copy_file_rejects_directory_and_missing_source() {
        let dir = tempdir().unwrap();
        let engine = engine(2, ErrorMode::FailFast);
        let dst = Endpoint::local(p(&dir.path().join("out")));

        let err = engine
            .copy_file(&Endpoint::local(p(dir.path())), &dst)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotAFile { .. }));

        let err = engine
            .copy_file(&Endpoint::local(p(&dir.path().join("nope"))), &dst)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Stat { .. }));
    }

    #[tokio::test]
    async fn test_copy_directory_destination_checks() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        let engine = engine(2, ErrorMode::FailFast);
        let src = Endpoint::local(p(&dir.path().join("src")));

        let err = engine
            .copy_directory(&src, &Endpoint::local(p(&dir.path().join("absent"))))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::DestinationNotFound { .. }));

        let err = engine
            .copy_directory(&src, &Endpoint::local(p(&dir.path().join("file"))))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_directory_progress_matches_tree_size() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let size = write_tree(src.path(), 4, 5, 3000);

        let report = engine(4, ErrorMode::FailFast)
            .copy_directory(&Endpoint::local(p(src.path())), &Endpoint::local(p(dst.path())))
            .await
            .unwrap();

        let progress = report.progress.unwrap();
        assert_eq!(progress.total_bytes, size);
        assert_eq!(progress.transferred_bytes, size);
        assert_eq!(report.bytes_copied, size);
        assert_eq!(report.completed.len(), 20);

        let landed = dst.path().join(src.path().file_name().unwrap());
        assert_eq!(read_tree(src.path()), read_tree(&landed));
    }

    #[tokio::test]
    async fn test_round_trip_through_remote() {
        let local = tempdir().unwrap();
        let remote = tempdir().unwrap();
        let back = tempdir().unwrap();
        let tree = local.path().join("project");
        std::fs::create_dir(&tree).unwrap();
        write_tree(&tree, 3, 4, 700);
        std::fs::create_dir_all(tree.join("empty/nested")).unwrap();

        let engine = engine(3, ErrorMode::FailFast);
        // "~" on the remote side is the remote tempdir.
        let remote_root = remote_endpoint(remote.path(), "~");
        engine
            .transfer(&Endpoint::local(p(&tree)), &remote_root)
            .await
            .unwrap();
        engine
            .transfer(
                &remote_endpoint(remote.path(), "~/project"),
                &Endpoint::local(p(back.path())),
            )
            .await
            .unwrap();

        let returned = back.path().join("project");
        assert_eq!(read_tree(&tree), read_tree(&returned));
        assert!(returned.join("empty/nested").is_dir());
    }

    #[tokio::test]
    async fn test_file_into_existing_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("inbox")).unwrap();

        let report = engine(1, ErrorMode::FailFast)
            .transfer(
                &Endpoint::local(p(&dir.path().join("notes.txt"))),
                &Endpoint::local(p(&dir.path().join("inbox"))),
            )
            .await
            .unwrap();

        assert_eq!(
            report.completed[0].destination_path,
            p(&dir.path().join("inbox").join("notes.txt"))
        );
        assert_eq!(std::fs::read(dir.path().join("inbox/notes.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_concurrency_bounded_and_overlapping() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        // 5 directories, 3 levels deep at the bottom, 12 files each
        write_tree(src.path(), 5, 12, 512);
        let probe = ConcurrencyProbe::new();
        let cap = 4;

        let report = engine(cap, ErrorMode::FailFast)
            .copy_directory(
                &Endpoint::local(p(src.path())),
                &probe.endpoint(p(dst.path())),
            )
            .await
            .unwrap();

        assert_eq!(report.completed.len(), 60);
        let peak = probe.peak();
        assert!(peak > 1, "copies never overlapped");
        assert!(peak <= cap, "peak {peak} exceeded cap {cap}");
        let landed = dst.path().join(src.path().file_name().unwrap());
        assert_eq!(read_tree(src.path()), read_tree(&landed));
    }

    #[tokio::test]
    async fn test_fail_fast_returns_first_error() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_tree(src.path(), 2, 3, 100);
        std::fs::write(src.path().join("bad.bin"), b"unreadable").unwrap();

        let err = engine(2, ErrorMode::FailFast)
            .copy_directory(&FailingFs::endpoint(p(src.path()), "bad"), &Endpoint::local(p(dst.path())))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Open { .. }));
        assert!(err.path().unwrap().ends_with("bad.bin"));
    }

    #[tokio::test]
    async fn test_continue_on_error_collects_failures() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_tree(src.path(), 2, 3, 100);
        std::fs::write(src.path().join("bad.bin"), b"unreadable").unwrap();

        let report = engine(2, ErrorMode::ContinueOnError)
            .copy_directory(&FailingFs::endpoint(p(src.path()), "bad"), &Endpoint::local(p(dst.path())))
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("bad.bin"));
        assert_eq!(report.completed.len(), 6);
    }

    #[tokio::test]
    async fn test_file_into_own_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("data.bin"), &data).unwrap();

        let engine = engine(2, ErrorMode::FailFast);
        let err = engine
            .transfer(
                &Endpoint::local(p(&dir.path().join("data.bin"))),
                &Endpoint::local(p(dir.path())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SameFile { .. }), "{err}");
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), data);

        // Same node under a different spelling
        let winding = format!("{}/./data.bin", dir.path().display());
        let err = engine
            .copy_file(&Endpoint::local(p(&dir.path().join("data.bin"))), &Endpoint::local(winding))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SameFile { .. }), "{err}");
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_directory_into_own_parent_is_rejected() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("a");
        std::fs::create_dir(&tree).unwrap();
        write_tree(&tree, 2, 3, 400);
        let before = read_tree(&tree);

        let err = engine(2, ErrorMode::FailFast)
            .copy_directory(&Endpoint::local(p(&tree)), &Endpoint::local(p(dir.path())))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::SameFile { .. }), "{err}");
        assert_eq!(read_tree(&tree), before);
    }
}
