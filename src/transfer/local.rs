//! Local filesystem endpoint

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::fs::{BoxedReader, BoxedWriter, EndpointKind, FileStat, TransferFs, WalkEntry};
use crate::path_utils::{join_local_path, local_home, local_parent, HomeLookupError};

/// The machine this process runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl TransferFs for LocalFs {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Local
    }

    fn namespace(&self) -> String {
        "local".to_string()
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        let real = tokio::fs::canonicalize(path).await?;
        Ok(real.to_string_lossy().to_string())
    }

    async fn home_dir(&self) -> Result<String, HomeLookupError> {
        local_home()
    }

    async fn stat(&self, path: &str) -> io::Result<Option<FileStat>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(FileStat {
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn walk(&self, root: &str) -> io::Result<Vec<WalkEntry>> {
        let root = root.to_string();
        tokio::task::spawn_blocking(move || walk_blocking(&root))
            .await
            .map_err(io::Error::other)?
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        match tokio::fs::create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if tokio::fs::metadata(path).await?.is_dir() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn open_read(&self, path: &str) -> io::Result<BoxedReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::pin(file))
    }

    async fn create_file(&self, path: &str) -> io::Result<BoxedWriter> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::pin(file))
    }

    fn join(&self, base: &str, component: &str) -> String {
        join_local_path(base, component)
    }

    fn parent(&self, path: &str) -> Option<String> {
        local_parent(path)
    }
}

fn walk_blocking(root: &str) -> io::Result<Vec<WalkEntry>> {
    let root_path = Path::new(root);
    let mut entries = Vec::new();

    for entry in WalkDir::new(root_path)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root_path)
            .map_err(io::Error::other)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let (is_dir, size) = if entry.path_is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(target) if target.is_file() => (false, target.len()),
                _ => {
                    warn!("Skipping symlink {}", entry.path().display());
                    continue;
                }
            }
        } else if entry.file_type().is_dir() {
            (true, 0)
        } else {
            (false, entry.metadata().map_err(io::Error::from)?.len())
        };

        entries.push(WalkEntry {
            path: entry.path().to_string_lossy().to_string(),
            relative,
            is_dir,
            size,
        });
    }

    debug!("Walked {} entries under {}", entries.len(), root);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_walk_is_preorder_and_sized() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b/c")).unwrap();
        std::fs::write(root.join("a.txt"), b"hello").unwrap();
        std::fs::write(root.join("b/c/d.bin"), vec![7u8; 1000]).unwrap();

        let entries = LocalFs.walk(root.to_str().unwrap()).await.unwrap();
        let relative: Vec<_> = entries.iter().map(|e| e.relative.as_str()).collect();
        assert_eq!(relative, ["a.txt", "b", "b/c", "b/c/d.bin"]);

        let total: u64 = entries.iter().map(|e| e.size).sum();
        assert_eq!(total, 1005);
        assert!(entries[1].is_dir);
    }

    #[tokio::test]
    async fn test_stat_missing_and_create_dir_idempotent() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        let sub = sub.to_str().unwrap();

        assert_eq!(LocalFs.stat(sub).await.unwrap(), None);
        LocalFs.create_dir(sub).await.unwrap();
        LocalFs.create_dir(sub).await.unwrap();
        assert_eq!(
            LocalFs.stat(sub).await.unwrap(),
            Some(FileStat { is_dir: true, size: 0 })
        );
    }

    #[tokio::test]
    async fn test_create_dir_over_file_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(LocalFs.create_dir(file.to_str().unwrap()).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_does_not_descend_symlinks() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/data.txt"), b"payload").unwrap();
        std::os::unix::fs::symlink(root, root.join("sub/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("sub/data.txt"), root.join("alias.txt")).unwrap();
        std::os::unix::fs::symlink(root.join("gone"), root.join("dangling")).unwrap();

        let entries = LocalFs.walk(root.to_str().unwrap()).await.unwrap();
        let relative: Vec<_> = entries.iter().map(|e| e.relative.as_str()).collect();
        assert_eq!(relative, ["alias.txt", "sub", "sub/data.txt"]);
        assert_eq!(entries[0].size, 7);
        assert!(!entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_canonicalize_resolves_dot_segments() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let winding = format!("{}/a/../a", dir.path().display());

        let real = LocalFs.canonicalize(&winding).await.unwrap();
        let expected = std::fs::canonicalize(dir.path().join("a")).unwrap();
        assert_eq!(real, expected.to_string_lossy());

        let missing = format!("{}/nope", dir.path().display());
        let err = LocalFs.canonicalize(&missing).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
