//! Filesystem primitives beneath the local mount point.
//!
//! The export is the only database this driver has: a volume exists exactly
//! when its directory does, a snapshot exactly when its archive does.
//! [`VolumeStore`] names the handful of operations the controller needs, with
//! every path relative to the store root.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::archive::TarArchiver;
use crate::error::CsiError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited with {status}: {output}", program.display())]
    Archive {
        program: PathBuf,
        status: String,
        output: String,
    },
}

impl StoreError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<StoreError> for CsiError {
    fn from(e: StoreError) -> Self {
        CsiError::internal(e)
    }
}

#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Whether anything exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool, StoreError>;

    /// Create the directory `path` with mode 0755.  Returns `false` when it
    /// already existed.
    async fn create_dir(&self, path: &Path) -> Result<bool, StoreError>;

    /// Remove `path` and everything below it.  A missing path is not an error.
    async fn remove_tree(&self, path: &Path) -> Result<(), StoreError>;

    /// Remove the single file `path`.  A missing file is an error.
    async fn remove_file(&self, path: &Path) -> Result<(), StoreError>;

    /// Archive the contents of `source_dir` into `archive`, returning the
    /// archive size in bytes.
    async fn write_archive(&self, source_dir: &Path, archive: &Path) -> Result<u64, StoreError>;

    /// Unpack `archive` into the existing directory `target_dir`.
    async fn read_archive(&self, archive: &Path, target_dir: &Path) -> Result<(), StoreError>;
}

/// [`VolumeStore`] on a locally mounted directory tree.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    archiver: TarArchiver,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, archiver: TarArchiver) -> Self {
        Self {
            root: root.into(),
            archiver,
        }
    }

    fn abs(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl VolumeStore for LocalStore {
    async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
        let full = self.abs(path);
        tokio::fs::try_exists(&full)
            .await
            .map_err(StoreError::io("stat", &full))
    }

    async fn create_dir(&self, path: &Path) -> Result<bool, StoreError> {
        let full = self.abs(path);
        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(0o755);
        match builder.create(&full).await {
            Ok(()) => {
                debug!(path = %full.display(), "directory created");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io("mkdir", &full)(e)),
        }
    }

    async fn remove_tree(&self, path: &Path) -> Result<(), StoreError> {
        let full = self.abs(path);
        match tokio::fs::remove_dir_all(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", &full)(e)),
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<(), StoreError> {
        let full = self.abs(path);
        tokio::fs::remove_file(&full)
            .await
            .map_err(StoreError::io("remove", &full))
    }

    async fn write_archive(&self, source_dir: &Path, archive: &Path) -> Result<u64, StoreError> {
        let source = self.abs(source_dir);
        let archive = self.abs(archive);
        self.archiver.create(&source, &archive).await?;
        let meta = tokio::fs::metadata(&archive)
            .await
            .map_err(StoreError::io("stat", &archive))?;
        Ok(meta.len())
    }

    async fn read_archive(&self, archive: &Path, target_dir: &Path) -> Result<(), StoreError> {
        self.archiver
            .extract(&self.abs(archive), &self.abs(target_dir))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> LocalStore {
        LocalStore::new(root, TarArchiver::new("tar"))
    }

    fn is_not_found(err: &StoreError) -> bool {
        matches!(err, StoreError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    #[tokio::test]
    async fn create_dir_reports_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.create_dir(Path::new("vol")).await.unwrap());
        assert!(!store.create_dir(Path::new("vol")).await.unwrap());
        assert!(store.exists(Path::new("vol")).await.unwrap());
        assert!(dir.path().join("vol").is_dir());
    }

    #[tokio::test]
    async fn create_dir_without_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path())
            .create_dir(Path::new("missing/vol"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn remove_tree_tolerates_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.remove_tree(Path::new("ghost")).await.unwrap();

        tokio::fs::create_dir_all(dir.path().join("vol/a/b")).await.unwrap();
        tokio::fs::write(dir.path().join("vol/a/b/f"), b"x").await.unwrap();
        store.remove_tree(Path::new("vol")).await.unwrap();
        assert!(!store.exists(Path::new("vol")).await.unwrap());
    }

    #[tokio::test]
    async fn remove_file_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path())
            .remove_file(Path::new("nope.tar.gz"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn archive_size_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        tokio::fs::create_dir(dir.path().join("vol")).await.unwrap();
        tokio::fs::write(dir.path().join("vol/f"), vec![7u8; 4096])
            .await
            .unwrap();

        let size = store
            .write_archive(Path::new("vol"), Path::new("vol.tar.gz"))
            .await
            .unwrap();
        let on_disk = std::fs::metadata(dir.path().join("vol.tar.gz")).unwrap().len();
        assert_eq!(size, on_disk);
        assert!(size > 0);
    }
}
