//! Snapshot archives produced by an external tar program.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::store::StoreError;

/// Runs a tar-compatible program to pack and unpack volume directories.
///
/// The child is spawned with `kill_on_drop`, so dropping the returned future
/// (deadline hit, forced stop) also kills the subprocess.
#[derive(Debug, Clone)]
pub struct TarArchiver {
    program: PathBuf,
}

impl TarArchiver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Pack the contents of `source` into the gzip archive `archive`.
    /// Entries are stored relative to `source`.
    pub async fn create(&self, source: &Path, archive: &Path) -> Result<(), StoreError> {
        self.run(&[
            OsStr::new("-zcpf"),
            archive.as_os_str(),
            OsStr::new("-C"),
            source.as_os_str(),
            OsStr::new("."),
        ])
        .await
    }

    /// Unpack `archive` into the existing directory `target`.
    pub async fn extract(&self, archive: &Path, target: &Path) -> Result<(), StoreError> {
        self.run(&[
            OsStr::new("-zxpf"),
            archive.as_os_str(),
            OsStr::new("-C"),
            target.as_os_str(),
        ])
        .await
    }

    async fn run(&self, args: &[&OsStr]) -> Result<(), StoreError> {
        debug!(program = %self.program.display(), ?args, "running archiver");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StoreError::Io {
                op: "spawn",
                path: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(StoreError::Archive {
            program: self.program.clone(),
            status: output.status.to_string(),
            output: combined.trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_extract_restores_contents() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        let target = dir.path().join("dst");
        tokio::fs::create_dir_all(source.join("nested")).await.unwrap();
        tokio::fs::create_dir(&target).await.unwrap();
        tokio::fs::write(source.join("nested/data.txt"), b"hello")
            .await
            .unwrap();

        let archiver = TarArchiver::new("tar");
        let archive = dir.path().join("snap.tar.gz");
        archiver.create(&source, &archive).await.unwrap();
        archiver.extract(&archive, &target).await.unwrap();

        let restored = tokio::fs::read(target.join("nested/data.txt")).await.unwrap();
        assert_eq!(restored, b"hello");
    }

    #[tokio::test]
    async fn failed_extraction_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not-an-archive.tar.gz");
        tokio::fs::write(&bogus, b"garbage").await.unwrap();

        let err = TarArchiver::new("tar")
            .extract(&bogus, dir.path())
            .await
            .unwrap_err();
        match err {
            StoreError::Archive { output, .. } => assert!(!output.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TarArchiver::new(dir.path().join("no-such-tar"))
            .create(dir.path(), &dir.path().join("x.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { op: "spawn", .. }));
    }
}
