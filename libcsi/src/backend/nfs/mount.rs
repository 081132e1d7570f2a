//! NFS mount helpers shared by the controller bootstrap and the node service.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::config::DriverConfig;
use crate::error::CsiError;

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Whether `path` is listed as a mount point in `/proc/self/mounts`.
pub async fn is_mountpoint(path: &Path) -> bool {
    let contents = match tokio::fs::read_to_string(PROC_MOUNTS).await {
        Ok(c) => c,
        Err(_) => return false,
    };
    let Some(wanted) = path.to_str() else {
        return false;
    };
    let wanted = wanted.trim_end_matches('/');
    let wanted = if wanted.is_empty() { "/" } else { wanted };

    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    contents.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .is_some_and(|field| unescape_mount_field(field) == wanted)
    })
}

/// Undo the octal escapes (`\040` for space and friends) used in mount
/// tables.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'\\' && i + 3 < bytes.len())
            .then(|| &bytes[i + 1..=i + 3])
            .filter(|digits| digits.iter().all(|b| (b'0'..=b'7').contains(b)))
            .and_then(|digits| {
                let code = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                u8::try_from(code).ok()
            });
        match escaped {
            Some(byte) => {
                out.push(byte);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount `source` (`server:share`) on `target` with `mount -t nfs`.
pub async fn mount_nfs(source: &str, target: &Path, options: &[String]) -> Result<(), CsiError> {
    let mut cmd = Command::new("mount");
    cmd.arg("-t").arg("nfs");
    if !options.is_empty() {
        cmd.arg("-o").arg(options.join(","));
    }
    cmd.arg(source)
        .arg(target)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(?cmd, "mounting NFS export");
    let output = cmd
        .output()
        .await
        .map_err(|e| CsiError::Internal(format!("failed to run mount: {e}")))?;
    if !output.status.success() {
        return Err(CsiError::Internal(format!(
            "mount {source} on {} failed ({}): {}",
            target.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Detach the filesystem mounted at `target`.
pub async fn unmount(target: &Path) -> Result<(), CsiError> {
    let owned = target.to_path_buf();
    tokio::task::spawn_blocking(move || nix::mount::umount(&owned))
        .await
        .map_err(CsiError::internal)?
        .map_err(|e| CsiError::Internal(format!("umount {}: {e}", target.display())))
}

/// Make sure the export is mounted at the controller's local mount point.
///
/// Creates the mount point if needed and mounts `server:share` there unless
/// something is already mounted.  Without a configured server the mount is
/// skipped, leaving whatever directory is at the mount point in use.
pub async fn ensure_local_mount(config: &DriverConfig) -> Result<(), CsiError> {
    let mount_point = &config.local_mount_point;
    if !config
        .local_mount_options
        .split(',')
        .any(|opt| opt.trim() == "rw")
    {
        warn!("local mount options lack rw, volume creation may fail");
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o755);
    builder.create(mount_point).await.map_err(|e| {
        CsiError::Internal(format!(
            "failed to create local mount point {}: {e}",
            mount_point.display()
        ))
    })?;

    if is_mountpoint(mount_point).await {
        info!(path = %mount_point.display(), "local mount point already mounted");
        return Ok(());
    }
    if config.nfs_server.is_empty() {
        warn!(
            path = %mount_point.display(),
            "no NFS server configured, serving volumes from the local directory"
        );
        return Ok(());
    }

    let source = format!("{}:{}", config.nfs_server, config.nfs_share_point);
    let options: Vec<String> = config
        .local_mount_options
        .split(',')
        .map(str::trim)
        .filter(|opt| !opt.is_empty())
        .map(str::to_owned)
        .collect();
    info!(
        %source,
        target = %mount_point.display(),
        options = %config.local_mount_options,
        "mounting local NFS export"
    );
    mount_nfs(&source, mount_point, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescapes_octal_sequences() {
        assert_eq!(unescape_mount_field("/mnt/my\\040dir"), "/mnt/my dir");
        assert_eq!(unescape_mount_field("/plain"), "/plain");
        assert_eq!(unescape_mount_field("/trailing\\"), "/trailing\\");
    }

    #[tokio::test]
    async fn plain_directory_is_not_a_mountpoint() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("target");
        std::fs::create_dir(&sub).unwrap();
        assert!(!is_mountpoint(&sub).await);
    }

    #[tokio::test]
    async fn unmounting_a_plain_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = unmount(dir.path()).await.unwrap_err();
        let CsiError::Internal(msg) = err else {
            panic!("expected Internal");
        };
        assert!(msg.starts_with("umount "), "{msg}");
    }

    #[tokio::test]
    async fn bootstrap_without_server_only_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig {
            local_mount_point: dir.path().join("nfs/root"),
            ..Default::default()
        };
        ensure_local_mount(&config).await.unwrap();
        assert!(config.local_mount_point.is_dir());
    }
}
