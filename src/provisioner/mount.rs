//! Bind mounts and filesystem statistics

use crate::domain::ports::MountManager;
use crate::error::{Error, Result};
use rustix::mount::{mount_bind, unmount, UnmountFlags};
use std::path::Path;
use tracing::debug;

/// Bind mounts through the mount syscalls
#[derive(Debug, Default, Clone, Copy)]
pub struct BindMounter;

impl MountManager for BindMounter {
    fn bind_mount(&self, path: &Path) -> Result<()> {
        mount_bind(path, path).map_err(|e| Error::Mount {
            path: path.display().to_string(),
            reason: std::io::Error::from(e).to_string(),
        })?;
        debug!(path = %path.display(), "Bind mounted");
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        unmount(path, UnmountFlags::empty()).map_err(|e| Error::Mount {
            path: path.display().to_string(),
            reason: std::io::Error::from(e).to_string(),
        })?;
        debug!(path = %path.display(), "Unmounted");
        Ok(())
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`
pub fn available_bytes(path: &Path) -> Result<u64> {
    let stat = rustix::fs::statvfs(path).map_err(|e| Error::FilesystemStats {
        path: path.display().to_string(),
        reason: std::io::Error::from(e).to_string(),
    })?;
    Ok(stat.f_bavail.saturating_mul(stat.f_bsize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_available_bytes_of_tempdir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(available_bytes(dir.path()).is_ok());
    }

    #[test]
    fn test_available_bytes_missing_path() {
        assert_matches!(
            available_bytes(Path::new("/nonexistent/storage")),
            Err(Error::FilesystemStats { .. })
        );
    }
}
