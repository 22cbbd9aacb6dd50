//! Per-target run lock.
//!
//! Two `mender` processes repairing the same target would overwrite each
//! other's fixes, so a run holds an exclusive advisory lock on
//! `<target>.mender.lock` for its whole duration.

use crate::error::{MenderError, Result};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock on a target, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock file path for `target`.
    #[must_use]
    pub fn path_for(target: &Path) -> PathBuf {
        let mut name = OsString::from(target.as_os_str());
        name.push(".mender.lock");
        PathBuf::from(name)
    }

    /// Try to take the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::Locked`] if another process holds it, or an
    /// I/O error if the lock file cannot be opened.
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = Self::path_for(target);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(MenderError::Locked {
                path: target.to_path_buf(),
            });
        }

        debug!("Acquired run lock {}", path.display());
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Keep the file: waiters may already hold a descriptor to it.
        let _ = FileExt::unlock(&self.file);
    }
}
