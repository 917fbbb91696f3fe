//! Exclusive lock over an instance directory.
//!
//! Uses `fs2` advisory locks (flock on Unix, LockFileEx on Windows) on a
//! `LOCK` sentinel file, so a second node pointed at the same instance
//! directory fails fast instead of corrupting shared state. The lock is held
//! from node start until stop.

use crate::error::{NodeError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Name of the sentinel file inside the instance directory.
pub const LOCK_FILE: &str = "LOCK";

/// A held instance-directory lock. Released on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: Option<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock `instance_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::DatadirInUse` if another holder has the lock.
    pub fn acquire(instance_dir: &Path) -> Result<Self> {
        create_instance_dir(instance_dir)?;

        let path = instance_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| NodeError::io_with_path(e, &path))?;

        if let Err(e) = file.try_lock_exclusive() {
            debug!("Instance lock {} contended: {}", path.display(), e);
            return Err(NodeError::DatadirInUse {
                path: instance_dir.to_path_buf(),
            });
        }

        // The PID is informational only.
        if let Err(e) = write_pid(&mut file) {
            debug!("Failed to record PID in {}: {}", path.display(), e);
        }

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Path of the sentinel file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock. Idempotent; failures are logged only.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                error!("Can't release datadir lock {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_instance_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| NodeError::io_with_path(e, dir))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| NodeError::io_with_path(e, dir))?;
    }
    Ok(())
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}
