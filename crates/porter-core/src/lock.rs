//! Advisory lock guarding a migration run.
//!
//! One migration may write into an assets directory at a time. The lock is
//! an OS-level advisory file lock scoped to the [`MigrationLock`] value, so
//! it is released on every exit path — normal completion, an error return,
//! or a panic unwinding the orchestrator — when the guard drops. A second
//! process (or a second orchestrator in this process) attempting to acquire
//! it gets [`Error::Locked`] immediately rather than blocking.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

const LOCK_FILE_NAME: &str = ".porter-migration.lock";

/// RAII guard over an exclusive migration lock for one assets directory.
#[derive(Debug)]
pub struct MigrationLock {
    file: File,
}

impl MigrationLock {
    /// Acquires the lock for `assets_dir`, creating the directory and lock
    /// file as needed. Fails fast with [`Error::Locked`] if another run
    /// holds it.
    pub fn acquire(assets_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(assets_dir)
            .map_err(|e| Error::Storage(format!("cannot create assets dir: {e}")))?;
        let path = assets_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("cannot open lock file: {e}")))?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Locked(assets_dir.display().to_string()))?;
        debug!(path = %path.display(), "migration lock acquired");
        Ok(Self { file })
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        // Dropping the file would release the OS lock anyway; unlocking
        // explicitly keeps the release visible and immediate.
        let _ = fs2::FileExt::unlock(&self.file);
        debug!("migration lock released");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let held = MigrationLock::acquire(dir.path()).unwrap();
        assert!(matches!(
            MigrationLock::acquire(dir.path()),
            Err(Error::Locked(_))
        ));
        drop(held);
        assert!(MigrationLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_lock_released_on_drop_even_after_error_path() {
        let dir = TempDir::new().unwrap();
        {
            let _guard = MigrationLock::acquire(dir.path()).unwrap();
            // Simulated error path: the guard drops with the scope.
        }
        assert!(MigrationLock::acquire(dir.path()).is_ok());
    }
}
