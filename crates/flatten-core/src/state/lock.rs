// # Pass Lock
//
// Mutual exclusion between reconciliation passes.
//
// Two overlapping passes against the same domain would each plan from
// their own snapshot and race on create/delete. The lock is an exclusive
// advisory lock on a lock file, held for the lifetime of `PassLock` and
// released by the OS when the file handle is closed, including when the
// process dies.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Error;

/// Exclusive lock held for the duration of one pass
#[derive(Debug)]
pub struct PassLock {
    path: PathBuf,
    file: File,
}

impl PassLock {
    /// Try to take the lock without waiting
    ///
    /// # Returns
    ///
    /// - `Ok(PassLock)`: the caller owns the pass until the lock is dropped
    /// - `Err(Error::PassInProgress)`: another pass holds the lock
    /// - `Err(Error::Io)`: the lock file could not be opened or locked
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(Error::PassInProgress(path)),
            Err(TryLockError::Error(e)) => return Err(Error::Io(e)),
        }

        // Owner pid is informational only; the lock itself is what matters.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!("Acquired pass lock {}", path.display());
        Ok(Self { path, file })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release pass lock {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("Released pass lock {}", self.path.display());
        }
    }
}
