//! Exclusive lock file deciding which process owns an endpoint.
//!
//! Uses the OS advisory lock (`flock` / `LockFileEx` via `fs2`), which the
//! kernel drops when the holder dies, so a crashed owner never blocks the
//! next launch. The file itself is left in place: deleting it while another
//! process waits on the old inode would let two processes lock two files.

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Ownership token for one endpoint.
///
/// Locked at most by one process at a time; held for as long as this handle
/// lives in the locked state.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    /// Create an unlocked handle for `path`. Touches nothing on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Try to take the lock, polling until `timeout` runs out.
    ///
    /// Returns immediately if this handle already holds it. On success the
    /// current PID and `owner_label` are written into the file.
    pub async fn try_lock_for(&mut self, timeout: Duration, owner_label: &str) -> Result<()> {
        if self.is_locked() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| GuardError::io_with_path(e, &self.path))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(GuardError::io_with_path(e, &self.path)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(GuardError::LockAcquireTimeout {
                    path: self.path.clone(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(GuardConfig::LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }

        if let Err(e) = write_owner_info(&file, owner_label) {
            debug!("Could not record owner in {}: {}", self.path.display(), e);
        }
        self.file = Some(file);
        Ok(())
    }

    /// Release the lock if held.
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                debug!("Unlock of {} failed: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_owner_info(mut file: &File, owner_label: &str) -> std::io::Result<()> {
    file.set_len(0)?;
    write!(file, "{}\n{}\n", std::process::id(), owner_label)?;
    file.flush()
}

/// PID recorded by the current (or last) owner of a lock file.
///
/// `None` on Windows while the lock is held: the mandatory range lock
/// rejects reads through any other handle.
pub fn read_owner_pid(path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.lines().next()?.trim().parse().ok()
}
