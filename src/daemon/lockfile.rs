//! Advisory daemon lock and PID file handling.
//!
//! `daemon.lock` prevents two writers from opening the store directly at
//! the same time: the daemon holds it for its lifetime, and direct-mode
//! callers take it around their mutation. The lock file contains the
//! holder's PID so a stale lock from a dead process can be reclaimed.

use crate::error::{BeadsError, Result};
use crate::storage::markdown::lock::is_process_alive;
use std::fs;
use std::path::{Path, PathBuf};

/// A held advisory lock; removed on drop.
#[derive(Debug)]
pub struct DaemonLock {
    path: PathBuf,
}

impl DaemonLock {
    /// Take the advisory lock, reclaiming it from a dead holder.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentWriter` when a live process holds the lock.
    pub fn acquire(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).unwrap_or_default();
            match content.trim().parse::<u32>() {
                Ok(pid) if is_process_alive(pid) && pid != std::process::id() => {
                    return Err(BeadsError::ConcurrentWriter {
                        path: path.to_path_buf(),
                    });
                }
                _ => {
                    tracing::debug!(path = %path.display(), "reclaiming stale daemon lock");
                    fs::remove_file(path)?;
                }
            }
        }

        fs::write(path, std::process::id().to_string())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Write the daemon PID file.
///
/// # Errors
///
/// Returns an I/O error if the write fails.
pub fn write_pid_file(path: &Path) -> Result<()> {
    fs::write(path, std::process::id().to_string())?;
    Ok(())
}

/// Read a PID file; `None` when absent or unparseable.
#[must_use]
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Best-effort removal of a runtime file.
pub fn remove_file_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}
