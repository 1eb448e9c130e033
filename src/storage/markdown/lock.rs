//! File-locking protocol for the exploded backend.
//!
//! The unit of mutation is a single issue file, and every transition is
//! an atomic rename so a crash at any point leaves a recoverable state:
//!
//! - unlocked:  `F` exists
//! - locked:    `F.lock.<pid>` exists (and `F` does not)
//! - preparing: `F.tmp.<pid>` exists alongside the lock
//! - garbage:   `F.trash.<pid>` left after commit
//!
//! Commit publishes the new content with `rename(tmp -> F)` and only then
//! retires the lock with `rename(lock -> trash)`. A crash between those
//! two renames leaves a stale lock next to the already-published file,
//! which the next acquire (or the startup sweep) clears.

use crate::error::{BeadsError, Result};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOCK_RETRY_WAIT: Duration = Duration::from_millis(100);

/// A held lock on one issue file. The pre-edit content lives in the lock
/// file until commit or abort.
#[derive(Debug)]
pub struct FileLock {
    issue_id: String,
    issue_path: PathBuf,
    lock_path: PathBuf,
    pid: u32,
}

impl FileLock {
    /// Acquire the lock for `issue_path` by renaming it to
    /// `<file>.lock.<pid>`.
    ///
    /// On contention: stale locks (dead holder) are broken by renaming
    /// them back; against a live holder we back off 100 ms and retry
    /// until the timeout, yielding to lower-PID holders so two fighting
    /// processes cannot livelock.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when neither the file nor any lock artifact
    /// exists; `LockTimeout` when the deadline passes.
    pub fn acquire(issue_id: &str, issue_path: &Path, timeout: Duration) -> Result<Self> {
        let pid = std::process::id();
        let lock_path = artifact_path(issue_path, "lock", pid);
        let deadline = Instant::now() + timeout;

        loop {
            match fs::rename(issue_path, &lock_path) {
                Ok(()) => {
                    return Ok(Self {
                        issue_id: issue_id.to_string(),
                        issue_path: issue_path.to_path_buf(),
                        lock_path,
                        pid,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let holders = find_lock_files(issue_path)?;
                    if holders.is_empty() {
                        return Err(BeadsError::IssueNotFound {
                            id: issue_id.to_string(),
                        });
                    }

                    if try_break_stale_locks(&holders) {
                        continue;
                    }

                    // A live holder with a lower PID has priority; wait.
                }
                Err(_) => {}
            }

            if Instant::now() >= deadline {
                return Err(BeadsError::LockTimeout {
                    id: issue_id.to_string(),
                });
            }
            thread::sleep(LOCK_RETRY_WAIT);
        }
    }

    /// Read the pre-edit content (held in the lock file).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be read.
    pub fn read_content(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.lock_path)?)
    }

    /// Publish `new_content` and release the lock.
    ///
    /// Steps: write `tmp.<pid>` + fsync, `rename(tmp -> F)` (the commit
    /// point), `rename(lock -> trash)`, best-effort trash removal.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the temp file cannot be written or the
    /// commit rename fails. A failure after the commit rename is not an
    /// error: the content is already published.
    pub fn commit(self, new_content: &str) -> Result<()> {
        let tmp_path = artifact_path(&self.issue_path, "tmp", self.pid);
        let trash_path = artifact_path(&self.issue_path, "trash", self.pid);

        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(new_content.as_bytes())?;
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &self.issue_path)?;

        // The lock file may already be gone if a sweeper raced us; the
        // commit itself has succeeded either way.
        let _ = fs::rename(&self.lock_path, &trash_path);
        let _ = fs::remove_file(&trash_path);
        Ok(())
    }

    /// Release the lock without publishing, restoring the original file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the restoring rename fails.
    pub fn abort(self) -> Result<()> {
        let tmp_path = artifact_path(&self.issue_path, "tmp", self.pid);
        let _ = fs::remove_file(&tmp_path);
        fs::rename(&self.lock_path, &self.issue_path)?;
        Ok(())
    }

    /// Delete the locked file instead of restoring it. Used by issue
    /// deletion, where the lock file holds the only remaining copy.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the removal fails.
    pub fn remove(self) -> Result<()> {
        fs::remove_file(&self.lock_path)?;
        Ok(())
    }

    #[must_use]
    pub fn issue_id(&self) -> &str {
        &self.issue_id
    }
}

/// Acquire locks for several files. Callers pass paths sorted by issue
/// ID; on any failure every lock already taken is released in reverse
/// order and the failure surfaces — no partial acquisition escapes.
///
/// # Errors
///
/// Propagates the first acquisition failure.
pub fn acquire_many(targets: &[(String, PathBuf)], timeout: Duration) -> Result<Vec<FileLock>> {
    let mut held: Vec<FileLock> = Vec::with_capacity(targets.len());

    for (issue_id, path) in targets {
        match FileLock::acquire(issue_id, path, timeout) {
            Ok(lock) => held.push(lock),
            Err(e) => {
                while let Some(lock) = held.pop() {
                    let _ = lock.abort();
                }
                return Err(e);
            }
        }
    }

    Ok(held)
}

/// Startup sweep: restore or remove artifacts left by dead processes.
///
/// - orphan `*.lock.<q>`: rename back to the base file (pre-edit copy)
/// - orphan `*.tmp.<q>`: remove
/// - orphan `*.trash.<q>`: remove
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be read.
pub fn sweep(issues_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(issues_dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let Some((kind, pid)) = parse_artifact_name(&name) else {
            continue;
        };
        if is_process_alive(pid) {
            continue;
        }

        match kind {
            "lock" => {
                if let Some(base) = base_path(&path, "lock", pid) {
                    let _ = fs::rename(&path, base);
                }
            }
            "tmp" | "trash" => {
                let _ = fs::remove_file(&path);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Check whether a process exists (signal 0).
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        true
    } else {
        std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

fn artifact_path(issue_path: &Path, kind: &str, pid: u32) -> PathBuf {
    let mut name = issue_path.as_os_str().to_os_string();
    name.push(format!(".{kind}.{pid}"));
    PathBuf::from(name)
}

/// `"bd-1.md.lock.4242"` -> `("lock", 4242)`.
fn parse_artifact_name(name: &str) -> Option<(&'static str, u32)> {
    let (rest, pid_str) = name.rsplit_once('.')?;
    let pid: u32 = pid_str.parse().ok()?;
    for kind in ["lock", "tmp", "trash"] {
        if rest.ends_with(&format!(".{kind}")) {
            return Some((match kind {
                "lock" => "lock",
                "tmp" => "tmp",
                _ => "trash",
            }, pid));
        }
    }
    None
}

/// Strip `.{kind}.{pid}` from an artifact path.
fn base_path(artifact: &Path, kind: &str, pid: u32) -> Option<PathBuf> {
    let name = artifact.file_name()?.to_string_lossy().to_string();
    let suffix = format!(".{kind}.{pid}");
    let base = name.strip_suffix(&suffix)?;
    Some(artifact.with_file_name(base))
}

fn find_lock_files(issue_path: &Path) -> Result<Vec<(PathBuf, u32)>> {
    let dir = issue_path.parent().ok_or_else(|| {
        BeadsError::Config(format!("issue path has no parent: {}", issue_path.display()))
    })?;
    let file_name = issue_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let prefix = format!("{file_name}.lock.");

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(pid_str) = name.strip_prefix(&prefix) {
            if let Ok(pid) = pid_str.parse::<u32>() {
                found.push((entry.path(), pid));
            }
        }
    }
    Ok(found)
}

/// Break locks whose holders are dead by renaming them back to the base
/// file. Returns true when at least one was broken.
fn try_break_stale_locks(holders: &[(PathBuf, u32)]) -> bool {
    let mut broke = false;
    for (lock_path, pid) in holders {
        if is_process_alive(*pid) {
            continue;
        }
        if let Some(base) = base_path(lock_path, "lock", *pid) {
            if fs::rename(lock_path, base).is_ok() {
                broke = true;
            }
        }
    }
    broke
}
