//! Daemon discovery: locate a workspace socket and validate it.
//!
//! Resolution order: the socket under `<cwd>/.beads`, then ancestor
//! directories, then a capped scan of common roots (home, /tmp, cwd)
//! skipping `.git`, `node_modules`, `vendor`, and hidden directories
//! other than `.beads`. A candidate only counts once a short-timeout
//! `status` probe answers.

use crate::config::{BEADS_DIR_NAME, SOCKET_FILE_NAME};
use crate::daemon::client::Client;
use crate::daemon::protocol::StatusInfo;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCAN_MAX_DEPTH: usize = 10;
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Socket path for a workspace whose `.beads` directory is known.
#[must_use]
pub fn workspace_socket(workspace: &Path) -> PathBuf {
    workspace.join(BEADS_DIR_NAME).join(SOCKET_FILE_NAME)
}

/// Probe a socket with a short timeout; `Ok` only for a live daemon
/// that passes the magic handshake.
///
/// # Errors
///
/// Returns `DaemonUnavailable` when nothing healthy answers.
pub fn probe(socket_path: &Path) -> Result<StatusInfo> {
    let mut client = Client::connect(socket_path, PROBE_TIMEOUT)?;
    client.handshake()?;
    client.status()
}

/// Find the daemon serving `start`: its own `.beads` socket first, then
/// ancestors, then the scan roots.
#[must_use]
pub fn discover(start: &Path) -> Option<PathBuf> {
    // Direct and ancestor lookups.
    let mut current = Some(start.to_path_buf());
    while let Some(dir) = current {
        let candidate = workspace_socket(&dir);
        if candidate.exists() && probe(&candidate).is_ok() {
            return Some(candidate);
        }
        current = dir.parent().map(Path::to_path_buf);
    }

    // Fall back to scanning common roots.
    let mut roots: Vec<PathBuf> = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        roots.push(PathBuf::from(home));
    }
    roots.push(PathBuf::from("/tmp"));
    roots.push(start.to_path_buf());

    for root in roots {
        let mut found = Vec::new();
        scan_dir(&root, 0, &mut found);
        for candidate in found {
            if probe(&candidate).is_ok() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Collect every socket under `root`, depth-capped, skipping trees that
/// cannot contain one.
fn scan_dir(root: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    if depth > SCAN_MAX_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if name.starts_with('.') && name != BEADS_DIR_NAME {
                continue;
            }
            if name == "node_modules" || name == "vendor" || name == ".git" {
                continue;
            }
            scan_dir(&entry.path(), depth + 1, found);
        } else if name == SOCKET_FILE_NAME
            && root.file_name().is_some_and(|d| d == BEADS_DIR_NAME)
        {
            found.push(entry.path());
        }
    }
}
