//! SHA-256 hashing for the JSONL artifact.
//!
//! The export pipeline stores the hash of the canonical JSONL content in
//! `metadata.last_import_hash`; re-importing an unchanged file is a no-op.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Hex-encoded SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash a JSONL file line by line, normalizing line endings to LF so the
/// hash is stable across checkouts.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn jsonl_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    for line in reader.lines() {
        let line = line?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    Ok(format!("{:x}", hasher.finalize()))
}
