//! Issue ID helpers.
//!
//! IDs have the form `<prefix>-<n>` where `prefix` is a non-empty
//! lowercase token without a trailing hyphen and `n >= 1`. Prefixes may
//! themselves contain hyphens ("my-proj-12"), so parsing splits on the
//! *last* hyphen.

use crate::error::{BeadsError, Result};

/// Parse an ID into `(prefix, n)`.
///
/// # Errors
///
/// Returns `InvalidId` if the ID does not match `<prefix>-<n>`.
pub fn parse_id(id: &str) -> Result<(&str, u64)> {
    let (prefix, suffix) = id.rsplit_once('-').ok_or_else(|| BeadsError::InvalidId {
        id: id.to_string(),
    })?;

    let n: u64 = suffix.parse().map_err(|_| BeadsError::InvalidId {
        id: id.to_string(),
    })?;

    if n == 0 || !is_valid_prefix(prefix) {
        return Err(BeadsError::InvalidId {
            id: id.to_string(),
        });
    }

    Ok((prefix, n))
}

/// Split an ID into `(prefix, numeric_suffix)` without validating the
/// prefix shape. Returns `None` when there is no parseable numeric suffix.
#[must_use]
pub fn split_prefix(id: &str) -> Option<(&str, u64)> {
    let (prefix, suffix) = id.rsplit_once('-')?;
    let n: u64 = suffix.parse().ok()?;
    Some((prefix, n))
}

/// Format `<prefix>-<n>`.
#[must_use]
pub fn format_id(prefix: &str, n: u64) -> String {
    format!("{prefix}-{n}")
}

/// A workspace prefix is a non-empty lowercase token (letters, digits,
/// interior hyphens) with no leading or trailing hyphen.
#[must_use]
pub fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && !prefix.starts_with('-')
        && !prefix.ends_with('-')
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Sort key for deterministic, numeric-suffix-aware ID ordering.
///
/// IDs sort by prefix, then numerically by suffix; IDs without a numeric
/// suffix sort after all numbered IDs of the same prefix, by raw string.
#[must_use]
pub fn id_sort_key(id: &str) -> (String, u64, String) {
    match split_prefix(id) {
        Some((prefix, n)) => (prefix.to_string(), n, String::new()),
        None => (id.to_string(), u64::MAX, id.to_string()),
    }
}
