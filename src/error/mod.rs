//! Error types for the beads store.
//!
//! One variant family per error kind: validation, not-found, conflict,
//! lock timeout, unsupported backend feature, corruption, transport I/O,
//! and prefix mismatch, plus wrapped causes from the underlying crates.
//! Exit codes follow the bd convention: 0 success, 1 generic failure,
//! 2 not found, 3 validation, 4 conflict, 5 daemon/IO failure.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for store, graph, sync, and daemon operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Validation ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Multiple validation errors occurred.
    #[error("Validation errors: {errors:?}")]
    ValidationErrors { errors: Vec<ValidationError> },

    /// Issue ID format is invalid.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Invalid issue type value.
    #[error("Invalid issue type: {issue_type}")]
    InvalidType { issue_type: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    /// Invalid dependency type value.
    #[error("Invalid dependency type: {dep_type}")]
    InvalidDependencyType { dep_type: String },

    /// Unknown key in a field-map update.
    #[error("Unknown update field: {key}")]
    UnknownUpdateKey { key: String },

    /// Self-referential dependency.
    #[error("Issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    // === Not found ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Dependency edge target or source is missing.
    #[error("Dependency target not found: {id}")]
    DependencyTargetNotFound { id: String },

    // === Conflict ===
    /// Attempted to create an issue with an ID that already exists.
    #[error("Issue ID collision: {id}")]
    IdCollision { id: String },

    /// Another direct-mode writer holds the workspace lock.
    #[error("Concurrent writer detected: lock held at '{path}'")]
    ConcurrentWriter { path: PathBuf },

    // === Lock timeout ===
    /// The exploded backend could not acquire a file lock in time.
    #[error("Timed out acquiring lock for {id}")]
    LockTimeout { id: String },

    // === Unsupported ===
    /// Feature not available on the chosen backend.
    #[error("{feature} is not supported by the {backend} backend")]
    Unsupported { backend: String, feature: String },

    // === Corruption ===
    /// A store file could not be parsed.
    #[error("Store corruption in '{path}': {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// Database schema version is ahead of this build.
    #[error("Schema version mismatch: store has {found}, this build supports up to {supported}")]
    SchemaMismatch { found: i32, supported: i32 },

    /// Failed to parse a line in a JSONL file.
    #[error("JSONL parse error at line {line}: {reason}")]
    JsonlParse { line: usize, reason: String },

    // === Prefix mismatch ===
    /// Import saw issue IDs with foreign prefixes.
    #[error("Prefix mismatch: expected '{expected}', found {found:?}")]
    PrefixMismatch { expected: String, found: Vec<String> },

    // === Configuration / workspace ===
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Beads workspace not initialized.
    #[error("No .beads workspace found (run init first)")]
    NotInitialized,

    // === Transport / wrapped causes ===
    /// Daemon socket unavailable or RPC failed.
    #[error("Daemon unavailable: {reason}")]
    DaemonUnavailable { reason: String },

    /// RPC-level error returned by the daemon.
    #[error("RPC error [{code}]: {message}")]
    Rpc { code: String, message: String },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A single field validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl BeadsError {
    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create from multiple validation errors.
    #[must_use]
    pub fn from_validation_errors(errors: Vec<ValidationError>) -> Self {
        if errors.len() == 1 {
            let err = &errors[0];
            Self::Validation {
                field: err.field.clone(),
                reason: err.message.clone(),
            }
        } else {
            Self::ValidationErrors { errors }
        }
    }

    #[must_use]
    pub fn unsupported(backend: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            feature: feature.into(),
        }
    }

    /// Stable machine-readable code, used on the RPC wire.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. }
            | Self::ValidationErrors { .. }
            | Self::InvalidId { .. }
            | Self::InvalidStatus { .. }
            | Self::InvalidType { .. }
            | Self::InvalidPriority { .. }
            | Self::InvalidDependencyType { .. }
            | Self::UnknownUpdateKey { .. }
            | Self::SelfDependency { .. } => "validation",
            Self::IssueNotFound { .. } | Self::DependencyTargetNotFound { .. } => "not_found",
            Self::IdCollision { .. } | Self::ConcurrentWriter { .. } => "conflict",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Unsupported { .. } => "unsupported",
            Self::Corruption { .. } | Self::SchemaMismatch { .. } | Self::JsonlParse { .. } => {
                "corruption"
            }
            Self::PrefixMismatch { .. } => "prefix_mismatch",
            Self::Config(_) | Self::NotInitialized => "config",
            Self::DaemonUnavailable { .. } | Self::Rpc { .. } => "transport",
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Yaml(_) => "io",
        }
    }

    /// Exit code for CLI consumers that surface this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            // An error relayed over RPC keeps its original class.
            Self::Rpc { code, .. } => match code.as_str() {
                "validation" => 3,
                "not_found" => 2,
                "conflict" | "prefix_mismatch" => 4,
                _ => 5,
            },
            Self::IssueNotFound { .. } | Self::DependencyTargetNotFound { .. } => 2,
            Self::Validation { .. }
            | Self::ValidationErrors { .. }
            | Self::InvalidId { .. }
            | Self::InvalidStatus { .. }
            | Self::InvalidType { .. }
            | Self::InvalidPriority { .. }
            | Self::InvalidDependencyType { .. }
            | Self::UnknownUpdateKey { .. }
            | Self::SelfDependency { .. } => 3,
            Self::IdCollision { .. }
            | Self::ConcurrentWriter { .. }
            | Self::PrefixMismatch { .. } => 4,
            Self::LockTimeout { .. }
            | Self::DaemonUnavailable { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_) => 5,
            _ => 1,
        }
    }

    /// Rebuild an error from a wire code + message pair.
    #[must_use]
    pub fn from_wire(code: &str, message: &str) -> Self {
        match code {
            "not_found" => Self::IssueNotFound {
                id: message.to_string(),
            },
            "transport" => Self::DaemonUnavailable {
                reason: message.to_string(),
            },
            _ => Self::Rpc {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Result type using `BeadsError`.
pub type Result<T> = std::result::Result<T, BeadsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BeadsError::IssueNotFound {
            id: "bd-12".to_string(),
        };
        assert_eq!(err.to_string(), "Issue not found: bd-12");
    }

    #[test]
    fn test_validation_error() {
        let err = BeadsError::validation("title", "cannot be empty");
        assert_eq!(err.to_string(), "Validation failed: title: cannot be empty");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            BeadsError::IssueNotFound { id: "x".into() }.exit_code(),
            2
        );
        assert_eq!(BeadsError::IdCollision { id: "x".into() }.exit_code(), 4);
        assert_eq!(
            BeadsError::DaemonUnavailable {
                reason: "gone".into()
            }
            .exit_code(),
            5
        );
        assert_eq!(BeadsError::Config("bad".into()).exit_code(), 1);
    }

    #[test]
    fn test_unsupported_is_distinct() {
        let err = BeadsError::unsupported("markdown", "comments");
        assert_eq!(err.code(), "unsupported");
        assert_eq!(
            err.to_string(),
            "comments is not supported by the markdown backend"
        );
    }

    #[test]
    fn test_from_validation_errors_single() {
        let err = BeadsError::from_validation_errors(vec![ValidationError::new(
            "priority",
            "must be 0-4",
        )]);
        assert!(matches!(err, BeadsError::Validation { .. }));
    }

    #[test]
    fn test_wire_roundtrip() {
        let err = BeadsError::LockTimeout { id: "bd-3".into() };
        let rebuilt = BeadsError::from_wire(err.code(), "bd-3");
        assert_eq!(rebuilt.code(), "lock_timeout");
    }
}
