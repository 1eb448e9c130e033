//! Storage backends for the beads store.
//!
//! One contract, two concrete backends: [`SqliteStore`] (single-file
//! relational, indexed) and [`MarkdownStore`] (one file per issue,
//! intended for version control). Backend selection happens once at
//! process start via [`open_store`]; everything above holds a
//! `Box<dyn Store>`.

pub mod markdown;
pub mod schema;
pub mod sqlite;

pub use markdown::MarkdownStore;
pub use sqlite::SqliteStore;

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, Event, Issue, IssueType, Priority, Status,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which backend a store value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Markdown,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Markdown => "markdown",
        }
    }
}

impl FromStr for BackendKind {
    type Err = BeadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "markdown" => Ok(Self::Markdown),
            other => Err(BeadsError::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// Filter options for listing issues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<Status>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_types: Option<Vec<IssueType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Vec<Priority>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// All of these labels must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels_all: Vec<String>,
    /// At least one of these labels must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels_any: Vec<String>,
    /// Restrict to this ID set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<HashSet<String>>,
    /// Case-insensitive title substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ListFilters {
    /// In-memory filter check shared by both backends for the parts not
    /// pushed down into SQL.
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(ref statuses) = self.statuses {
            if !statuses.contains(&issue.status) {
                return false;
            }
        }
        if let Some(ref types) = self.issue_types {
            if !types.contains(&issue.issue_type) {
                return false;
            }
        }
        if let Some(ref priorities) = self.priorities {
            if !priorities.contains(&issue.priority) {
                return false;
            }
        }
        if let Some(ref assignee) = self.assignee {
            if issue.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if !self.labels_all.is_empty()
            && !self.labels_all.iter().all(|l| issue.labels.contains(l))
        {
            return false;
        }
        if !self.labels_any.is_empty()
            && !self.labels_any.iter().any(|l| issue.labels.contains(l))
        {
            return false;
        }
        if let Some(ref ids) = self.ids {
            if !ids.contains(&issue.id) {
                return false;
            }
        }
        if let Some(ref needle) = self.title_contains {
            if !issue
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Fields to update on an issue. `Option<Option<T>>` distinguishes
/// "leave alone" from "clear".
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    pub estimated_minutes: Option<Option<i32>>,
}

impl IssueUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.external_ref.is_none()
            && self.estimated_minutes.is_none()
    }

    /// Build an update from a string-keyed field map (the RPC surface).
    /// Only the keys the data model defines are recognized; anything else
    /// is a validation error. A JSON `null` clears an optional field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUpdateKey` or a field-specific validation error.
    pub fn from_field_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        use serde_json::Value;

        fn text(field: &str, value: &Value) -> Result<String> {
            value
                .as_str()
                .map(ToString::to_string)
                .ok_or_else(|| BeadsError::validation(field, "expected a string"))
        }

        fn opt_text(field: &str, value: &Value) -> Result<Option<String>> {
            match value {
                Value::Null => Ok(None),
                Value::String(s) => Ok(Some(s.clone())),
                _ => Err(BeadsError::validation(field, "expected a string or null")),
            }
        }

        let mut update = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "title" => update.title = Some(text(key, value)?),
                "description" => update.description = Some(opt_text(key, value)?),
                "design" => update.design = Some(opt_text(key, value)?),
                "acceptance_criteria" => {
                    update.acceptance_criteria = Some(opt_text(key, value)?);
                }
                "notes" => update.notes = Some(opt_text(key, value)?),
                "status" => update.status = Some(text(key, value)?.parse()?),
                "priority" => {
                    let p = match value {
                        Value::Number(n) => Priority::new(
                            i32::try_from(n.as_i64().unwrap_or(-1))
                                .map_err(|_| BeadsError::InvalidPriority { priority: -1 })?,
                        )?,
                        Value::String(s) => s.parse()?,
                        _ => {
                            return Err(BeadsError::validation(
                                key,
                                "expected a number or string",
                            ))
                        }
                    };
                    update.priority = Some(p);
                }
                "issue_type" => update.issue_type = Some(text(key, value)?.parse()?),
                "assignee" => update.assignee = Some(opt_text(key, value)?),
                "external_ref" => update.external_ref = Some(opt_text(key, value)?),
                "estimated_minutes" => {
                    let v = match value {
                        Value::Null => None,
                        Value::Number(n) => Some(
                            i32::try_from(n.as_i64().unwrap_or(-1)).map_err(|_| {
                                BeadsError::validation(key, "out of range")
                            })?,
                        ),
                        _ => {
                            return Err(BeadsError::validation(
                                key,
                                "expected a number or null",
                            ))
                        }
                    };
                    update.estimated_minutes = Some(v);
                }
                other => {
                    return Err(BeadsError::UnknownUpdateKey {
                        key: other.to_string(),
                    })
                }
            }
        }

        Ok(update)
    }

    /// Apply this update to an in-memory issue, returning whether the
    /// status changed. Advances `updated_at` and maintains the
    /// `closed_at` <=> closed-status invariant.
    pub fn apply_to(&self, issue: &mut Issue) -> bool {
        if let Some(ref title) = self.title {
            issue.title.clone_from(title);
        }
        if let Some(ref v) = self.description {
            issue.description.clone_from(v);
        }
        if let Some(ref v) = self.design {
            issue.design.clone_from(v);
        }
        if let Some(ref v) = self.acceptance_criteria {
            issue.acceptance_criteria.clone_from(v);
        }
        if let Some(ref v) = self.notes {
            issue.notes.clone_from(v);
        }

        let mut status_changed = false;
        if let Some(status) = self.status {
            if issue.status != status {
                status_changed = true;
                issue.status = status;
                if status == Status::Closed {
                    issue.closed_at = Some(Utc::now());
                } else {
                    issue.closed_at = None;
                    issue.close_reason = None;
                }
            }
        }

        if let Some(priority) = self.priority {
            issue.priority = priority;
        }
        if let Some(issue_type) = self.issue_type {
            issue.issue_type = issue_type;
        }
        if let Some(ref v) = self.assignee {
            issue.assignee.clone_from(v);
        }
        if let Some(ref v) = self.external_ref {
            issue.external_ref.clone_from(v);
        }
        if let Some(v) = self.estimated_minutes {
            issue.estimated_minutes = v;
        }

        issue.updated_at = monotonic_now(issue.updated_at);
        status_changed
    }
}

/// `updated_at` must never move backwards, and never precede `created_at`.
#[must_use]
pub fn monotonic_now(prior: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prior {
        now
    } else {
        prior
    }
}

/// Outcome of a batch create on a backend without multi-file atomicity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCreateResult {
    pub created: Vec<String>,
    /// `(issue_id, error message)` for issues that failed. Always empty
    /// on the indexed backend, which applies batches atomically.
    pub failed: Vec<(String, String)>,
}

/// The storage contract both backends satisfy.
///
/// Mutations take `&mut self`; the daemon serializes callers. `GetIssue`
/// on a missing ID is `Ok(None)`, not an error.
pub trait Store: Send {
    fn backend(&self) -> BackendKind;

    /// Root path of the store (database file or exploded directory).
    fn path(&self) -> &Path;

    /// The workspace prefix auto-assigned IDs use.
    fn issue_prefix(&self) -> &str;

    // === Issues ===
    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<Issue>;
    fn create_issues(&mut self, issues: &[Issue], actor: &str) -> Result<BatchCreateResult>;
    fn get_issue(&self, id: &str) -> Result<Option<Issue>>;
    fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue>;
    fn update_issue_id(&mut self, old_id: &str, new_id: &str, actor: &str) -> Result<()>;
    fn delete_issue(&mut self, id: &str, actor: &str) -> Result<()>;
    fn delete_issues(&mut self, ids: &[String], actor: &str) -> Result<usize>;
    fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>>;
    fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>>;
    fn count_issues(&self) -> Result<usize>;
    fn close_issue(&mut self, id: &str, reason: &str, actor: &str) -> Result<Issue>;
    fn reopen_issue(&mut self, id: &str, actor: &str) -> Result<Issue>;

    // === Dependencies ===
    fn create_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<()>;
    fn delete_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()>;
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;
    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>>;
    fn rename_dependency_prefix(&mut self, old: &str, new: &str) -> Result<usize>;

    // === Labels ===
    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool>;
    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;
    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>>;

    // === Comments ===
    /// The exploded backend rejects comments with `Unsupported`.
    fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    // === Events ===
    fn record_event(&mut self, event: &Event) -> Result<()>;
    /// Most recent last. `limit == 0` means no limit.
    fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>>;

    // === Config / metadata ===
    fn get_config(&self, key: &str) -> Result<Option<String>>;
    fn set_config(&mut self, key: &str, value: &str) -> Result<()>;
    fn delete_config(&mut self, key: &str) -> Result<bool>;
    fn get_all_config(&self) -> Result<HashMap<String, String>>;
    fn get_metadata(&self, key: &str) -> Result<Option<String>>;
    fn set_metadata(&mut self, key: &str, value: &str) -> Result<()>;

    // === Counters ===
    fn increment_counter(&mut self, prefix: &str) -> Result<u64>;
    fn get_counter(&self, prefix: &str) -> Result<Option<u64>>;
    fn rename_counter_prefix(&mut self, old: &str, new: &str) -> Result<()>;
    fn sync_all_counters(&mut self) -> Result<()>;

    // === Dirty set ===
    fn get_dirty_issues(&self) -> Result<Vec<String>>;
    fn clear_dirty_issues(&mut self) -> Result<usize>;
    fn clear_dirty_issues_by_id(&mut self, ids: &[String]) -> Result<usize>;

    /// Flush and release resources. Called once at daemon shutdown.
    fn close(&mut self) -> Result<()>;
}

/// Metadata keys shared across backends.
pub mod meta_keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const BD_VERSION: &str = "bd_version";
    pub const LAST_IMPORT_HASH: &str = "last_import_hash";
}

/// Open the configured backend.
///
/// # Errors
///
/// Returns an error if the backing files cannot be opened or migrated.
pub fn open_store(
    backend: BackendKind,
    beads_dir: &Path,
    db_override: Option<&Path>,
    prefix: &str,
) -> Result<Box<dyn Store>> {
    match backend {
        BackendKind::Sqlite => {
            let db_path: PathBuf = db_override
                .map_or_else(|| beads_dir.join("beads.db"), Path::to_path_buf);
            Ok(Box::new(SqliteStore::open(&db_path, prefix)?))
        }
        BackendKind::Markdown => {
            let root = db_override
                .map_or_else(|| beads_dir.join("markdown_db"), Path::to_path_buf);
            Ok(Box::new(MarkdownStore::open(&root, prefix)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_map_rejects_unknown_keys() {
        let map = json!({"owner": "alice"});
        let err = IssueUpdate::from_field_map(map.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, BeadsError::UnknownUpdateKey { .. }));
    }

    #[test]
    fn field_map_parses_known_keys() {
        let map = json!({
            "title": "New title",
            "status": "in_progress",
            "priority": 1,
            "assignee": null,
            "estimated_minutes": 90
        });
        let update = IssueUpdate::from_field_map(map.as_object().unwrap()).unwrap();
        assert_eq!(update.title.as_deref(), Some("New title"));
        assert_eq!(update.status, Some(Status::InProgress));
        assert_eq!(update.priority, Some(Priority::HIGH));
        assert_eq!(update.assignee, Some(None));
        assert_eq!(update.estimated_minutes, Some(Some(90)));
    }

    #[test]
    fn field_map_rejects_bad_enum() {
        let map = json!({"status": "paused"});
        assert!(IssueUpdate::from_field_map(map.as_object().unwrap()).is_err());
    }

    #[test]
    fn apply_maintains_closed_at_invariant() {
        let mut issue = Issue {
            id: "bd-1".into(),
            title: "t".into(),
            ..Issue::default()
        };

        let close = IssueUpdate {
            status: Some(Status::Closed),
            ..IssueUpdate::default()
        };
        assert!(close.apply_to(&mut issue));
        assert!(issue.closed_at.is_some());

        let reopen = IssueUpdate {
            status: Some(Status::Open),
            ..IssueUpdate::default()
        };
        assert!(reopen.apply_to(&mut issue));
        assert!(issue.closed_at.is_none());
        assert!(issue.close_reason.is_none());
    }

    #[test]
    fn list_filters_match() {
        let mut issue = Issue {
            id: "bd-1".into(),
            title: "Fix the Parser".into(),
            assignee: Some("alice".into()),
            labels: vec!["backend".into(), "urgent".into()],
            ..Issue::default()
        };
        issue.status = Status::Open;

        let mut f = ListFilters::default();
        assert!(f.matches(&issue));

        f.title_contains = Some("parser".into());
        assert!(f.matches(&issue));

        f.labels_all = vec!["backend".into(), "urgent".into()];
        assert!(f.matches(&issue));

        f.labels_all = vec!["frontend".into()];
        assert!(!f.matches(&issue));
    }
}
