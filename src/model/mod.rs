//! Core data types for the beads store.
//!
//! This module defines the fundamental types used throughout the crate:
//! - `Issue` - The core work item
//! - `Status` - Issue lifecycle states
//! - `IssueType` - Categories of issues
//! - `Dependency` - Relationships between issues
//! - `Comment` - Issue comments
//! - `Event` - Audit log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Issue lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl Status {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
        }
    }

    /// Candidate statuses for ready work.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }

    /// A blocker in any of these states keeps its dependents blocked.
    #[must_use]
    pub const fn blocks_dependents(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "closed" => Ok(Self::Closed),
            other => Err(crate::error::BeadsError::InvalidStatus {
                status: other.to_string(),
            }),
        }
    }
}

/// Issue priority (0=Critical, 4=Backlog). Lower is more urgent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);
    pub const BACKLOG: Self = Self(4);

    /// # Errors
    ///
    /// Returns an error if the value is outside 0-4.
    pub fn new(value: i32) -> crate::error::Result<Self> {
        if (0..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(crate::error::BeadsError::InvalidPriority { priority: value })
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for Priority {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let val = s.strip_prefix('P').unwrap_or(&s);

        match val.parse::<i32>() {
            Ok(p) => Self::new(p),
            Err(_) => Err(crate::error::BeadsError::InvalidPriority {
                priority: val.parse().unwrap_or(-1),
            }),
        }
    }
}

/// Issue type category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    #[default]
    Task,
    Bug,
    Feature,
    Epic,
    Chore,
}

impl IssueType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Chore => "chore",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "epic" => Ok(Self::Epic),
            "chore" => Ok(Self::Chore),
            other => Err(crate::error::BeadsError::InvalidType {
                issue_type: other.to_string(),
            }),
        }
    }
}

/// Dependency relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    Related,
    ParentChild,
    DiscoveredFrom,
}

impl DependencyType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Related => "related",
            Self::ParentChild => "parent-child",
            Self::DiscoveredFrom => "discovered-from",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocks" => Ok(Self::Blocks),
            "related" => Ok(Self::Related),
            "parent-child" => Ok(Self::ParentChild),
            "discovered-from" => Ok(Self::DiscoveredFrom),
            other => Err(crate::error::BeadsError::InvalidDependencyType {
                dep_type: other.to_string(),
            }),
        }
    }
}

/// Audit event kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
    Commented,
    Closed,
    Reopened,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    Compacted,
}

impl EventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Commented => "commented",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Compacted => "compacted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_str(&value).map_err(serde::de::Error::custom)
    }
}

impl FromStr for EventType {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "status_changed" => Ok(Self::StatusChanged),
            "commented" => Ok(Self::Commented),
            "closed" => Ok(Self::Closed),
            "reopened" => Ok(Self::Reopened),
            "dependency_added" => Ok(Self::DependencyAdded),
            "dependency_removed" => Ok(Self::DependencyRemoved),
            "label_added" => Ok(Self::LabelAdded),
            "label_removed" => Ok(Self::LabelRemoved),
            "compacted" => Ok(Self::Compacted),
            other => Err(crate::error::BeadsError::validation(
                "event_type",
                format!("unknown event kind: {other}"),
            )),
        }
    }
}

/// The primary issue entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Unique ID in `<prefix>-<n>` form (e.g., "bd-42").
    pub id: String,

    /// Title (non-empty, up to 500 chars).
    pub title: String,

    /// Detailed description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Technical design notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,

    /// Acceptance criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,

    /// Additional notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Workflow status.
    #[serde(default)]
    pub status: Status,

    /// Priority (0=Critical, 4=Backlog).
    #[serde(default)]
    pub priority: Priority,

    /// Issue type (bug, feature, etc.).
    #[serde(default)]
    pub issue_type: IssueType,

    /// Assigned user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// External reference (e.g., JIRA-123).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Labels attached to this issue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Estimated effort in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,

    /// Closure timestamp. Set iff status is closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Reason recorded when the issue was closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    /// Outgoing dependency edges, embedded for export.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

impl Default for Issue {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: None,
            design: None,
            acceptance_criteria: None,
            notes: None,
            status: Status::default(),
            priority: Priority::default(),
            issue_type: IssueType::default(),
            assignee: None,
            external_ref: None,
            labels: Vec::new(),
            estimated_minutes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            close_reason: None,
            dependencies: Vec::new(),
        }
    }
}

/// Relationship between two issues. The edge points from the issue that
/// holds the dependency (`issue_id`) to the issue depended on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    /// The issue that has the dependency (source). Omitted in the
    /// embedded JSONL form, where the enclosing issue supplies it.
    #[serde(default, skip_serializing)]
    pub issue_id: String,

    /// The issue being depended on (target).
    pub depends_on_id: String,

    /// Type of dependency.
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    /// Creation timestamp.
    #[serde(default = "Utc::now", skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    #[must_use]
    pub fn new(issue_id: &str, depends_on_id: &str, dep_type: DependencyType) -> Self {
        Self {
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            dep_type,
            created_at: Utc::now(),
        }
    }
}

/// A comment on an issue. Only the indexed backend stores comments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub issue_id: String,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// An event in the issue's history (append-only audit log).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub issue_id: String,
    #[serde(rename = "kind")]
    pub event_type: EventType,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn new(issue_id: &str, event_type: EventType, actor: &str, payload: Option<String>) -> Self {
        Self {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: actor.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Epic completion status with child counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpicStatus {
    pub epic: Issue,
    pub total_children: usize,
    pub closed_children: usize,
    pub eligible_for_close: bool,
}

/// A blocked issue together with the issues blocking it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedIssue {
    pub issue: Issue,
    pub blockers: Vec<String>,
    pub blocker_count: usize,
}

/// One node of a dependency tree walk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeNode {
    pub id: String,
    pub depth: usize,
    /// Set when the walk stopped here because the depth cap was reached
    /// while outgoing edges remain.
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_issue() -> Issue {
        Issue {
            id: "bd-1".to_string(),
            title: "Sample".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ..Issue::default()
        }
    }

    #[test]
    fn status_roundtrip() {
        for s in [Status::Open, Status::InProgress, Status::Blocked, Status::Closed] {
            assert_eq!(s.as_str().parse::<Status>().unwrap(), s);
        }
        assert!("deferred".parse::<Status>().is_err());
    }

    #[test]
    fn status_active_and_blocking() {
        assert!(Status::Open.is_active());
        assert!(Status::InProgress.is_active());
        assert!(!Status::Blocked.is_active());
        assert!(!Status::Closed.is_active());

        assert!(Status::Open.blocks_dependents());
        assert!(Status::InProgress.blocks_dependents());
        assert!(Status::Blocked.blocks_dependents());
        assert!(!Status::Closed.blocks_dependents());
    }

    #[test]
    fn priority_bounds() {
        assert_eq!("P0".parse::<Priority>().unwrap(), Priority::CRITICAL);
        assert_eq!("3".parse::<Priority>().unwrap(), Priority::LOW);
        assert!("5".parse::<Priority>().is_err());
        assert!("-1".parse::<Priority>().is_err());
        assert!("high".parse::<Priority>().is_err());
    }

    #[test]
    fn priority_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Priority::MEDIUM).unwrap(), "2");
    }

    #[test]
    fn issue_type_rejects_unknown() {
        assert_eq!("epic".parse::<IssueType>().unwrap(), IssueType::Epic);
        assert!("docs".parse::<IssueType>().is_err());
    }

    #[test]
    fn dependency_type_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DependencyType::ParentChild).unwrap(),
            "\"parent-child\""
        );
        assert_eq!(
            "discovered-from".parse::<DependencyType>().unwrap(),
            DependencyType::DiscoveredFrom
        );
        assert!("waits-for".parse::<DependencyType>().is_err());
    }

    #[test]
    fn event_type_roundtrip() {
        let e: EventType = serde_json::from_str("\"status_changed\"").unwrap();
        assert_eq!(e, EventType::StatusChanged);
        assert!(serde_json::from_str::<EventType>("\"nonsense\"").is_err());
    }

    #[test]
    fn issue_omits_empty_optionals() {
        let json = serde_json::to_string(&sample_issue()).unwrap();
        assert!(json.contains("\"id\":\"bd-1\""));
        assert!(json.contains("\"status\":\"open\""));
        assert!(!json.contains("description"));
        assert!(!json.contains("closed_at"));
        assert!(!json.contains("labels"));
        assert!(!json.contains("dependencies"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn issue_deserialize_defaults_missing_fields() {
        let json = r#"{
            "id": "bd-7",
            "title": "Test issue",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.priority, Priority::MEDIUM);
        assert!(issue.labels.is_empty());
        assert!(issue.dependencies.is_empty());
    }

    #[test]
    fn dependency_embedded_form() {
        let mut issue = sample_issue();
        issue
            .dependencies
            .push(Dependency::new("bd-1", "bd-2", DependencyType::Blocks));
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"dependencies\":[{\"depends_on_id\":\"bd-2\",\"type\":\"blocks\"}]"));

        let parsed: Issue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dependencies.len(), 1);
        assert_eq!(parsed.dependencies[0].depends_on_id, "bd-2");
        assert_eq!(parsed.dependencies[0].dep_type, DependencyType::Blocks);
    }
}
