//! Issue validation.
//!
//! Checks run before any store mutation: field constraints on the issue
//! itself plus edge-level rules (self-dependency rejection). ID format
//! rules live in [`crate::util::id`].

use crate::error::{BeadsError, Result, ValidationError};
use crate::model::{Dependency, Issue};
use crate::util::id;

pub const MAX_TITLE_LEN: usize = 500;

/// Validate an issue for create/import.
///
/// The ID may be empty (an empty ID requests auto-assignment); a
/// non-empty ID must parse as `<prefix>-<n>`.
///
/// # Errors
///
/// Returns `Validation`/`ValidationErrors` describing every failed field.
pub fn validate_issue(issue: &Issue) -> Result<()> {
    let mut errors = Vec::new();

    if !issue.id.is_empty() && id::parse_id(&issue.id).is_err() {
        errors.push(ValidationError::new(
            "id",
            format!("invalid ID format: {}", issue.id),
        ));
    }

    if issue.title.trim().is_empty() {
        errors.push(ValidationError::new("title", "cannot be empty"));
    } else if issue.title.len() > MAX_TITLE_LEN {
        errors.push(ValidationError::new(
            "title",
            format!("exceeds {MAX_TITLE_LEN} characters"),
        ));
    }

    if !(0..=4).contains(&issue.priority.0) {
        errors.push(ValidationError::new(
            "priority",
            format!("must be 0-4, got {}", issue.priority.0),
        ));
    }

    if let Some(minutes) = issue.estimated_minutes {
        if minutes < 0 {
            errors.push(ValidationError::new(
                "estimated_minutes",
                "cannot be negative",
            ));
        }
    }

    for dep in &issue.dependencies {
        if !issue.id.is_empty() && dep.depends_on_id == issue.id {
            errors.push(ValidationError::new(
                "dependencies",
                format!("self-dependency on {}", issue.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(BeadsError::from_validation_errors(errors))
    }
}

/// Validate a dependency edge before insertion.
///
/// # Errors
///
/// Returns `SelfDependency` for a self-edge and `InvalidId` for a
/// malformed endpoint.
pub fn validate_dependency(dep: &Dependency) -> Result<()> {
    if dep.issue_id == dep.depends_on_id {
        return Err(BeadsError::SelfDependency {
            id: dep.issue_id.clone(),
        });
    }
    id::parse_id(&dep.issue_id)?;
    id::parse_id(&dep.depends_on_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyType;

    #[test]
    fn accepts_minimal_issue() {
        let issue = Issue {
            id: "bd-1".to_string(),
            title: "ok".to_string(),
            ..Issue::default()
        };
        assert!(validate_issue(&issue).is_ok());
    }

    #[test]
    fn accepts_empty_id_for_auto_assignment() {
        let issue = Issue {
            title: "auto".to_string(),
            ..Issue::default()
        };
        assert!(validate_issue(&issue).is_ok());
    }

    #[test]
    fn rejects_empty_title() {
        let issue = Issue {
            id: "bd-1".to_string(),
            title: "   ".to_string(),
            ..Issue::default()
        };
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_oversized_title() {
        let issue = Issue {
            id: "bd-1".to_string(),
            title: "x".repeat(MAX_TITLE_LEN + 1),
            ..Issue::default()
        };
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_malformed_id() {
        let issue = Issue {
            id: "BD_1".to_string(),
            title: "bad id".to_string(),
            ..Issue::default()
        };
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_embedded_self_dependency() {
        let mut issue = Issue {
            id: "bd-1".to_string(),
            title: "self".to_string(),
            ..Issue::default()
        };
        issue
            .dependencies
            .push(Dependency::new("bd-1", "bd-1", DependencyType::Blocks));
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn dependency_self_edge() {
        let dep = Dependency::new("bd-1", "bd-1", DependencyType::Blocks);
        assert!(matches!(
            validate_dependency(&dep),
            Err(BeadsError::SelfDependency { .. })
        ));

        let dep = Dependency::new("bd-1", "bd-2", DependencyType::Related);
        assert!(validate_dependency(&dep).is_ok());
    }
}
