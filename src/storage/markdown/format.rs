//! On-disk format for the exploded backend.
//!
//! Each issue is a Markdown file with a YAML front-matter header followed
//! by the long-form sections. Only non-empty fields and sections are
//! serialized, so files stay small and diffs stay readable.

use crate::error::{BeadsError, Result};
use crate::model::{Dependency, DependencyType, Issue};
use crate::util::time::parse_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Front-matter header for an issue file. `BTreeMap` keeps the
/// dependency map ordered for stable diffs.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frontmatter {
    pub title: String,
    pub status: String,
    pub priority: i32,
    pub issue_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub depends_on: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

/// Serialize an issue to its file content.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn issue_to_markdown(issue: &Issue) -> Result<String> {
    let fm = Frontmatter {
        title: issue.title.clone(),
        status: issue.status.to_string(),
        priority: issue.priority.0,
        issue_type: issue.issue_type.to_string(),
        assignee: issue.assignee.clone(),
        external_ref: issue.external_ref.clone(),
        labels: issue.labels.clone(),
        depends_on: issue
            .dependencies
            .iter()
            .map(|d| (d.depends_on_id.clone(), d.dep_type.to_string()))
            .collect(),
        estimated_minutes: issue.estimated_minutes,
        created_at: issue.created_at.to_rfc3339(),
        updated_at: issue.updated_at.to_rfc3339(),
        closed_at: issue.closed_at.map(|t| t.to_rfc3339()),
        close_reason: issue.close_reason.clone(),
    };

    let mut output = String::new();
    output.push_str("---\n");
    output.push_str(&serde_yaml::to_string(&fm)?);
    output.push_str("---\n");

    let sections = [
        ("Description", issue.description.as_deref()),
        ("Design", issue.design.as_deref()),
        ("Acceptance Criteria", issue.acceptance_criteria.as_deref()),
        ("Notes", issue.notes.as_deref()),
    ];
    for (heading, content) in sections {
        if let Some(content) = content {
            if !content.is_empty() {
                output.push_str("\n# ");
                output.push_str(heading);
                output.push_str("\n\n");
                output.push_str(&sanitize_section_content(content));
                output.push('\n');
            }
        }
    }

    Ok(output)
}

/// Demote H1 headers inside section content so they cannot be confused
/// with section boundaries on re-parse.
fn sanitize_section_content(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            if line.starts_with("# ") {
                format!("#{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a file's content back into an issue. The ID comes from the
/// filename, not the header.
///
/// # Errors
///
/// Returns `Corruption`-grade errors via `Yaml`/validation for a
/// malformed header, timestamps, or enum values.
pub fn markdown_to_issue(issue_id: &str, content: &str) -> Result<Issue> {
    let parts: Vec<&str> = content.splitn(3, "---\n").collect();
    if parts.len() < 3 {
        return Err(BeadsError::validation(
            "file",
            format!("{issue_id}: missing front-matter"),
        ));
    }

    let fm: Frontmatter = serde_yaml::from_str(parts[1])?;
    let (description, design, acceptance_criteria, notes) = parse_sections(parts[2]);

    let mut issue = Issue {
        id: issue_id.to_string(),
        title: fm.title,
        description,
        design,
        acceptance_criteria,
        notes,
        status: fm.status.parse()?,
        priority: crate::model::Priority::new(fm.priority)?,
        issue_type: fm.issue_type.parse()?,
        assignee: fm.assignee,
        external_ref: fm.external_ref,
        labels: fm.labels,
        estimated_minutes: fm.estimated_minutes,
        created_at: parse_timestamp(&fm.created_at, "created_at")?,
        updated_at: parse_timestamp(&fm.updated_at, "updated_at")?,
        closed_at: match fm.closed_at {
            Some(ref s) => Some(parse_timestamp(s, "closed_at")?),
            None => None,
        },
        close_reason: fm.close_reason,
        dependencies: Vec::new(),
    };

    for (depends_on_id, type_str) in fm.depends_on {
        let dep_type: DependencyType = type_str.parse()?;
        issue
            .dependencies
            .push(Dependency::new(issue_id, &depends_on_id, dep_type));
    }

    Ok(issue)
}

fn parse_sections(body: &str) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    let mut description = None;
    let mut design = None;
    let mut acceptance_criteria = None;
    let mut notes = None;

    let mut current_section = "";
    let mut current_content = String::new();

    let mut flush = |section: &str, content: &str| {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let value = Some(content.to_string());
        match section {
            "Description" => description = value,
            "Design" => design = value,
            "Acceptance Criteria" => acceptance_criteria = value,
            "Notes" => notes = value,
            _ => {}
        }
    };

    for line in body.lines() {
        if let Some(header) = line.trim().strip_prefix("# ") {
            if !current_section.is_empty() {
                flush(current_section, &current_content);
            }
            current_section = match header {
                "Description" => "Description",
                "Design" => "Design",
                "Acceptance Criteria" => "Acceptance Criteria",
                "Notes" => "Notes",
                _ => "",
            };
            current_content.clear();
        } else if !current_section.is_empty() {
            if !current_content.is_empty() {
                current_content.push('\n');
            }
            current_content.push_str(line);
        }
    }
    if !current_section.is_empty() {
        flush(current_section, &current_content);
    }

    (description, design, acceptance_criteria, notes)
}
