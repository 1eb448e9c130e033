//! Exploded-file storage backend: one Markdown file per issue.
//!
//! Layout under the backend root:
//!
//! ```text
//! <root>/issues/<id>.md       one file per issue
//! <root>/events/<id>.jsonl    append-only per-issue event log
//! <root>/config.yaml          store-visible config map
//! <root>/metadata.yaml        store-internal metadata map
//! ```
//!
//! Counters are derived from the filenames (the filesystem is the
//! counter); comments are unsupported. Multi-issue create applies
//! per-issue and reports partial failures rather than pretending to be
//! atomic.

pub mod format;
pub mod lock;

use crate::error::{BeadsError, Result};
use crate::model::{Comment, Dependency, Event, EventType, Issue, Status};
use crate::storage::{
    BackendKind, BatchCreateResult, IssueUpdate, ListFilters, Store, monotonic_now,
};
use crate::util::id as id_util;
use crate::validation;
use chrono::Utc;
use lock::{FileLock, LOCK_TIMEOUT};
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const ISSUE_EXT: &str = "md";

/// Markdown-file storage backend.
#[derive(Debug)]
pub struct MarkdownStore {
    root: PathBuf,
    issues_dir: PathBuf,
    events_dir: PathBuf,
    prefix: String,
    pid: u32,
}

impl MarkdownStore {
    /// Open (creating directories as needed) and run the startup sweep
    /// that clears lock/tmp/trash artifacts left by dead processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or read.
    pub fn open(root: &Path, prefix: &str) -> Result<Self> {
        let issues_dir = root.join("issues");
        let events_dir = root.join("events");
        fs::create_dir_all(&issues_dir)?;
        fs::create_dir_all(&events_dir)?;

        lock::sweep(&issues_dir)?;

        Ok(Self {
            root: root.to_path_buf(),
            issues_dir,
            events_dir,
            prefix: prefix.to_string(),
            pid: std::process::id(),
        })
    }

    fn issue_path(&self, id: &str) -> PathBuf {
        self.issues_dir.join(format!("{id}.{ISSUE_EXT}"))
    }

    fn events_path(&self, id: &str) -> PathBuf {
        self.events_dir.join(format!("{id}.jsonl"))
    }

    fn load_issue_file(&self, id: &str, path: &Path) -> Result<Issue> {
        let content = fs::read_to_string(path)?;
        format::markdown_to_issue(id, &content).map_err(|e| BeadsError::Corruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// All issues currently on disk. Lock/tmp/trash artifacts are
    /// skipped; a file that fails to parse fails the whole read, since a
    /// half-readable store must not silently lose issues.
    fn list_all(&self) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for entry in fs::read_dir(&self.issues_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id) = name.strip_suffix(&format!(".{ISSUE_EXT}")) else {
                continue;
            };
            issues.push(self.load_issue_file(id, &entry.path())?);
        }
        issues.sort_by_key(|i| id_util::id_sort_key(&i.id));
        Ok(issues)
    }

    /// Write a brand-new issue file: tmp + fsync + rename, never
    /// clobbering an existing file.
    fn write_new_file(&self, path: &Path, content: &str) -> Result<()> {
        let tmp = PathBuf::from(format!("{}.tmp.{}", path.display(), self.pid));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(content.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Lock an issue file, apply `f` to the parsed issue, and commit the
    /// result. Aborts (restoring the original) if `f` fails.
    fn with_locked_issue<F, R>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Issue) -> Result<R>,
    {
        let lock = FileLock::acquire(id, &self.issue_path(id), LOCK_TIMEOUT)?;
        let content = match lock.read_content() {
            Ok(c) => c,
            Err(e) => {
                let _ = lock.abort();
                return Err(e);
            }
        };

        let result = format::markdown_to_issue(id, &content).and_then(|mut issue| {
            let r = f(&mut issue)?;
            issue.updated_at = monotonic_now(issue.updated_at);
            let serialized = format::issue_to_markdown(&issue)?;
            Ok((r, serialized))
        });

        match result {
            Ok((r, serialized)) => {
                lock.commit(&serialized)?;
                Ok(r)
            }
            Err(e) => {
                let _ = lock.abort();
                Err(e)
            }
        }
    }

    fn append_event(&self, event: &Event) -> Result<()> {
        let path = self.events_path(&event.issue_id);
        let line = serde_json::to_string(event)?;
        let mut f = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    fn log_event(
        &self,
        issue_id: &str,
        event_type: EventType,
        actor: &str,
        payload: Option<String>,
    ) -> Result<()> {
        self.append_event(&Event::new(issue_id, event_type, actor, payload))
    }

    fn read_yaml_map(&self, path: &Path) -> Result<HashMap<String, String>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    fn write_yaml_map(&self, path: &Path, map: &HashMap<String, String>) -> Result<()> {
        let content = serde_yaml::to_string(map)?;
        let tmp = PathBuf::from(format!("{}.tmp.{}", path.display(), self.pid));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.yaml")
    }

    /// The filesystem is the counter: the max numeric suffix for a
    /// prefix among existing issue files.
    fn max_suffix_for_prefix(&self, prefix: &str) -> Result<Option<u64>> {
        let mut max: Option<u64> = None;
        for entry in fs::read_dir(&self.issues_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id) = name.strip_suffix(&format!(".{ISSUE_EXT}")) else {
                continue;
            };
            if let Some((p, n)) = id_util::split_prefix(id) {
                if p == prefix {
                    max = Some(max.map_or(n, |m| m.max(n)));
                }
            }
        }
        Ok(max)
    }

    fn resolve_new_issue(&mut self, issue: &Issue) -> Result<Issue> {
        validation::validate_issue(issue)?;

        let mut resolved = issue.clone();
        if resolved.id.is_empty() {
            let prefix = self.prefix.clone();
            let n = self.increment_counter(&prefix)?;
            resolved.id = id_util::format_id(&prefix, n);
        }
        for dep in &mut resolved.dependencies {
            dep.issue_id.clone_from(&resolved.id);
        }
        validation::validate_issue(&resolved)?;
        resolved.updated_at = monotonic_now(resolved.created_at);
        Ok(resolved)
    }

    fn create_one(&mut self, issue: &Issue, actor: &str) -> Result<Issue> {
        let resolved = self.resolve_new_issue(issue)?;

        let path = self.issue_path(&resolved.id);
        if path.exists() {
            return Err(BeadsError::IdCollision {
                id: resolved.id.clone(),
            });
        }

        for dep in &resolved.dependencies {
            validation::validate_dependency(dep)?;
            if !self.issue_path(&dep.depends_on_id).exists() {
                return Err(BeadsError::DependencyTargetNotFound {
                    id: dep.depends_on_id.clone(),
                });
            }
        }

        let content = format::issue_to_markdown(&resolved)?;
        self.write_new_file(&path, &content)?;

        self.log_event(
            &resolved.id,
            EventType::Created,
            actor,
            Some(format!("Created issue: {}", resolved.title)),
        )?;
        Ok(resolved)
    }

    /// Issues whose dependency map references any of `ids`.
    fn referencing_issues(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for issue in self.list_all()? {
            if ids.contains(&issue.id) {
                continue;
            }
            if issue
                .dependencies
                .iter()
                .any(|d| ids.contains(&d.depends_on_id))
            {
                out.push(issue.id);
            }
        }
        Ok(out)
    }

    fn lock_targets(&self, ids: &[String]) -> Vec<(String, PathBuf)> {
        let mut sorted: Vec<String> = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        sorted
            .into_iter()
            .map(|id| {
                let path = self.issue_path(&id);
                (id, path)
            })
            .collect()
    }
}

impl Store for MarkdownStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Markdown
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn issue_prefix(&self) -> &str {
        &self.prefix
    }

    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<Issue> {
        self.create_one(issue, actor)
    }

    /// Applies per-issue; earlier successes stay on disk when a later
    /// issue fails, and the failure list says which ones did not land.
    fn create_issues(&mut self, issues: &[Issue], actor: &str) -> Result<BatchCreateResult> {
        let mut result = BatchCreateResult::default();
        for issue in issues {
            match self.create_one(issue, actor) {
                Ok(created) => result.created.push(created.id),
                Err(e) => result.failed.push((issue.id.clone(), e.to_string())),
            }
        }
        Ok(result)
    }

    fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let path = self.issue_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.load_issue_file(id, &path)?))
    }

    fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        if updates.is_empty() {
            return self
                .get_issue(id)?
                .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() });
        }

        let mut status_note = None;
        self.with_locked_issue(id, |issue| {
            let old_status = issue.status;
            let status_changed = updates.apply_to(issue);
            validation::validate_issue(issue)?;
            if status_changed {
                status_note = Some(format!("{} -> {}", old_status, issue.status));
            }
            Ok(())
        })?;

        self.log_event(id, EventType::Updated, actor, None)?;
        if let Some(note) = status_note {
            self.log_event(id, EventType::StatusChanged, actor, Some(note))?;
        }

        self.get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })
    }

    /// Multi-file operation: locks the renamed issue and every issue
    /// referencing it (sorted, acquired in order, released in reverse via
    /// commit/abort). No partial apply on lock failure.
    fn update_issue_id(&mut self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        id_util::parse_id(new_id)?;

        if self.get_issue(old_id)?.is_none() {
            return Err(BeadsError::IssueNotFound {
                id: old_id.to_string(),
            });
        }
        if self.issue_path(new_id).exists() {
            return Err(BeadsError::IdCollision {
                id: new_id.to_string(),
            });
        }

        let dependents = self.referencing_issues(&[old_id.to_string()])?;
        let mut all_ids = dependents.clone();
        all_ids.push(old_id.to_string());
        let targets = self.lock_targets(&all_ids);

        let mut locks = lock::acquire_many(&targets, LOCK_TIMEOUT)?;

        // Everything is locked; apply the rename.
        let mut old_lock = None;
        let mut dependent_locks = Vec::new();
        while let Some(l) = locks.pop() {
            if l.issue_id() == old_id {
                old_lock = Some(l);
            } else {
                dependent_locks.push(l);
            }
        }
        let old_lock = old_lock.expect("old issue lock present");

        let apply = (|| -> Result<()> {
            let content = old_lock.read_content()?;
            let mut issue = format::markdown_to_issue(old_id, &content)?;
            issue.id = new_id.to_string();
            for dep in &mut issue.dependencies {
                dep.issue_id = new_id.to_string();
            }
            issue.updated_at = monotonic_now(issue.updated_at);
            let serialized = format::issue_to_markdown(&issue)?;
            self.write_new_file(&self.issue_path(new_id), &serialized)?;
            Ok(())
        })();

        if let Err(e) = apply {
            let _ = old_lock.abort();
            for l in dependent_locks {
                let _ = l.abort();
            }
            return Err(e);
        }

        for l in dependent_locks {
            let dep_id = l.issue_id().to_string();
            let content = match l.read_content() {
                Ok(c) => c,
                Err(e) => {
                    let _ = l.abort();
                    let _ = old_lock.remove();
                    return Err(e);
                }
            };
            let rewritten = format::markdown_to_issue(&dep_id, &content).and_then(|mut issue| {
                for dep in &mut issue.dependencies {
                    if dep.depends_on_id == old_id {
                        dep.depends_on_id = new_id.to_string();
                    }
                }
                issue.updated_at = monotonic_now(issue.updated_at);
                format::issue_to_markdown(&issue)
            });
            match rewritten {
                Ok(serialized) => l.commit(&serialized)?,
                Err(e) => {
                    let _ = l.abort();
                    let _ = old_lock.remove();
                    return Err(e);
                }
            }
        }

        old_lock.remove()?;

        // Carry the event history to the new ID.
        let old_events = self.events_path(old_id);
        if old_events.exists() {
            let _ = fs::rename(&old_events, self.events_path(new_id));
        }
        self.log_event(
            new_id,
            EventType::Updated,
            actor,
            Some(format!("Renamed from {old_id}")),
        )?;
        Ok(())
    }

    fn delete_issue(&mut self, id: &str, actor: &str) -> Result<()> {
        self.delete_issues(std::slice::from_ref(&id.to_string()), actor)
            .map(|_| ())
    }

    /// Multi-file operation: targets plus every issue holding an inbound
    /// edge are locked in sorted order before anything is applied.
    fn delete_issues(&mut self, ids: &[String], actor: &str) -> Result<usize> {
        let _ = actor;
        for id in ids {
            if self.get_issue(id)?.is_none() {
                return Err(BeadsError::IssueNotFound { id: id.clone() });
            }
        }

        let referencing = self.referencing_issues(ids)?;
        let mut all_ids: Vec<String> = ids.to_vec();
        all_ids.extend(referencing);
        let targets = self.lock_targets(&all_ids);

        let locks = lock::acquire_many(&targets, LOCK_TIMEOUT)?;

        let mut deleted = 0;
        for l in locks {
            let is_target = ids.contains(&l.issue_id().to_string());
            if is_target {
                let id = l.issue_id().to_string();
                l.remove()?;
                let _ = fs::remove_file(self.events_path(&id));
                deleted += 1;
            } else {
                let dep_id = l.issue_id().to_string();
                let content = l.read_content()?;
                let serialized =
                    format::markdown_to_issue(&dep_id, &content).and_then(|mut issue| {
                        issue
                            .dependencies
                            .retain(|d| !ids.contains(&d.depends_on_id));
                        issue.updated_at = monotonic_now(issue.updated_at);
                        format::issue_to_markdown(&issue)
                    })?;
                l.commit(&serialized)?;
            }
        }

        Ok(deleted)
    }

    fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut issues = self.list_all()?;
        issues.retain(|issue| filters.matches(issue));
        if let Some(limit) = filters.limit {
            if limit > 0 && issues.len() > limit {
                issues.truncate(limit);
            }
        }
        Ok(issues)
    }

    fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>> {
        let needle = query.to_lowercase();
        let mut issues = self.list_issues(&ListFilters {
            limit: None,
            ..filters.clone()
        })?;
        issues.retain(|issue| {
            issue.title.to_lowercase().contains(&needle)
                || issue
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        });
        if let Some(limit) = filters.limit {
            if limit > 0 && issues.len() > limit {
                issues.truncate(limit);
            }
        }
        Ok(issues)
    }

    fn count_issues(&self) -> Result<usize> {
        Ok(self.list_all()?.len())
    }

    fn close_issue(&mut self, id: &str, reason: &str, actor: &str) -> Result<Issue> {
        let old_status = self.with_locked_issue(id, |issue| {
            let old = issue.status;
            issue.status = Status::Closed;
            issue.closed_at = Some(Utc::now());
            issue.close_reason = if reason.is_empty() {
                None
            } else {
                Some(reason.to_string())
            };
            Ok(old)
        })?;

        self.log_event(
            id,
            EventType::Closed,
            actor,
            Some(if reason.is_empty() {
                format!("{old_status} -> closed")
            } else {
                format!("{old_status} -> closed: {reason}")
            }),
        )?;

        self.get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })
    }

    fn reopen_issue(&mut self, id: &str, actor: &str) -> Result<Issue> {
        self.with_locked_issue(id, |issue| {
            issue.status = Status::Open;
            issue.closed_at = None;
            issue.close_reason = None;
            Ok(())
        })?;

        self.log_event(id, EventType::Reopened, actor, None)?;
        self.get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })
    }

    fn create_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<()> {
        validation::validate_dependency(dep)?;
        if !self.issue_path(&dep.depends_on_id).exists() {
            return Err(BeadsError::IssueNotFound {
                id: dep.depends_on_id.clone(),
            });
        }

        let depends_on_id = dep.depends_on_id.clone();
        let dep_type = dep.dep_type;
        self.with_locked_issue(&dep.issue_id, |issue| {
            // Duplicate (from, to) pairs collapse to the newest type.
            issue.dependencies.retain(|d| d.depends_on_id != depends_on_id);
            issue
                .dependencies
                .push(Dependency::new(&issue.id, &depends_on_id, dep_type));
            Ok(())
        })?;

        self.log_event(
            &dep.issue_id,
            EventType::DependencyAdded,
            actor,
            Some(format!("{} {}", dep.dep_type, dep.depends_on_id)),
        )?;
        Ok(())
    }

    fn delete_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let removed = self.with_locked_issue(issue_id, |issue| {
            let before = issue.dependencies.len();
            issue.dependencies.retain(|d| d.depends_on_id != depends_on_id);
            Ok(before != issue.dependencies.len())
        })?;

        if !removed {
            return Err(BeadsError::DependencyTargetNotFound {
                id: depends_on_id.to_string(),
            });
        }
        self.log_event(
            issue_id,
            EventType::DependencyRemoved,
            actor,
            Some(depends_on_id.to_string()),
        )?;
        Ok(())
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let issue = self
            .get_issue(issue_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            })?;
        let mut out = Vec::new();
        for dep in &issue.dependencies {
            if let Some(target) = self.get_issue(&dep.depends_on_id)? {
                out.push(target);
            }
        }
        Ok(out)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let mut out = Vec::new();
        for issue in self.list_all()? {
            if issue
                .dependencies
                .iter()
                .any(|d| d.depends_on_id == issue_id)
            {
                out.push(issue);
            }
        }
        Ok(out)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        Ok(self
            .get_issue(issue_id)?
            .map(|i| i.dependencies)
            .unwrap_or_default())
    }

    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut map = HashMap::new();
        for issue in self.list_all()? {
            if !issue.dependencies.is_empty() {
                map.insert(issue.id.clone(), issue.dependencies);
            }
        }
        Ok(map)
    }

    fn rename_dependency_prefix(&mut self, old: &str, new: &str) -> Result<usize> {
        let rename_target = |id: &str| -> Option<String> {
            let (p, n) = id_util::split_prefix(id)?;
            (p == old).then(|| id_util::format_id(new, n))
        };

        let mut changed = 0;
        for issue in self.list_all()? {
            let needs_rewrite = issue
                .dependencies
                .iter()
                .any(|d| rename_target(&d.depends_on_id).is_some());
            if !needs_rewrite {
                continue;
            }
            let id = issue.id.clone();
            changed += self.with_locked_issue(&id, |issue| {
                let mut n = 0;
                for dep in &mut issue.dependencies {
                    if let Some(new_id) = rename_target(&dep.depends_on_id) {
                        dep.depends_on_id = new_id;
                        n += 1;
                    }
                }
                Ok(n)
            })?;
        }
        Ok(changed)
    }

    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let added = self.with_locked_issue(issue_id, |issue| {
            if issue.labels.iter().any(|l| l == label) {
                Ok(false)
            } else {
                issue.labels.push(label.to_string());
                issue.labels.sort();
                Ok(true)
            }
        })?;

        if added {
            self.log_event(issue_id, EventType::LabelAdded, actor, Some(label.to_string()))?;
        }
        Ok(added)
    }

    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let removed = self.with_locked_issue(issue_id, |issue| {
            let before = issue.labels.len();
            issue.labels.retain(|l| l != label);
            Ok(before != issue.labels.len())
        })?;

        if removed {
            self.log_event(
                issue_id,
                EventType::LabelRemoved,
                actor,
                Some(label.to_string()),
            )?;
        }
        Ok(removed)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        Ok(self
            .get_issue(issue_id)?
            .map(|i| i.labels)
            .unwrap_or_default())
    }

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>> {
        let mut issues = self.list_all()?;
        issues.retain(|i| i.labels.iter().any(|l| l == label));
        Ok(issues)
    }

    fn add_comment(&mut self, _issue_id: &str, _author: &str, _text: &str) -> Result<Comment> {
        Err(BeadsError::unsupported("markdown", "comments"))
    }

    fn get_comments(&self, _issue_id: &str) -> Result<Vec<Comment>> {
        Err(BeadsError::unsupported("markdown", "comments"))
    }

    fn record_event(&mut self, event: &Event) -> Result<()> {
        self.append_event(event)
    }

    fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>> {
        let path = self.events_path(issue_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut event: Event =
                serde_json::from_str(line).map_err(|e| BeadsError::Corruption {
                    path: path.clone(),
                    reason: format!("event line {}: {e}", idx + 1),
                })?;
            event.id = i64::try_from(idx).unwrap_or(i64::MAX) + 1;
            events.push(event);
        }

        if limit > 0 && events.len() > limit {
            events.drain(..events.len() - limit);
        }
        Ok(events)
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_yaml_map(&self.config_path())?.remove(key))
    }

    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.config_path();
        let mut map = self.read_yaml_map(&path)?;
        map.insert(key.to_string(), value.to_string());
        self.write_yaml_map(&path, &map)
    }

    fn delete_config(&mut self, key: &str) -> Result<bool> {
        let path = self.config_path();
        let mut map = self.read_yaml_map(&path)?;
        let removed = map.remove(key).is_some();
        if removed {
            self.write_yaml_map(&path, &map)?;
        }
        Ok(removed)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        self.read_yaml_map(&self.config_path())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_yaml_map(&self.metadata_path())?.remove(key))
    }

    fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.metadata_path();
        let mut map = self.read_yaml_map(&path)?;
        map.insert(key.to_string(), value.to_string());
        self.write_yaml_map(&path, &map)
    }

    /// Derived counter: `max(n) + 1` over `issues/<prefix>-*.md`. There
    /// is no counter file to get out of sync.
    fn increment_counter(&mut self, prefix: &str) -> Result<u64> {
        Ok(self.max_suffix_for_prefix(prefix)?.unwrap_or(0) + 1)
    }

    fn get_counter(&self, prefix: &str) -> Result<Option<u64>> {
        self.max_suffix_for_prefix(prefix)
    }

    fn rename_counter_prefix(&mut self, _old: &str, _new: &str) -> Result<()> {
        // Derived from filenames; nothing stored to rename.
        Ok(())
    }

    fn sync_all_counters(&mut self) -> Result<()> {
        // Always in sync by construction.
        Ok(())
    }

    /// Every issue is reported dirty: without a persistent marker the
    /// store cannot tell what changed since the last flush, and at this
    /// backend's scale a full re-export is cheap.
    fn get_dirty_issues(&self) -> Result<Vec<String>> {
        Ok(self.list_all()?.into_iter().map(|i| i.id).collect())
    }

    fn clear_dirty_issues(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn clear_dirty_issues_by_id(&mut self, _ids: &[String]) -> Result<usize> {
        Ok(0)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyType;

    fn store() -> (tempfile::TempDir, MarkdownStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = MarkdownStore::open(&dir.path().join("markdown_db"), "md").unwrap();
        (dir, s)
    }

    fn issue(id: &str, title: &str) -> Issue {
        Issue {
            id: id.to_string(),
            title: title.to_string(),
            ..Issue::default()
        }
    }

    #[test]
    fn create_and_get() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "first"), "t").unwrap();
        let got = s.get_issue("md-1").unwrap().expect("exists");
        assert_eq!(got.title, "first");
        assert!(s.get_issue("md-99").unwrap().is_none());
    }

    #[test]
    fn derived_counter_from_filenames() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-5", "five"), "t").unwrap();
        s.create_issue(&issue("md-10", "ten"), "t").unwrap();
        s.create_issue(&issue("md-15", "fifteen"), "t").unwrap();

        let a = s.create_issue(&issue("", "auto"), "t").unwrap();
        assert_eq!(a.id, "md-16");
        let b = s.create_issue(&issue("", "auto 2"), "t").unwrap();
        assert_eq!(b.id, "md-17");

        assert_eq!(s.get_counter("md").unwrap(), Some(17));
        assert_eq!(s.get_counter("zz").unwrap(), None);
    }

    #[test]
    fn update_with_lock_protocol() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "before"), "t").unwrap();

        let update = IssueUpdate {
            title: Some("after".to_string()),
            status: Some(Status::InProgress),
            ..IssueUpdate::default()
        };
        let updated = s.update_issue("md-1", &update, "t").unwrap();
        assert_eq!(updated.title, "after");
        assert_eq!(updated.status, Status::InProgress);

        // No lock artifacts remain.
        let leftovers: Vec<_> = fs::read_dir(&s.issues_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| !n.ends_with(".md"))
            .collect();
        assert!(leftovers.is_empty(), "leftovers: {leftovers:?}");
    }

    #[test]
    fn comments_are_unsupported() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "x"), "t").unwrap();
        let err = s.add_comment("md-1", "a", "text").unwrap_err();
        assert!(matches!(err, BeadsError::Unsupported { .. }));
        assert!(matches!(
            s.get_comments("md-1"),
            Err(BeadsError::Unsupported { .. })
        ));
    }

    #[test]
    fn events_append_to_jsonl() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "x"), "alice").unwrap();
        s.close_issue("md-1", "done", "alice").unwrap();

        let events = s.get_events("md-1", 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[1].event_type, EventType::Closed);

        let last = s.get_events("md-1", 1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].event_type, EventType::Closed);
    }

    #[test]
    fn rename_rewrites_dependents() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "P"), "t").unwrap();
        s.create_issue(&issue("md-2", "Q"), "t").unwrap();
        s.create_issue(&issue("md-3", "R"), "t").unwrap();
        s.create_dependency(&Dependency::new("md-1", "md-2", DependencyType::Blocks), "t")
            .unwrap();
        s.create_dependency(&Dependency::new("md-3", "md-2", DependencyType::Related), "t")
            .unwrap();

        s.update_issue_id("md-2", "md-20", "t").unwrap();

        assert!(s.get_issue("md-2").unwrap().is_none());
        assert!(s.get_issue("md-20").unwrap().is_some());

        let p = s.get_dependency_records("md-1").unwrap();
        assert_eq!(p[0].depends_on_id, "md-20");
        assert_eq!(p[0].dep_type, DependencyType::Blocks);

        let r = s.get_dependency_records("md-3").unwrap();
        assert_eq!(r[0].depends_on_id, "md-20");
        assert_eq!(r[0].dep_type, DependencyType::Related);
    }

    #[test]
    fn delete_removes_inbound_edges() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "a"), "t").unwrap();
        s.create_issue(&issue("md-2", "b"), "t").unwrap();
        s.create_dependency(&Dependency::new("md-2", "md-1", DependencyType::Blocks), "t")
            .unwrap();

        s.delete_issue("md-1", "t").unwrap();
        assert!(s.get_issue("md-1").unwrap().is_none());
        assert!(s.get_dependency_records("md-2").unwrap().is_empty());
    }

    #[test]
    fn batch_create_reports_partial_failures() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-2", "existing"), "t").unwrap();

        let batch = vec![issue("md-10", "ok"), issue("md-2", "collides")];
        let result = s.create_issues(&batch, "t").unwrap();
        assert_eq!(result.created, vec!["md-10".to_string()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].0, "md-2");

        // Unlike the indexed backend, the earlier success stays.
        assert!(s.get_issue("md-10").unwrap().is_some());
    }

    #[test]
    fn config_and_metadata_maps() {
        let (_dir, mut s) = store();
        assert_eq!(s.get_config("k").unwrap(), None);
        s.set_config("k", "v").unwrap();
        assert_eq!(s.get_config("k").unwrap(), Some("v".to_string()));
        assert!(s.delete_config("k").unwrap());
        assert!(!s.delete_config("k").unwrap());

        s.set_metadata("last_import_hash", "abc").unwrap();
        assert_eq!(
            s.get_metadata("last_import_hash").unwrap(),
            Some("abc".to_string())
        );
    }

    #[test]
    fn dirty_set_is_every_issue() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "a"), "t").unwrap();
        s.create_issue(&issue("md-2", "b"), "t").unwrap();
        let dirty = s.get_dirty_issues().unwrap();
        assert_eq!(dirty, vec!["md-1".to_string(), "md-2".to_string()]);
        assert_eq!(s.clear_dirty_issues().unwrap(), 0);
    }

    #[test]
    fn labels_roundtrip() {
        let (_dir, mut s) = store();
        s.create_issue(&issue("md-1", "l"), "t").unwrap();
        assert!(s.add_label("md-1", "x", "t").unwrap());
        assert!(!s.add_label("md-1", "x", "t").unwrap());
        assert_eq!(s.get_labels("md-1").unwrap(), vec!["x".to_string()]);
        assert_eq!(s.get_issues_by_label("x").unwrap().len(), 1);
        assert!(s.remove_label("md-1", "x", "t").unwrap());
    }

    #[test]
    fn startup_sweep_runs_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("markdown_db");
        let issues = root.join("issues");
        fs::create_dir_all(&issues).unwrap();

        let dead_pid = u32::MAX - 1;
        fs::write(issues.join(format!("md-1.md.lock.{dead_pid}")), "---\ntitle: T\nstatus: open\npriority: 2\nissue_type: task\ncreated_at: \"2026-01-01T00:00:00Z\"\nupdated_at: \"2026-01-01T00:00:00Z\"\n---\n").unwrap();
        fs::write(issues.join(format!("md-2.md.tmp.{dead_pid}")), "x").unwrap();

        let s = MarkdownStore::open(&root, "md").unwrap();
        assert!(s.get_issue("md-1").unwrap().is_some());
        assert!(!issues.join(format!("md-2.md.tmp.{dead_pid}")).exists());
    }
}
