//! `SQLite` storage implementation (the indexed backend).

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, DependencyType, Event, EventType, Issue, Status,
};
use crate::storage::schema::apply_schema;
use crate::storage::{
    BackendKind, BatchCreateResult, IssueUpdate, ListFilters, Store, monotonic_now,
};
use crate::util::id as id_util;
use crate::validation;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const ISSUE_COLUMNS: &str = "id, title, description, design, acceptance_criteria, notes, \
     status, priority, issue_type, assignee, external_ref, estimated_minutes, \
     created_at, updated_at, closed_at, close_reason";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
    prefix: String,
}

/// Context for a mutation operation, tracking side effects that commit
/// together with the mutation: audit events and dirty-set rows.
pub struct MutationContext {
    pub actor: String,
    pub events: Vec<Event>,
    pub dirty_ids: HashSet<String>,
}

impl MutationContext {
    #[must_use]
    pub fn new(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: HashSet::new(),
        }
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, payload: Option<String>) {
        self.events
            .push(Event::new(issue_id, event_type, &self.actor, payload));
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }
}

impl SqliteStore {
    /// Open a connection to the database at the given path, creating and
    /// migrating the schema as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established, the
    /// schema is from a newer build, or migration fails.
    pub fn open(path: &Path, prefix: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(30_000))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            prefix: prefix.to_string(),
        })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory(prefix: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
            prefix: prefix.to_string(),
        })
    }

    /// Execute a mutation inside a transaction that also appends the
    /// collected events and dirty-set rows before commit.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the transaction is rolled back.
    pub fn mutate<F, R>(&mut self, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, kind, actor, payload, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.payload,
                    event.created_at.to_rfc3339()
                ],
            )?;
        }

        for id in &ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )?;
        }

        tx.commit()?;
        Ok(result)
    }

    fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
        let status: String = row.get("status")?;
        let issue_type: String = row.get("issue_type")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let closed_at: Option<String> = row.get("closed_at")?;

        Ok(Issue {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            design: row.get("design")?,
            acceptance_criteria: row.get("acceptance_criteria")?,
            notes: row.get("notes")?,
            status: status.parse().unwrap_or_default(),
            priority: crate::model::Priority(row.get("priority")?),
            issue_type: issue_type.parse().unwrap_or_default(),
            assignee: row.get("assignee")?,
            external_ref: row.get("external_ref")?,
            labels: Vec::new(),
            estimated_minutes: row.get("estimated_minutes")?,
            created_at: parse_dt(&created_at),
            updated_at: parse_dt(&updated_at),
            closed_at: closed_at.as_deref().map(parse_dt),
            close_reason: row.get("close_reason")?,
            dependencies: Vec::new(),
        })
    }

    fn insert_issue_row(tx: &Transaction, issue: &Issue) -> Result<()> {
        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO issues ({ISSUE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            rusqlite::params_from_iter(issue_params(issue)),
        )?;
        if inserted == 0 {
            return Err(BeadsError::IdCollision {
                id: issue.id.clone(),
            });
        }
        for label in &issue.labels {
            tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue.id, label],
            )?;
        }
        Ok(())
    }

    fn update_issue_row(tx: &Transaction, issue: &Issue) -> Result<()> {
        tx.execute(
            "UPDATE issues SET
                title = ?2, description = ?3, design = ?4, acceptance_criteria = ?5,
                notes = ?6, status = ?7, priority = ?8, issue_type = ?9, assignee = ?10,
                external_ref = ?11, estimated_minutes = ?12, created_at = ?13,
                updated_at = ?14, closed_at = ?15, close_reason = ?16
             WHERE id = ?1",
            rusqlite::params_from_iter(issue_params(issue)),
        )?;
        Ok(())
    }

    fn insert_dependency_row(tx: &Transaction, dep: &Dependency) -> Result<()> {
        // Duplicate (from, to) pairs collapse, keeping the newest type.
        tx.execute(
            "INSERT OR REPLACE INTO dependencies (issue_id, depends_on_id, type, created_at)
             VALUES (?, ?, ?, ?)",
            rusqlite::params![
                dep.issue_id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                dep.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn issue_exists_tx(tx: &Transaction, id: &str) -> Result<bool> {
        let exists: bool = tx
            .prepare("SELECT 1 FROM issues WHERE id = ?")
            .and_then(|mut stmt| stmt.exists([id]))?;
        Ok(exists)
    }

    /// Counter lazy-init: on the first request for a prefix, seed the
    /// counter from the max numeric suffix already present for it, then
    /// increment. Subsequent requests skip the scan.
    fn increment_counter_tx(tx: &Transaction, prefix: &str) -> Result<u64> {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT last_id FROM counters WHERE prefix = ?",
                [prefix],
                |row| row.get(0),
            )
            .optional()?;

        let last = match existing {
            Some(v) => v,
            None => {
                let seed = Self::max_suffix_for_prefix_tx(tx, prefix)?;
                tx.execute(
                    "INSERT INTO counters (prefix, last_id) VALUES (?, ?)",
                    rusqlite::params![prefix, seed],
                )?;
                seed
            }
        };

        let next = last + 1;
        tx.execute(
            "UPDATE counters SET last_id = ? WHERE prefix = ?",
            rusqlite::params![next, prefix],
        )?;
        Ok(u64::try_from(next).unwrap_or(0))
    }

    fn max_suffix_for_prefix_tx(tx: &Transaction, prefix: &str) -> Result<i64> {
        let like = format!("{prefix}-%");
        let mut stmt = tx.prepare("SELECT id FROM issues WHERE id LIKE ?")?;
        let ids = stmt.query_map([&like], |row| row.get::<_, String>(0))?;

        let mut max = 0_i64;
        for id in ids {
            let id = id?;
            if let Some((p, n)) = id_util::split_prefix(&id) {
                if p == prefix {
                    max = max.max(i64::try_from(n).unwrap_or(i64::MAX));
                }
            }
        }
        Ok(max)
    }

    fn populate_relations(&self, issues: &mut [Issue]) -> Result<()> {
        let mut labels: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY label")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, label) = row?;
            labels.entry(id).or_default().push(label);
        }

        let mut deps = self.all_dependency_records()?;

        for issue in issues.iter_mut() {
            issue.labels = labels.remove(&issue.id).unwrap_or_default();
            issue.dependencies = deps.remove(&issue.id).unwrap_or_default();
        }
        Ok(())
    }

    fn all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at FROM dependencies
             ORDER BY issue_id, depends_on_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for row in rows {
            let (issue_id, depends_on_id, dep_type, created_at) = row?;
            let Ok(dep_type) = dep_type.parse::<DependencyType>() else {
                continue;
            };
            map.entry(issue_id.clone()).or_default().push(Dependency {
                issue_id,
                depends_on_id,
                dep_type,
                created_at: parse_dt(&created_at),
            });
        }
        Ok(map)
    }

    fn issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        let mut issues = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(issue) = self.get_issue(id)? {
                issues.push(issue);
            }
        }
        Ok(issues)
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

    fn create_issue_tx(tx: &Transaction, ctx: &mut MutationContext, issue: &Issue) -> Result<()> {
        Self::insert_issue_row(tx, issue)?;

        for dep in &issue.dependencies {
            validation::validate_dependency(dep)?;
            if !Self::issue_exists_tx(tx, &dep.depends_on_id)? {
                return Err(BeadsError::DependencyTargetNotFound {
                    id: dep.depends_on_id.clone(),
                });
            }
            Self::insert_dependency_row(tx, dep)?;
        }

        ctx.record_event(
            EventType::Created,
            &issue.id,
            Some(format!("Created issue: {}", issue.title)),
        );
        ctx.mark_dirty(&issue.id);
        Ok(())
    }
}

impl Store for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn issue_prefix(&self) -> &str {
        &self.prefix
    }

    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<Issue> {
        let resolved = self.resolve_new_issue(issue)?;
        self.mutate(actor, |tx, ctx| Self::create_issue_tx(tx, ctx, &resolved))?;
        Ok(resolved)
    }

    /// The whole batch commits atomically: all issues or none.
    fn create_issues(&mut self, issues: &[Issue], actor: &str) -> Result<BatchCreateResult> {
        let mut resolved = Vec::with_capacity(issues.len());
        for issue in issues {
            resolved.push(self.resolve_new_issue(issue)?);
        }

        self.mutate(actor, |tx, ctx| {
            for issue in &resolved {
                Self::create_issue_tx(tx, ctx, issue)?;
            }
            Ok(())
        })?;

        Ok(BatchCreateResult {
            created: resolved.into_iter().map(|i| i.id).collect(),
            failed: Vec::new(),
        })
    }

    fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?");
        let mut stmt = self.conn.prepare(&sql)?;
        let result = stmt.query_row([id], |row| Self::issue_from_row(row));

        let mut issue = match result {
            Ok(issue) => issue,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        issue.labels = self.get_labels(id)?;
        issue.dependencies = self.get_dependency_records(id)?;
        Ok(Some(issue))
    }

    fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if updates.is_empty() {
            return Ok(issue);
        }

        let old_status = issue.status;
        let status_changed = updates.apply_to(&mut issue);
        validation::validate_issue(&issue)?;

        self.mutate(actor, |tx, ctx| {
            Self::update_issue_row(tx, &issue)?;

            ctx.record_event(EventType::Updated, id, None);
            if status_changed {
                ctx.record_event(
                    EventType::StatusChanged,
                    id,
                    Some(format!("{} -> {}", old_status, issue.status)),
                );
            }
            ctx.mark_dirty(id);
            Ok(())
        })?;

        Ok(issue)
    }

    /// Atomic rename: creates the issue under `new_id`, rewrites every
    /// dependency referencing `old_id` on either endpoint, re-points
    /// labels, comments, events, and the dirty marker, then deletes the
    /// old row. All in one transaction.
    fn update_issue_id(&mut self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        id_util::parse_id(new_id)?;

        let mut issue = self
            .get_issue(old_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: old_id.to_string(),
            })?;
        if self.get_issue(new_id)?.is_some() {
            return Err(BeadsError::IdCollision {
                id: new_id.to_string(),
            });
        }

        issue.id = new_id.to_string();
        issue.labels.clear();
        issue.dependencies.clear();
        issue.updated_at = monotonic_now(issue.updated_at);

        self.mutate(actor, |tx, ctx| {
            Self::insert_issue_row(tx, &issue)?;

            for table in ["labels", "comments", "events", "dirty_issues"] {
                tx.execute(
                    &format!("UPDATE {table} SET issue_id = ?1 WHERE issue_id = ?2"),
                    rusqlite::params![new_id, old_id],
                )?;
            }
            tx.execute(
                "UPDATE dependencies SET issue_id = ?1 WHERE issue_id = ?2",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute(
                "UPDATE dependencies SET depends_on_id = ?1 WHERE depends_on_id = ?2",
                rusqlite::params![new_id, old_id],
            )?;
            tx.execute("DELETE FROM issues WHERE id = ?", [old_id])?;

            ctx.record_event(
                EventType::Updated,
                new_id,
                Some(format!("Renamed from {old_id}")),
            );
            ctx.mark_dirty(new_id);
            Ok(())
        })
    }

    fn delete_issue(&mut self, id: &str, actor: &str) -> Result<()> {
        self.delete_issues(std::slice::from_ref(&id.to_string()), actor)
            .map(|_| ())
    }

    fn delete_issues(&mut self, ids: &[String], actor: &str) -> Result<usize> {
        for id in ids {
            if self.get_issue(id)?.is_none() {
                return Err(BeadsError::IssueNotFound { id: id.clone() });
            }
        }

        self.mutate(actor, |tx, _ctx| {
            let mut deleted = 0;
            for id in ids {
                tx.execute(
                    "DELETE FROM dependencies WHERE issue_id = ?1 OR depends_on_id = ?1",
                    [id],
                )?;
                tx.execute("DELETE FROM events WHERE issue_id = ?", [id])?;
                tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
                deleted += tx.execute("DELETE FROM issues WHERE id = ?", [id])?;
            }
            Ok(deleted)
        })
    }

    fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref statuses) = filters.statuses {
            let placeholders: Vec<&str> = statuses.iter().map(|_| "?").collect();
            let _ = write!(sql, " AND status IN ({})", placeholders.join(","));
            for s in statuses {
                params.push(Box::new(s.as_str().to_string()));
            }
        }
        if let Some(ref types) = filters.issue_types {
            let placeholders: Vec<&str> = types.iter().map(|_| "?").collect();
            let _ = write!(sql, " AND issue_type IN ({})", placeholders.join(","));
            for t in types {
                params.push(Box::new(t.as_str().to_string()));
            }
        }
        if let Some(ref priorities) = filters.priorities {
            let placeholders: Vec<&str> = priorities.iter().map(|_| "?").collect();
            let _ = write!(sql, " AND priority IN ({})", placeholders.join(","));
            for p in priorities {
                params.push(Box::new(p.0));
            }
        }
        if let Some(ref assignee) = filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if let Some(ref needle) = filters.title_contains {
            sql.push_str(" AND lower(title) LIKE ?");
            params.push(Box::new(format!("%{}%", needle.to_lowercase())));
        }

        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut issues: Vec<Issue> = stmt
            .query_map(params_refs.as_slice(), |row| Self::issue_from_row(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.populate_relations(&mut issues)?;

        // Label and ID-set filters need the populated relations.
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
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn close_issue(&mut self, id: &str, reason: &str, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        let old_status = issue.status;
        issue.status = Status::Closed;
        issue.closed_at = Some(Utc::now());
        issue.close_reason = if reason.is_empty() {
            None
        } else {
            Some(reason.to_string())
        };
        issue.updated_at = monotonic_now(issue.updated_at);

        self.mutate(actor, |tx, ctx| {
            Self::update_issue_row(tx, &issue)?;
            ctx.record_event(
                EventType::Closed,
                id,
                Some(if reason.is_empty() {
                    format!("{old_status} -> closed")
                } else {
                    format!("{old_status} -> closed: {reason}")
                }),
            );
            ctx.mark_dirty(id);
            Ok(())
        })?;

        Ok(issue)
    }

    fn reopen_issue(&mut self, id: &str, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        issue.status = Status::Open;
        issue.closed_at = None;
        issue.close_reason = None;
        issue.updated_at = monotonic_now(issue.updated_at);

        self.mutate(actor, |tx, ctx| {
            Self::update_issue_row(tx, &issue)?;
            ctx.record_event(EventType::Reopened, id, None);
            ctx.mark_dirty(id);
            Ok(())
        })?;

        Ok(issue)
    }

    fn create_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<()> {
        validation::validate_dependency(dep)?;

        self.mutate(actor, |tx, ctx| {
            for endpoint in [&dep.issue_id, &dep.depends_on_id] {
                if !Self::issue_exists_tx(tx, endpoint)? {
                    return Err(BeadsError::IssueNotFound {
                        id: endpoint.clone(),
                    });
                }
            }
            Self::insert_dependency_row(tx, dep)?;
            ctx.record_event(
                EventType::DependencyAdded,
                &dep.issue_id,
                Some(format!("{} {}", dep.dep_type, dep.depends_on_id)),
            );
            ctx.mark_dirty(&dep.issue_id);
            Ok(())
        })
    }

    fn delete_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        self.mutate(actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                rusqlite::params![issue_id, depends_on_id],
            )?;
            if removed == 0 {
                return Err(BeadsError::DependencyTargetNotFound {
                    id: depends_on_id.to_string(),
                });
            }
            ctx.record_event(
                EventType::DependencyRemoved,
                issue_id,
                Some(depends_on_id.to_string()),
            );
            ctx.mark_dirty(issue_id);
            Ok(())
        })
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let ids: Vec<String> = self
            .get_dependency_records(issue_id)?
            .into_iter()
            .map(|d| d.depends_on_id)
            .collect();
        self.issues_by_ids(&ids)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id FROM dependencies WHERE depends_on_id = ? ORDER BY issue_id",
        )?;
        let ids: Vec<String> = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.issues_by_ids(&ids)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at FROM dependencies
             WHERE issue_id = ? ORDER BY depends_on_id",
        )?;
        let rows = stmt.query_map([issue_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut deps = Vec::new();
        for row in rows {
            let (issue_id, depends_on_id, dep_type, created_at) = row?;
            let Ok(dep_type) = dep_type.parse::<DependencyType>() else {
                continue;
            };
            deps.push(Dependency {
                issue_id,
                depends_on_id,
                dep_type,
                created_at: parse_dt(&created_at),
            });
        }
        Ok(deps)
    }

    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        self.all_dependency_records()
    }

    fn rename_dependency_prefix(&mut self, old: &str, new: &str) -> Result<usize> {
        let old_like = format!("{old}-%");
        let tx = self.conn.transaction()?;
        let mut changed = 0;

        for column in ["issue_id", "depends_on_id"] {
            let mut stmt = tx.prepare(&format!(
                "SELECT DISTINCT {column} FROM dependencies WHERE {column} LIKE ?"
            ))?;
            let ids: Vec<String> = stmt
                .query_map([&old_like], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            for id in ids {
                let Some((p, n)) = id_util::split_prefix(&id) else {
                    continue;
                };
                if p != old {
                    continue;
                }
                let new_id = id_util::format_id(new, n);
                changed += tx.execute(
                    &format!("UPDATE dependencies SET {column} = ?1 WHERE {column} = ?2"),
                    rusqlite::params![new_id, id],
                )?;
            }
        }

        tx.commit()?;
        Ok(changed)
    }

    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        if self.get_issue(issue_id)?.is_none() {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        self.mutate(actor, |tx, ctx| {
            let added = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
            if added > 0 {
                ctx.record_event(EventType::LabelAdded, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(added > 0)
        })
    }

    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        self.mutate(actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM labels WHERE issue_id = ? AND label = ?",
                rusqlite::params![issue_id, label],
            )?;
            if removed > 0 {
                ctx.record_event(EventType::LabelRemoved, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(labels)
    }

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM labels WHERE label = ? ORDER BY issue_id")?;
        let ids: Vec<String> = stmt
            .query_map([label], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.issues_by_ids(&ids)
    }

    fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        if self.get_issue(issue_id)?.is_none() {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }

        let created_at = Utc::now();
        let id = self.mutate(author, |tx, ctx| {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![issue_id, author, text, created_at.to_rfc3339()],
            )?;
            let id = tx.last_insert_rowid();
            ctx.record_event(EventType::Commented, issue_id, None);
            ctx.mark_dirty(issue_id);
            Ok(id)
        })?;

        Ok(Comment {
            id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            text: text.to_string(),
            created_at,
        })
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments
             WHERE issue_id = ? ORDER BY created_at ASC, id ASC",
        )?;
        let comments = stmt
            .query_map([issue_id], |row| {
                let created_at: String = row.get(4)?;
                Ok(Comment {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    author: row.get(2)?,
                    text: row.get(3)?,
                    created_at: parse_dt(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn record_event(&mut self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (issue_id, kind, actor, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![
                event.issue_id,
                event.event_type.as_str(),
                event.actor,
                event.payload,
                event.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, kind, actor, payload, created_at FROM events
             WHERE issue_id = ? ORDER BY id ASC",
        )?;
        let mut events: Vec<Event> = stmt
            .query_map([issue_id], |row| {
                let kind: String = row.get(2)?;
                let created_at: String = row.get(5)?;
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, kind,
                    row.get::<_, String>(3)?, row.get::<_, Option<String>>(4)?, created_at))
            })?
            .filter_map(|row| {
                let (id, issue_id, kind, actor, payload, created_at) = row.ok()?;
                Some(Event {
                    id,
                    issue_id,
                    event_type: kind.parse().ok()?,
                    actor,
                    payload,
                    created_at: parse_dt(&created_at),
                })
            })
            .collect();

        if limit > 0 && events.len() > limit {
            events.drain(..events.len() - limit);
        }
        Ok(events)
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn delete_config(&mut self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM config WHERE key = ?", [key])?;
        Ok(removed > 0)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn increment_counter(&mut self, prefix: &str) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let next = Self::increment_counter_tx(&tx, prefix)?;
        tx.commit()?;
        Ok(next)
    }

    fn get_counter(&self, prefix: &str) -> Result<Option<u64>> {
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_id FROM counters WHERE prefix = ?",
                [prefix],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(|v| u64::try_from(v).unwrap_or(0)))
    }

    fn rename_counter_prefix(&mut self, old: &str, new: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE OR REPLACE counters SET prefix = ?1 WHERE prefix = ?2",
            rusqlite::params![new, old],
        )?;
        Ok(())
    }

    /// Re-seed every counter from the issues actually present so the next
    /// issued number is strictly greater than anything in the store.
    fn sync_all_counters(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("SELECT id FROM issues")?;
            let ids: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            let mut maxes: HashMap<String, i64> = HashMap::new();
            for id in ids {
                if let Some((p, n)) = id_util::split_prefix(&id) {
                    let n = i64::try_from(n).unwrap_or(i64::MAX);
                    let entry = maxes.entry(p.to_string()).or_insert(0);
                    *entry = (*entry).max(n);
                }
            }

            for (prefix, max) in maxes {
                tx.execute(
                    "INSERT INTO counters (prefix, last_id) VALUES (?1, ?2)
                     ON CONFLICT(prefix) DO UPDATE SET last_id = MAX(last_id, ?2)",
                    rusqlite::params![prefix, max],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_dirty_issues(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn clear_dirty_issues(&mut self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM dirty_issues", [])?;
        Ok(removed)
    }

    fn clear_dirty_issues_by_id(&mut self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn close(&mut self) -> Result<()> {
        self.conn.execute_batch("PRAGMA optimize")?;
        Ok(())
    }
}

/// Ordered to match [`ISSUE_COLUMNS`]; the `id` comes first so the same
/// vector serves both INSERT and numbered-parameter UPDATE statements.
fn issue_params(issue: &Issue) -> Vec<Box<dyn rusqlite::ToSql>> {
    vec![
        Box::new(issue.id.clone()),
        Box::new(issue.title.clone()),
        Box::new(issue.description.clone()),
        Box::new(issue.design.clone()),
        Box::new(issue.acceptance_criteria.clone()),
        Box::new(issue.notes.clone()),
        Box::new(issue.status.as_str()),
        Box::new(issue.priority.0),
        Box::new(issue.issue_type.as_str()),
        Box::new(issue.assignee.clone()),
        Box::new(issue.external_ref.clone()),
        Box::new(issue.estimated_minutes),
        Box::new(issue.created_at.to_rfc3339()),
        Box::new(issue.updated_at.to_rfc3339()),
        Box::new(issue.closed_at.map(|dt| dt.to_rfc3339())),
        Box::new(issue.close_reason.clone()),
    ]
}

fn parse_dt(s: &str) -> chrono::DateTime<Utc> {
    crate::util::time::parse_timestamp(s, "timestamp").unwrap_or_else(|_| Utc::now())
}
