//! Export / import pipeline for the canonical JSONL artifact.
//!
//! `issues.jsonl` is the version-controlled source of truth that travels
//! through git: one JSON object per issue, UTF-8, LF-terminated, sorted
//! by numeric ID suffix for deterministic diffs, dependencies embedded.
//!
//! Export writes through a temp file in the same directory (fsync +
//! rename) and records the content hash in `metadata.last_import_hash`
//! so re-importing an unchanged file is a no-op. Import plans first and
//! applies second, which is also how dry-run works: the plan is computed
//! against a read-only view and simply not applied.

use crate::error::{BeadsError, Result};
use crate::model::{Dependency, Issue};
use crate::storage::{meta_keys, IssueUpdate, ListFilters, Store};
use crate::util::hash::jsonl_file_hash;
use crate::util::id as id_util;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Result of an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub exported_count: usize,
    pub exported_ids: Vec<String>,
    /// SHA-256 of the written content, recorded as `last_import_hash`.
    pub content_hash: String,
}

/// Options controlling the import pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Remap colliding input issues to fresh IDs instead of updating.
    #[serde(default)]
    pub resolve_collisions: bool,
    /// Plan everything, mutate nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Never update existing issues; count them as skipped.
    #[serde(default)]
    pub skip_update: bool,
    /// Escalate prefix mismatches and dropped edges to errors.
    #[serde(default)]
    pub strict: bool,
    /// Remap foreign-prefix input IDs onto the configured prefix.
    #[serde(default)]
    pub rename_on_import: bool,
    /// Skip the prefix check entirely.
    #[serde(default)]
    pub skip_prefix_validation: bool,
}

/// Result of an import run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub collisions: usize,
    /// Input ID -> ID actually used in the store.
    pub id_mapping: HashMap<String, String>,
    pub collision_ids: Vec<String>,
    /// Number of input issues whose prefix did not match.
    pub prefix_mismatch: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_prefix: Option<String>,
    pub mismatch_prefixes: Vec<String>,
}

/// All issues in canonical export order, relations populated.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn export_issues(store: &dyn Store) -> Result<Vec<Issue>> {
    let mut issues = store.list_issues(&ListFilters::default())?;
    issues.sort_by_key(|i| id_util::id_sort_key(&i.id));
    Ok(issues)
}

/// Count non-blank lines of an existing JSONL file; 0 if absent.
fn count_jsonl_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Export the full store to `output_path` and record the content hash in
/// store metadata.
///
/// Refuses to overwrite a non-empty artifact from an empty store unless
/// `force` is set, since that is almost always a missing-import mistake
/// rather than an intentional wipe.
///
/// # Errors
///
/// Returns an error on store read failure, the empty-store guard, or
/// file I/O failure.
pub fn export_to_jsonl(
    store: &mut dyn Store,
    output_path: &Path,
    force: bool,
) -> Result<ExportResult> {
    let issues = export_issues(&*store)?;

    if issues.is_empty() && !force {
        let existing = count_jsonl_lines(output_path)?;
        if existing > 0 {
            return Err(BeadsError::Config(format!(
                "refusing to export an empty store over {existing} issues in {}; \
                 import first or pass force",
                output_path.display()
            )));
        }
    }

    let parent = output_path.parent().ok_or_else(|| {
        BeadsError::Config(format!("invalid export path: {}", output_path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        "{}.tmp",
        output_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "issues.jsonl".to_string())
    ));

    let mut hasher = Sha256::new();
    let mut exported_ids = Vec::with_capacity(issues.len());
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for issue in &issues {
            let line = serde_json::to_string(issue)?;
            writeln!(writer, "{line}")?;
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
            exported_ids.push(issue.id.clone());
        }
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| BeadsError::Io(e.into_error()))?
            .sync_all()?;
    }

    fs::rename(&tmp_path, output_path)?;

    let content_hash = format!("{:x}", hasher.finalize());
    store.set_metadata(meta_keys::LAST_IMPORT_HASH, &content_hash)?;

    tracing::debug!(
        count = exported_ids.len(),
        path = %output_path.display(),
        "exported issues"
    );

    Ok(ExportResult {
        exported_count: exported_ids.len(),
        exported_ids,
        content_hash,
    })
}

/// Fail if the file carries unresolved git conflict markers; importing
/// one would half-apply someone's merge.
///
/// # Errors
///
/// Returns a validation error naming the first offending line.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
        {
            return Err(BeadsError::validation(
                "jsonl",
                format!(
                    "git conflict marker at {}:{}; resolve the merge first",
                    path.display(),
                    idx + 1
                ),
            ));
        }
    }
    Ok(())
}

/// Parse the JSONL artifact. Blank lines are ignored; a malformed line
/// is a `JsonlParse` error with its line number.
///
/// # Errors
///
/// Returns an error on I/O failure, conflict markers, or a bad line.
pub fn read_issues_from_jsonl(path: &Path) -> Result<Vec<Issue>> {
    ensure_no_conflict_markers(path)?;

    let reader = BufReader::with_capacity(1 << 20, File::open(path)?);
    let mut issues = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut issue: Issue =
            serde_json::from_str(&line).map_err(|e| BeadsError::JsonlParse {
                line: idx + 1,
                reason: e.to_string(),
            })?;
        // The embedded form omits the source endpoint.
        for dep in &mut issue.dependencies {
            dep.issue_id.clone_from(&issue.id);
        }
        issues.push(issue);
    }

    Ok(issues)
}

/// Content hash of the artifact, matching what export records.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_jsonl_hash(path: &Path) -> Result<String> {
    jsonl_file_hash(path)
}

/// The shallow field set compared for collision resolution.
fn fields_differ(a: &Issue, b: &Issue) -> bool {
    a.title != b.title
        || a.description != b.description
        || a.design != b.design
        || a.acceptance_criteria != b.acceptance_criteria
        || a.notes != b.notes
        || a.status != b.status
        || a.priority != b.priority
        || a.issue_type != b.issue_type
        || a.assignee != b.assignee
        || a.external_ref != b.external_ref
}

fn update_from_input(input: &Issue) -> IssueUpdate {
    IssueUpdate {
        title: Some(input.title.clone()),
        description: Some(input.description.clone()),
        design: Some(input.design.clone()),
        acceptance_criteria: Some(input.acceptance_criteria.clone()),
        notes: Some(input.notes.clone()),
        status: Some(input.status),
        priority: Some(input.priority),
        issue_type: Some(input.issue_type),
        assignee: Some(input.assignee.clone()),
        external_ref: Some(input.external_ref.clone()),
        estimated_minutes: Some(input.estimated_minutes),
    }
}

/// Allocates fresh IDs under the configured prefix without touching the
/// store's counters, so planning works identically for dry runs. The
/// store counters are re-synced after a real apply.
struct IdAllocator {
    prefix: String,
    next: u64,
    taken: HashSet<String>,
}

impl IdAllocator {
    fn new(prefix: &str, store_ids: &HashSet<String>, input_ids: &HashSet<String>) -> Self {
        let mut max = 0;
        let mut taken = HashSet::new();
        for id in store_ids.iter().chain(input_ids) {
            taken.insert(id.clone());
            if let Some((p, n)) = id_util::split_prefix(id) {
                if p == prefix {
                    max = max.max(n);
                }
            }
        }
        Self {
            prefix: prefix.to_string(),
            next: max + 1,
            taken,
        }
    }

    /// Prefer keeping the numeric suffix; renumber on collision.
    fn remap(&mut self, old_id: &str) -> String {
        if let Some((_, n)) = id_util::split_prefix(old_id) {
            let candidate = id_util::format_id(&self.prefix, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
        self.fresh()
    }

    fn fresh(&mut self) -> String {
        loop {
            let candidate = id_util::format_id(&self.prefix, self.next);
            self.next += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

enum PlannedAction {
    Create(Issue),
    Update(Issue),
    Unchanged,
    Skip,
}

/// Run the import pipeline over already-parsed issues.
///
/// Phases: prefix check / remap, per-issue collision resolution (shallow
/// field diff), apply, then a second pass that materializes dependency
/// edges once every node exists (forward references within the batch are
/// fine). With `dry_run` the plan is computed and returned without
/// mutating the store.
///
/// # Errors
///
/// Returns `PrefixMismatch` in strict mode, validation errors for
/// malformed input, and store errors from the apply phase.
#[allow(clippy::too_many_lines)]
pub fn import_issues(
    store: &mut dyn Store,
    issues: Vec<Issue>,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let expected_prefix = store.issue_prefix().to_string();
    let mut result = ImportResult {
        expected_prefix: Some(expected_prefix.clone()),
        ..ImportResult::default()
    };

    for issue in &issues {
        crate::validation::validate_issue(issue)?;
        if issue.id.is_empty() {
            return Err(BeadsError::validation("id", "import requires explicit IDs"));
        }
    }

    let store_ids: HashSet<String> = export_issues(&*store)?
        .into_iter()
        .map(|i| i.id)
        .collect();
    let input_ids: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();
    let mut allocator = IdAllocator::new(&expected_prefix, &store_ids, &input_ids);

    // Phase 1: prefix check / remap.
    let mut issues = issues;
    let mut renames: HashMap<String, String> = HashMap::new();

    if !options.skip_prefix_validation {
        let mut mismatched: Vec<String> = Vec::new();
        let mut foreign_prefixes: HashSet<String> = HashSet::new();
        for issue in &issues {
            let prefix = id_util::split_prefix(&issue.id)
                .map_or_else(|| issue.id.clone(), |(p, _)| p.to_string());
            if prefix != expected_prefix {
                mismatched.push(issue.id.clone());
                foreign_prefixes.insert(prefix);
            }
        }

        if !mismatched.is_empty() {
            result.prefix_mismatch = mismatched.len();
            result.mismatch_prefixes = {
                let mut v: Vec<String> = foreign_prefixes.into_iter().collect();
                v.sort();
                v
            };

            if options.rename_on_import {
                for old_id in &mismatched {
                    let new_id = allocator.remap(old_id);
                    renames.insert(old_id.clone(), new_id);
                }
            } else if options.strict {
                return Err(BeadsError::PrefixMismatch {
                    expected: expected_prefix,
                    found: result.mismatch_prefixes,
                });
            }
        }
    }

    if !renames.is_empty() {
        for issue in &mut issues {
            if let Some(new_id) = renames.get(&issue.id) {
                issue.id.clone_from(new_id);
            }
            for dep in &mut issue.dependencies {
                if let Some(new_id) = renames.get(&dep.depends_on_id) {
                    dep.depends_on_id.clone_from(new_id);
                }
                dep.issue_id.clone_from(&issue.id);
            }
        }
        result.id_mapping.extend(renames.clone());
    }

    // Phase 2: per-issue plan.
    let mut plan: Vec<(Issue, PlannedAction)> = Vec::with_capacity(issues.len());
    let mut planned_ids: HashSet<String> = HashSet::new();

    for mut issue in issues {
        if planned_ids.contains(&issue.id) {
            tracing::warn!(id = %issue.id, "duplicate ID within import batch; skipping");
            result.skipped += 1;
            continue;
        }

        let existing = store.get_issue(&issue.id)?;
        let action = match existing {
            None => {
                planned_ids.insert(issue.id.clone());
                result.created += 1;
                PlannedAction::Create(issue.clone())
            }
            Some(_) if options.skip_update => {
                result.skipped += 1;
                PlannedAction::Skip
            }
            Some(ref current) if !fields_differ(current, &issue) => {
                result.unchanged += 1;
                PlannedAction::Unchanged
            }
            Some(ref current) => {
                // Same ID but a different creation instant means the
                // input is a distinct issue, not an edit of this one.
                if options.resolve_collisions && current.created_at != issue.created_at {
                    let old_id = issue.id.clone();
                    let new_id = allocator.fresh();
                    result.collisions += 1;
                    result.collision_ids.push(old_id.clone());
                    result.id_mapping.insert(old_id, new_id.clone());
                    issue.id.clone_from(&new_id);
                    for dep in &mut issue.dependencies {
                        dep.issue_id.clone_from(&new_id);
                    }
                    planned_ids.insert(new_id);
                    result.created += 1;
                    PlannedAction::Create(issue.clone())
                } else {
                    result.updated += 1;
                    PlannedAction::Update(issue.clone())
                }
            }
        };
        plan.push((issue, action));
    }

    // Phase 3: edge validation against the post-apply ID set.
    let known_after: HashSet<String> = store_ids
        .iter()
        .cloned()
        .chain(planned_ids.iter().cloned())
        .collect();
    for (issue, _) in &plan {
        for dep in &issue.dependencies {
            if !known_after.contains(&dep.depends_on_id) {
                if options.strict {
                    return Err(BeadsError::DependencyTargetNotFound {
                        id: dep.depends_on_id.clone(),
                    });
                }
                tracing::warn!(
                    from = %issue.id,
                    to = %dep.depends_on_id,
                    "dropping dependency on unknown issue"
                );
            }
        }
    }

    if options.dry_run {
        return Ok(result);
    }

    // Phase 4: apply. Creates land without their edges so forward
    // references resolve in the second pass below.
    for (_, action) in &plan {
        match action {
            PlannedAction::Create(issue) => {
                let mut bare = issue.clone();
                bare.dependencies = Vec::new();
                store.create_issue(&bare, "import")?;
            }
            PlannedAction::Update(issue) => {
                store.update_issue(&issue.id, &update_from_input(issue), "import")?;
            }
            PlannedAction::Unchanged | PlannedAction::Skip => {}
        }
    }

    // Phase 5: materialize edges now that every node exists. Only
    // missing edges are added, keeping re-imports event-free.
    for (issue, action) in &plan {
        if matches!(action, PlannedAction::Skip) {
            continue;
        }
        if issue.dependencies.is_empty() {
            continue;
        }
        let existing: HashSet<(String, crate::model::DependencyType)> = store
            .get_dependency_records(&issue.id)?
            .into_iter()
            .map(|d| (d.depends_on_id, d.dep_type))
            .collect();

        for dep in &issue.dependencies {
            if !known_after.contains(&dep.depends_on_id) {
                continue;
            }
            if existing.contains(&(dep.depends_on_id.clone(), dep.dep_type)) {
                continue;
            }
            store.create_dependency(
                &Dependency::new(&issue.id, &dep.depends_on_id, dep.dep_type),
                "import",
            )?;
        }
    }

    // Fresh IDs were handed out by the allocator; bring the persistent
    // counters back in line so the next auto-ID stays above everything.
    store.sync_all_counters()?;

    Ok(result)
}

/// Read, import, and record the artifact hash in one step. Used by the
/// daemon's auto-import and the `Import` RPC.
///
/// # Errors
///
/// Propagates read, parse, and import errors.
pub fn import_from_jsonl(
    store: &mut dyn Store,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let issues = read_issues_from_jsonl(path)?;
    let result = import_issues(store, issues, options)?;

    if !options.dry_run {
        let hash = compute_jsonl_hash(path)?;
        store.set_metadata(meta_keys::LAST_IMPORT_HASH, &hash)?;
    }

    Ok(result)
}
