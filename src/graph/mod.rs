//! Work-graph engine: readiness, blocking, epics, cycles, and tree walks
//! over the dependency graph.
//!
//! All algorithms are backend-agnostic: they pull issues and edge records
//! once and traverse by ID lookups. Issues never hold pointers to each
//! other, so a cyclic graph needs no special teardown.

use crate::error::Result;
use crate::model::{
    BlockedIssue, DependencyType, EpicStatus, Issue, IssueType, Priority, Status, TreeNode,
};
use crate::storage::{ListFilters, Store};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Default depth cap for dependency tree walks.
pub const DEFAULT_TREE_DEPTH: usize = 50;

/// How ready work is ordered.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortPolicy {
    /// Ascending priority; at equal priority in-progress precedes open,
    /// then older first.
    #[default]
    Hybrid,
    /// Ascending priority, then older first.
    Priority,
    /// Older first only.
    Oldest,
}

/// Filter for [`ready_work`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkFilter {
    /// Candidate statuses; defaults to open + in_progress when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<Status>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort_policy: SortPolicy,
}

/// Snapshot of issues + edges used by every graph computation.
struct GraphView {
    issues: HashMap<String, Issue>,
    /// Outgoing edges per issue: `(target, type)`.
    edges: HashMap<String, Vec<(String, DependencyType)>>,
}

impl GraphView {
    fn load(store: &dyn Store) -> Result<Self> {
        let issues = store.list_issues(&ListFilters::default())?;
        let records = store.get_all_dependency_records()?;

        let mut edges: HashMap<String, Vec<(String, DependencyType)>> = HashMap::new();
        for (id, deps) in records {
            edges.insert(
                id,
                deps.into_iter()
                    .map(|d| (d.depends_on_id, d.dep_type))
                    .collect(),
            );
        }

        Ok(Self {
            issues: issues.into_iter().map(|i| (i.id.clone(), i)).collect(),
            edges,
        })
    }

    fn status_of(&self, id: &str) -> Option<Status> {
        self.issues.get(id).map(|i| i.status)
    }

    /// IDs of issues that cannot be worked: directly blocked by an
    /// active `blocks` target, or transitively blocked through a blocked
    /// `parent-child` parent (to fixpoint).
    fn blocked_ids(&self) -> HashSet<String> {
        let mut blocked: HashSet<String> = HashSet::new();

        for (id, edges) in &self.edges {
            for (target, dep_type) in edges {
                if *dep_type != DependencyType::Blocks {
                    continue;
                }
                if self
                    .status_of(target)
                    .is_some_and(|s| s.blocks_dependents())
                {
                    blocked.insert(id.clone());
                    break;
                }
            }
        }

        // A child of a blocked parent is itself blocked; repeat until no
        // new issue joins the set.
        loop {
            let mut grew = false;
            for (id, edges) in &self.edges {
                if blocked.contains(id) {
                    continue;
                }
                let inherits = edges.iter().any(|(target, dep_type)| {
                    *dep_type == DependencyType::ParentChild && blocked.contains(target)
                });
                if inherits {
                    blocked.insert(id.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        blocked
    }
}

/// Compute actionable issues: candidates minus blocked, sorted and
/// limited per the filter.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn ready_work(store: &dyn Store, filter: &WorkFilter) -> Result<Vec<Issue>> {
    let view = GraphView::load(store)?;
    let blocked = view.blocked_ids();

    let candidate_statuses: Vec<Status> = filter
        .statuses
        .clone()
        .unwrap_or_else(|| vec![Status::Open, Status::InProgress]);

    let mut ready: Vec<Issue> = view
        .issues
        .values()
        .filter(|issue| candidate_statuses.contains(&issue.status))
        .filter(|issue| !blocked.contains(&issue.id))
        .filter(|issue| filter.priority.map_or(true, |p| issue.priority == p))
        .filter(|issue| {
            filter
                .assignee
                .as_deref()
                .map_or(true, |a| issue.assignee.as_deref() == Some(a))
        })
        .cloned()
        .collect();

    match filter.sort_policy {
        SortPolicy::Hybrid => {
            ready.sort_by(|a, b| {
                let rank = |s: Status| u8::from(s != Status::InProgress);
                (a.priority, rank(a.status), a.created_at, &a.id).cmp(&(
                    b.priority,
                    rank(b.status),
                    b.created_at,
                    &b.id,
                ))
            });
        }
        SortPolicy::Priority => {
            ready.sort_by(|a, b| {
                (a.priority, a.created_at, &a.id).cmp(&(b.priority, b.created_at, &b.id))
            });
        }
        SortPolicy::Oldest => {
            ready.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        }
    }

    if let Some(limit) = filter.limit {
        if limit > 0 && ready.len() > limit {
            ready.truncate(limit);
        }
    }

    Ok(ready)
}

/// Issues with at least one active `blocks` successor, with their
/// blockers, sorted by ascending priority.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn blocked_issues(store: &dyn Store) -> Result<Vec<BlockedIssue>> {
    let view = GraphView::load(store)?;

    let mut out = Vec::new();
    for issue in view.issues.values() {
        if !issue.status.blocks_dependents() {
            continue;
        }
        let Some(edges) = view.edges.get(&issue.id) else {
            continue;
        };

        let blockers: Vec<String> = edges
            .iter()
            .filter(|(target, dep_type)| {
                *dep_type == DependencyType::Blocks
                    && view
                        .status_of(target)
                        .is_some_and(|s| s.blocks_dependents())
            })
            .map(|(target, _)| target.clone())
            .collect();

        if !blockers.is_empty() {
            out.push(BlockedIssue {
                blocker_count: blockers.len(),
                issue: issue.clone(),
                blockers,
            });
        }
    }

    out.sort_by(|a, b| {
        (a.issue.priority, &a.issue.id).cmp(&(b.issue.priority, &b.issue.id))
    });
    Ok(out)
}

/// Epics eligible for closure: at least one `parent-child` child and
/// every child closed.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn epics_eligible_for_closure(store: &dyn Store) -> Result<Vec<EpicStatus>> {
    let view = GraphView::load(store)?;

    // children[epic] = children pointing at it via parent-child.
    let mut children: HashMap<&str, Vec<&Issue>> = HashMap::new();
    for (id, edges) in &view.edges {
        let Some(child) = view.issues.get(id) else {
            continue;
        };
        for (target, dep_type) in edges {
            if *dep_type == DependencyType::ParentChild {
                children.entry(target.as_str()).or_default().push(child);
            }
        }
    }

    let mut out = Vec::new();
    for issue in view.issues.values() {
        if issue.issue_type != IssueType::Epic {
            continue;
        }
        let kids = children.get(issue.id.as_str()).map_or(&[][..], Vec::as_slice);
        let total_children = kids.len();
        let closed_children = kids.iter().filter(|k| k.status == Status::Closed).count();

        out.push(EpicStatus {
            epic: issue.clone(),
            total_children,
            closed_children,
            eligible_for_close: total_children > 0 && closed_children == total_children,
        });
    }

    out.sort_by(|a, b| a.epic.id.cmp(&b.epic.id));
    Ok(out)
}

/// Detect cycles over all edge types with a color-marking DFS.
///
/// Each node is WHITE (unvisited), GRAY (on the current path), or BLACK
/// (finished). A back edge to a GRAY node closes a cycle; BLACK nodes
/// are re-entered rather than skipped wholesale, so cycles reachable
/// only through finished nodes are still found. Reported cycles are
/// canonicalized to start at their lexicographically smallest node
/// (orientation preserved) and deduplicated.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn detect_cycles(store: &dyn Store) -> Result<Vec<Vec<String>>> {
    let view = GraphView::load(store)?;

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, edges) in &view.edges {
        let targets: Vec<&str> = edges
            .iter()
            .map(|(t, _)| t.as_str())
            .filter(|t| view.issues.contains_key(*t))
            .collect();
        adjacency.insert(id.as_str(), targets);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<&str, Color> = adjacency.keys().map(|k| (*k, Color::White)).collect();
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();

    let mut roots: Vec<&str> = adjacency.keys().copied().collect();
    roots.sort_unstable();

    for root in roots {
        if color.get(root) != Some(&Color::White) {
            continue;
        }

        // Iterative DFS: (node, next neighbor index).
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut path: Vec<&str> = vec![root];
        color.insert(root, Color::Gray);

        while let Some((node, idx)) = stack.last_mut() {
            let neighbors = adjacency.get(*node).map_or(&[][..], Vec::as_slice);

            if *idx < neighbors.len() {
                let next = neighbors[*idx];
                *idx += 1;

                match color.get(next).copied().unwrap_or(Color::Black) {
                    Color::Gray => {
                        if let Some(start) = path.iter().position(|n| *n == next) {
                            let cycle: Vec<String> =
                                path[start..].iter().map(ToString::to_string).collect();
                            let canonical = canonicalize_cycle(&cycle);
                            if seen.insert(canonical.clone()) {
                                cycles.push(canonical);
                            }
                        }
                    }
                    Color::White => {
                        color.insert(next, Color::Gray);
                        path.push(next);
                        stack.push((next, 0));
                    }
                    Color::Black => {}
                }
                continue;
            }

            color.insert(*node, Color::Black);
            path.pop();
            stack.pop();
        }
    }

    cycles.sort();
    Ok(cycles)
}

/// Rotate a cycle so it starts at its lexicographically smallest node,
/// preserving edge orientation.
#[must_use]
fn canonicalize_cycle(cycle: &[String]) -> Vec<String> {
    if cycle.is_empty() {
        return Vec::new();
    }
    let smallest = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map_or(0, |(i, _)| i);

    let mut rotated = Vec::with_capacity(cycle.len());
    for offset in 0..cycle.len() {
        rotated.push(cycle[(smallest + offset) % cycle.len()].clone());
    }
    rotated
}

/// BFS over outgoing edges from `root`, up to `max_depth`.
///
/// Default mode emits each node once at its minimum depth. With
/// `show_all_paths`, re-visits along distinct paths are emitted too
/// (each path visits a node at most once, so cycles terminate). Nodes
/// sitting at the depth cap with further outgoing edges are marked
/// truncated.
///
/// # Errors
///
/// Returns `IssueNotFound` if `root` is missing, or a store read error.
pub fn dependency_tree(
    store: &dyn Store,
    root: &str,
    max_depth: usize,
    show_all_paths: bool,
) -> Result<Vec<TreeNode>> {
    let view = GraphView::load(store)?;
    if !view.issues.contains_key(root) {
        return Err(crate::error::BeadsError::IssueNotFound {
            id: root.to_string(),
        });
    }

    let neighbors = |id: &str| -> Vec<String> {
        view.edges
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|(t, _)| t.clone())
                    .filter(|t| view.issues.contains_key(t))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut nodes = Vec::new();

    if show_all_paths {
        // Queue carries the path to guard against cycles per-path.
        let mut queue: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
        queue.push_back((root.to_string(), 0, vec![root.to_string()]));

        while let Some((id, depth, path)) = queue.pop_front() {
            let targets = neighbors(&id);
            let truncated = depth == max_depth && !targets.is_empty();
            nodes.push(TreeNode {
                id: id.clone(),
                depth,
                truncated,
            });
            if depth == max_depth {
                continue;
            }
            for target in targets {
                if path.contains(&target) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(target.clone());
                queue.push_back((target, depth + 1, next_path));
            }
        }
    } else {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        visited.insert(root.to_string());
        queue.push_back((root.to_string(), 0));

        while let Some((id, depth)) = queue.pop_front() {
            let targets = neighbors(&id);
            let truncated = depth == max_depth && !targets.is_empty();
            nodes.push(TreeNode {
                id: id.clone(),
                depth,
                truncated,
            });
            if depth == max_depth {
                continue;
            }
            for target in targets {
                if visited.insert(target.clone()) {
                    queue.push_back((target, depth + 1));
                }
            }
        }
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dependency;
    use crate::storage::SqliteStore;
    use chrono::{Duration, Utc};

    fn store() -> SqliteStore {
        SqliteStore::open_memory("bd").unwrap()
    }

    fn add(s: &mut SqliteStore, id: &str, status: Status, priority: i32, age_minutes: i64) {
        let created = Utc::now() - Duration::minutes(age_minutes);
        let issue = Issue {
            id: id.to_string(),
            title: id.to_string(),
            status,
            priority: Priority(priority),
            created_at: created,
            updated_at: created,
            ..Issue::default()
        };
        s.create_issue(&issue, "t").unwrap();
    }

    fn edge(s: &mut SqliteStore, from: &str, to: &str, dep_type: DependencyType) {
        s.create_dependency(&Dependency::new(from, to, dep_type), "t")
            .unwrap();
    }

    #[test]
    fn ready_excludes_directly_blocked() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 1, 30); // A
        add(&mut s, "bd-2", Status::Open, 1, 20); // B
        add(&mut s, "bd-3", Status::InProgress, 2, 10); // C
        edge(&mut s, "bd-1", "bd-3", DependencyType::Blocks); // A blocks on C

        let ready = ready_work(
            &s,
            &WorkFilter {
                limit: Some(10),
                ..WorkFilter::default()
            },
        )
        .unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        // A is blocked by active C; B (p1) precedes C (p2).
        assert_eq!(ids, vec!["bd-2", "bd-3"]);
    }

    #[test]
    fn closing_blocker_releases_dependent() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 1, 30);
        add(&mut s, "bd-2", Status::Open, 1, 20);
        add(&mut s, "bd-3", Status::InProgress, 2, 10);
        edge(&mut s, "bd-1", "bd-3", DependencyType::Blocks);

        s.close_issue("bd-3", "", "t").unwrap();

        let ready = ready_work(&s, &WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        // Sorted by created_at at equal priority: A is older than B.
        assert_eq!(ids, vec!["bd-1", "bd-2"]);
    }

    #[test]
    fn hybrid_prefers_in_progress_at_equal_priority() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 1, 30); // older open
        add(&mut s, "bd-2", Status::InProgress, 1, 10); // newer in_progress

        let ready = ready_work(&s, &WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-2", "bd-1"]);

        // priority policy ignores status rank.
        let ready = ready_work(
            &s,
            &WorkFilter {
                sort_policy: SortPolicy::Priority,
                ..WorkFilter::default()
            },
        )
        .unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-1", "bd-2"]);
    }

    #[test]
    fn oldest_policy_sorts_by_age_only() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 4, 30);
        add(&mut s, "bd-2", Status::Open, 0, 10);

        let ready = ready_work(
            &s,
            &WorkFilter {
                sort_policy: SortPolicy::Oldest,
                ..WorkFilter::default()
            },
        )
        .unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-1", "bd-2"]);
    }

    #[test]
    fn transitive_parent_child_blocking() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 2, 40); // blocker
        add(&mut s, "bd-2", Status::Open, 2, 30); // parent, blocked by bd-1
        add(&mut s, "bd-3", Status::Open, 2, 20); // child of parent
        add(&mut s, "bd-4", Status::Open, 2, 10); // grandchild
        edge(&mut s, "bd-2", "bd-1", DependencyType::Blocks);
        edge(&mut s, "bd-3", "bd-2", DependencyType::ParentChild);
        edge(&mut s, "bd-4", "bd-3", DependencyType::ParentChild);

        let ready = ready_work(&s, &WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        // Only the root blocker is workable; parent, child, and
        // grandchild are all blocked.
        assert_eq!(ids, vec!["bd-1"]);
    }

    #[test]
    fn related_edges_never_block() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 2, 20);
        add(&mut s, "bd-2", Status::Open, 2, 10);
        edge(&mut s, "bd-1", "bd-2", DependencyType::Related);
        edge(&mut s, "bd-1", "bd-2", DependencyType::DiscoveredFrom);

        let ready = ready_work(&s, &WorkFilter::default()).unwrap();
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn blocked_report_lists_blockers_by_priority() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 3, 40);
        add(&mut s, "bd-2", Status::Open, 0, 30);
        add(&mut s, "bd-3", Status::Open, 2, 20);
        edge(&mut s, "bd-1", "bd-3", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-3", DependencyType::Blocks);

        let blocked = blocked_issues(&s).unwrap();
        assert_eq!(blocked.len(), 2);
        // Ascending priority: bd-2 (p0) before bd-1 (p3).
        assert_eq!(blocked[0].issue.id, "bd-2");
        assert_eq!(blocked[0].blockers, vec!["bd-3".to_string()]);
        assert_eq!(blocked[1].issue.id, "bd-1");
        assert_eq!(blocked[1].blocker_count, 1);
    }

    #[test]
    fn closed_blockers_do_not_appear() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 2, 20);
        add(&mut s, "bd-2", Status::Open, 2, 10);
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        s.close_issue("bd-2", "", "t").unwrap();

        assert!(blocked_issues(&s).unwrap().is_empty());
    }

    #[test]
    fn epic_eligibility() {
        let mut s = store();
        let mut epic = Issue {
            id: "bd-1".to_string(),
            title: "epic".to_string(),
            issue_type: IssueType::Epic,
            ..Issue::default()
        };
        s.create_issue(&epic, "t").unwrap();
        add(&mut s, "bd-2", Status::Closed, 2, 20);
        add(&mut s, "bd-3", Status::Open, 2, 10);
        edge(&mut s, "bd-2", "bd-1", DependencyType::ParentChild);
        edge(&mut s, "bd-3", "bd-1", DependencyType::ParentChild);

        let epics = epics_eligible_for_closure(&s).unwrap();
        assert_eq!(epics.len(), 1);
        assert_eq!(epics[0].total_children, 2);
        assert_eq!(epics[0].closed_children, 1);
        assert!(!epics[0].eligible_for_close);

        s.close_issue("bd-3", "", "t").unwrap();
        let epics = epics_eligible_for_closure(&s).unwrap();
        assert!(epics[0].eligible_for_close);

        // An epic with no children is never eligible.
        epic.id = "bd-9".to_string();
        s.create_issue(&epic, "t").unwrap();
        let epics = epics_eligible_for_closure(&s).unwrap();
        let childless = epics.iter().find(|e| e.epic.id == "bd-9").unwrap();
        assert!(!childless.eligible_for_close);
    }

    #[test]
    fn detects_single_cycle_canonicalized() {
        let mut s = store();
        for id in ["bd-1", "bd-2", "bd-3", "bd-4", "bd-5"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        // X->Y->Z->X, plus unrelated W->V.
        edge(&mut s, "bd-3", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-1", DependencyType::Blocks);
        edge(&mut s, "bd-1", "bd-3", DependencyType::Blocks);
        edge(&mut s, "bd-4", "bd-5", DependencyType::Blocks);

        let cycles = detect_cycles(&s).unwrap();
        assert_eq!(cycles.len(), 1);
        // Canonical form starts at the lexicographically smallest node,
        // following edge orientation bd-1 -> bd-3 -> bd-2.
        assert_eq!(cycles[0], vec!["bd-1", "bd-3", "bd-2"]);
    }

    #[test]
    fn cycle_reachable_through_finished_nodes_is_found() {
        let mut s = store();
        for id in ["bd-1", "bd-2", "bd-3", "bd-4"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        // bd-1 -> bd-2 (acyclic spur), and a cycle bd-3 <-> bd-4 entered
        // after bd-2 is already finished.
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-4", DependencyType::Related);
        edge(&mut s, "bd-3", "bd-4", DependencyType::Blocks);
        edge(&mut s, "bd-4", "bd-3", DependencyType::Blocks);

        let cycles = detect_cycles(&s).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["bd-3", "bd-4"]);
    }

    #[test]
    fn self_loop_free_graph_reports_nothing() {
        let mut s = store();
        add(&mut s, "bd-1", Status::Open, 2, 20);
        add(&mut s, "bd-2", Status::Open, 2, 10);
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        assert!(detect_cycles(&s).unwrap().is_empty());
    }

    #[test]
    fn duplicate_cycles_are_reported_once() {
        let mut s = store();
        for id in ["bd-1", "bd-2"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-1", DependencyType::ParentChild);

        let cycles = detect_cycles(&s).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["bd-1", "bd-2"]);
    }

    #[test]
    fn tree_bfs_min_depth_once() {
        let mut s = store();
        for id in ["bd-1", "bd-2", "bd-3", "bd-4"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        // Diamond: 1 -> 2, 1 -> 3, 2 -> 4, 3 -> 4.
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-1", "bd-3", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-4", DependencyType::Blocks);
        edge(&mut s, "bd-3", "bd-4", DependencyType::Blocks);

        let nodes = dependency_tree(&s, "bd-1", DEFAULT_TREE_DEPTH, false).unwrap();
        assert_eq!(nodes.len(), 4);
        let bd4: Vec<&TreeNode> = nodes.iter().filter(|n| n.id == "bd-4").collect();
        assert_eq!(bd4.len(), 1);
        assert_eq!(bd4[0].depth, 2);
    }

    #[test]
    fn tree_all_paths_revisits() {
        let mut s = store();
        for id in ["bd-1", "bd-2", "bd-3", "bd-4"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-1", "bd-3", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-4", DependencyType::Blocks);
        edge(&mut s, "bd-3", "bd-4", DependencyType::Blocks);

        let nodes = dependency_tree(&s, "bd-1", DEFAULT_TREE_DEPTH, true).unwrap();
        let bd4_count = nodes.iter().filter(|n| n.id == "bd-4").count();
        assert_eq!(bd4_count, 2);
    }

    #[test]
    fn tree_depth_cap_marks_truncated() {
        let mut s = store();
        for id in ["bd-1", "bd-2", "bd-3"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-3", DependencyType::Blocks);

        let nodes = dependency_tree(&s, "bd-1", 1, false).unwrap();
        assert_eq!(nodes.len(), 2);
        let leaf = nodes.iter().find(|n| n.id == "bd-2").unwrap();
        assert!(leaf.truncated);
        assert!(!nodes[0].truncated);
    }

    #[test]
    fn tree_missing_root_errors() {
        let s = store();
        assert!(dependency_tree(&s, "bd-404", 5, false).is_err());
    }

    #[test]
    fn tree_handles_cycles() {
        let mut s = store();
        for id in ["bd-1", "bd-2"] {
            add(&mut s, id, Status::Open, 2, 10);
        }
        edge(&mut s, "bd-1", "bd-2", DependencyType::Blocks);
        edge(&mut s, "bd-2", "bd-1", DependencyType::Blocks);

        let nodes = dependency_tree(&s, "bd-1", 10, false).unwrap();
        assert_eq!(nodes.len(), 2);

        let nodes = dependency_tree(&s, "bd-1", 10, true).unwrap();
        // Each path visits a node at most once, so the walk terminates.
        assert!(nodes.len() <= 3);
    }
}
