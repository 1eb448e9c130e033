//! Shared helpers for the integration tests: real stores in temp
//! directories, no mocks.
#![allow(dead_code)]

use beads_core::model::{Dependency, DependencyType, Issue, Priority, Status};
use beads_core::storage::{MarkdownStore, SqliteStore, Store};
use chrono::{Duration, Utc};
use tempfile::TempDir;

pub mod fixtures {
    use super::*;

    /// Minimal open task with the given ID and title.
    pub fn issue(id: &str, title: &str) -> Issue {
        Issue {
            id: id.to_string(),
            title: title.to_string(),
            ..Issue::default()
        }
    }

    /// Issue with controlled status/priority/age for graph tests.
    pub fn aged_issue(
        id: &str,
        status: Status,
        priority: i32,
        age_minutes: i64,
    ) -> Issue {
        let created = Utc::now() - Duration::minutes(age_minutes);
        Issue {
            id: id.to_string(),
            title: id.to_string(),
            status,
            priority: Priority(priority),
            created_at: created,
            updated_at: created,
            ..Issue::default()
        }
    }

    pub fn dep(from: &str, to: &str, dep_type: DependencyType) -> Dependency {
        Dependency::new(from, to, dep_type)
    }
}

/// In-memory SQLite store with the `bd` prefix.
pub fn sqlite_store() -> SqliteStore {
    SqliteStore::open_memory("bd").expect("open in-memory store")
}

/// SQLite store on disk, for tests that reopen the database.
pub fn sqlite_store_on_disk(prefix: &str) -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store =
        SqliteStore::open(&dir.path().join("beads.db"), prefix).expect("open sqlite store");
    (store, dir)
}

/// Markdown store under a temp root with the `bd` prefix.
pub fn markdown_store() -> (MarkdownStore, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store =
        MarkdownStore::open(&dir.path().join("markdown_db"), "bd").expect("open markdown store");
    (store, dir)
}

/// Run the same assertion body against both backends.
pub fn for_each_backend(test: impl Fn(&mut dyn Store)) {
    let mut sqlite = sqlite_store();
    test(&mut sqlite);

    let (mut markdown, _dir) = markdown_store();
    test(&mut markdown);
}
