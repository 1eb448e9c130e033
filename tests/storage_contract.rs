//! Store-contract tests run against both backends: CRUD, lifecycle,
//! labels, dependencies, events, and the error kinds each operation
//! must produce.

mod common;

use beads_core::error::BeadsError;
use beads_core::model::{DependencyType, EventType, Status};
use beads_core::storage::{IssueUpdate, ListFilters, Store};
use common::fixtures::{dep, issue};
use common::for_each_backend;

#[test]
fn create_get_roundtrip() {
    for_each_backend(|store| {
        let mut input = issue("bd-1", "Roundtrip");
        input.description = Some("body".to_string());
        input.labels = vec!["alpha".to_string()];

        store.create_issue(&input, "tester").unwrap();
        let got = store.get_issue("bd-1").unwrap().expect("issue exists");
        assert_eq!(got.title, "Roundtrip");
        assert_eq!(got.description.as_deref(), Some("body"));
        assert_eq!(got.labels, vec!["alpha".to_string()]);
        assert_eq!(got.status, Status::Open);
    });
}

#[test]
fn get_missing_is_none() {
    for_each_backend(|store| {
        assert!(store.get_issue("bd-404").unwrap().is_none());
    });
}

#[test]
fn duplicate_create_conflicts() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "first"), "t").unwrap();
        let err = store.create_issue(&issue("bd-1", "again"), "t").unwrap_err();
        assert!(matches!(err, BeadsError::IdCollision { .. }), "{err}");
    });
}

#[test]
fn empty_title_rejected() {
    for_each_backend(|store| {
        let err = store.create_issue(&issue("bd-1", "  "), "t").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    });
}

#[test]
fn update_unknown_key_rejected_whole_map() {
    let map = serde_json::json!({"title": "ok", "story_points": 5});
    let err = IssueUpdate::from_field_map(map.as_object().unwrap()).unwrap_err();
    assert!(matches!(err, BeadsError::UnknownUpdateKey { .. }));
}

#[test]
fn update_advances_updated_at_monotonically() {
    for_each_backend(|store| {
        let created = store.create_issue(&issue("bd-1", "before"), "t").unwrap();

        let update = IssueUpdate {
            title: Some("after".to_string()),
            ..IssueUpdate::default()
        };
        let updated = store.update_issue("bd-1", &update, "t").unwrap();
        assert!(updated.updated_at >= created.updated_at);
        assert!(updated.updated_at >= updated.created_at);
    });
}

#[test]
fn update_missing_is_not_found() {
    for_each_backend(|store| {
        let update = IssueUpdate {
            title: Some("x".to_string()),
            ..IssueUpdate::default()
        };
        let err = store.update_issue("bd-404", &update, "t").unwrap_err();
        assert!(matches!(err, BeadsError::IssueNotFound { .. }));
    });
}

#[test]
fn close_reopen_lifecycle() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "life"), "t").unwrap();

        let closed = store.close_issue("bd-1", "shipped", "t").unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.close_reason.as_deref(), Some("shipped"));

        let reopened = store.reopen_issue("bd-1", "t").unwrap();
        assert_eq!(reopened.status, Status::Open);
        assert!(reopened.closed_at.is_none());
        assert!(reopened.close_reason.is_none());
    });
}

#[test]
fn status_update_maintains_closed_at_invariant() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "inv"), "t").unwrap();

        let close = IssueUpdate {
            status: Some(Status::Closed),
            ..IssueUpdate::default()
        };
        let updated = store.update_issue("bd-1", &close, "t").unwrap();
        assert!(updated.closed_at.is_some());

        let reopen = IssueUpdate {
            status: Some(Status::InProgress),
            ..IssueUpdate::default()
        };
        let updated = store.update_issue("bd-1", &reopen, "t").unwrap();
        assert!(updated.closed_at.is_none());
    });
}

#[test]
fn delete_removes_issue_and_inbound_edges() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "target"), "t").unwrap();
        store.create_issue(&issue("bd-2", "pointer"), "t").unwrap();
        store
            .create_dependency(&dep("bd-2", "bd-1", DependencyType::Blocks), "t")
            .unwrap();

        store.delete_issue("bd-1", "t").unwrap();
        assert!(store.get_issue("bd-1").unwrap().is_none());
        assert!(store.get_dependency_records("bd-2").unwrap().is_empty());
    });
}

#[test]
fn delete_missing_is_not_found() {
    for_each_backend(|store| {
        assert!(matches!(
            store.delete_issue("bd-404", "t"),
            Err(BeadsError::IssueNotFound { .. })
        ));
    });
}

#[test]
fn self_dependency_rejected() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "solo"), "t").unwrap();
        let err = store
            .create_dependency(&dep("bd-1", "bd-1", DependencyType::Blocks), "t")
            .unwrap_err();
        assert!(matches!(err, BeadsError::SelfDependency { .. }));
    });
}

#[test]
fn duplicate_edge_collapses_to_newest_type() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "a"), "t").unwrap();
        store.create_issue(&issue("bd-2", "b"), "t").unwrap();
        store
            .create_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "t")
            .unwrap();
        store
            .create_dependency(&dep("bd-1", "bd-2", DependencyType::Related), "t")
            .unwrap();

        let records = store.get_dependency_records("bd-1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dep_type, DependencyType::Related);
    });
}

#[test]
fn dependents_reverse_lookup() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "base"), "t").unwrap();
        store.create_issue(&issue("bd-2", "user one"), "t").unwrap();
        store.create_issue(&issue("bd-3", "user two"), "t").unwrap();
        store
            .create_dependency(&dep("bd-2", "bd-1", DependencyType::Blocks), "t")
            .unwrap();
        store
            .create_dependency(&dep("bd-3", "bd-1", DependencyType::Related), "t")
            .unwrap();

        let mut dependents: Vec<String> = store
            .get_dependents("bd-1")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        dependents.sort();
        assert_eq!(dependents, vec!["bd-2".to_string(), "bd-3".to_string()]);
    });
}

#[test]
fn list_and_search_filters() {
    for_each_backend(|store| {
        let mut a = issue("bd-1", "Fix the parser");
        a.description = Some("tokenizer chokes".to_string());
        a.labels = vec!["backend".to_string()];
        store.create_issue(&a, "t").unwrap();
        store.create_issue(&issue("bd-2", "Write docs"), "t").unwrap();
        store.close_issue("bd-2", "", "t").unwrap();

        let open = store
            .list_issues(&ListFilters {
                statuses: Some(vec![Status::Open]),
                ..ListFilters::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);

        let by_label = store
            .list_issues(&ListFilters {
                labels_all: vec!["backend".to_string()],
                ..ListFilters::default()
            })
            .unwrap();
        assert_eq!(by_label.len(), 1);
        assert_eq!(by_label[0].id, "bd-1");

        let by_title = store
            .list_issues(&ListFilters {
                title_contains: Some("PARSER".to_string()),
                ..ListFilters::default()
            })
            .unwrap();
        assert_eq!(by_title.len(), 1);

        let hits = store.search_issues("tokenizer", &ListFilters::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "bd-1");
    });
}

#[test]
fn events_recorded_most_recent_last() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "audited"), "alice").unwrap();
        store.close_issue("bd-1", "done", "bob").unwrap();

        let events = store.get_events("bd-1", 0).unwrap();
        assert!(events.len() >= 2);
        assert_eq!(events.first().unwrap().event_type, EventType::Created);
        assert_eq!(events.first().unwrap().actor, "alice");
        assert_eq!(events.last().unwrap().event_type, EventType::Closed);
        assert_eq!(events.last().unwrap().actor, "bob");

        let tail = store.get_events("bd-1", 1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, EventType::Closed);
    });
}

#[test]
fn config_and_metadata_roundtrip() {
    for_each_backend(|store| {
        store.set_config("integration", "jira").unwrap();
        assert_eq!(
            store.get_config("integration").unwrap(),
            Some("jira".to_string())
        );
        assert_eq!(store.get_all_config().unwrap().len(), 1);
        assert!(store.delete_config("integration").unwrap());
        assert_eq!(store.get_config("integration").unwrap(), None);

        store.set_metadata("bd_version", "0.3.0").unwrap();
        assert_eq!(
            store.get_metadata("bd_version").unwrap(),
            Some("0.3.0".to_string())
        );
    });
}

#[test]
fn rename_dependency_prefix_rewrites_edge_targets() {
    // The edge source lives under a different prefix so the record stays
    // addressable after the target prefix moves.
    for_each_backend(|store| {
        store.create_issue(&issue("keep-1", "source"), "t").unwrap();
        store.create_issue(&issue("bd-2", "target"), "t").unwrap();
        store
            .create_dependency(&dep("keep-1", "bd-2", DependencyType::Blocks), "t")
            .unwrap();

        let changed = store.rename_dependency_prefix("bd", "np").unwrap();
        assert!(changed >= 1);

        let records = store.get_dependency_records("keep-1").unwrap();
        assert_eq!(records[0].depends_on_id, "np-2");
    });
}

#[test]
fn comments_only_on_indexed_backend() {
    let mut sqlite = common::sqlite_store();
    sqlite.create_issue(&issue("bd-1", "c"), "t").unwrap();
    let comment = sqlite.add_comment("bd-1", "alice", "hello").unwrap();
    assert_eq!(comment.text, "hello");
    assert_eq!(sqlite.get_comments("bd-1").unwrap().len(), 1);

    let (mut markdown, _dir) = common::markdown_store();
    markdown.create_issue(&issue("bd-1", "c"), "t").unwrap();
    let err = markdown.add_comment("bd-1", "alice", "hello").unwrap_err();
    assert!(
        matches!(err, BeadsError::Unsupported { .. }),
        "must be the distinct unsupported kind, got: {err}"
    );
}

#[test]
fn sqlite_store_survives_reopen() {
    let (mut store, dir) = common::sqlite_store_on_disk("bd");
    store.create_issue(&issue("bd-1", "durable"), "t").unwrap();
    store
        .create_dependency(&dep("bd-1", "bd-1", DependencyType::Blocks), "t")
        .unwrap_err();
    drop(store);

    let store =
        beads_core::storage::SqliteStore::open(&dir.path().join("beads.db"), "bd").unwrap();
    let got = store.get_issue("bd-1").unwrap().expect("persisted");
    assert_eq!(got.title, "durable");
}
