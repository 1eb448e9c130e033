//! Atomic ID rename: the issue moves and every edge referencing the old
//! ID is rewritten in the same operation, on both backends.

mod common;

use beads_core::error::BeadsError;
use beads_core::model::DependencyType;
use beads_core::storage::Store;
use common::fixtures::{dep, issue};
use common::for_each_backend;

#[test]
fn rename_rewrites_both_edge_directions() {
    // P --blocks--> Q, R --related--> Q; rename Q -> Q2.
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "P"), "t").unwrap();
        store.create_issue(&issue("bd-2", "Q"), "t").unwrap();
        store.create_issue(&issue("bd-3", "R"), "t").unwrap();
        store
            .create_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "t")
            .unwrap();
        store
            .create_dependency(&dep("bd-3", "bd-2", DependencyType::Related), "t")
            .unwrap();

        store.update_issue_id("bd-2", "bd-20", "t").unwrap();

        assert!(store.get_issue("bd-2").unwrap().is_none());
        assert!(store.get_issue("bd-20").unwrap().is_some());

        let p = store.get_dependency_records("bd-1").unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].depends_on_id, "bd-20");
        assert_eq!(p[0].dep_type, DependencyType::Blocks);

        let r = store.get_dependency_records("bd-3").unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].depends_on_id, "bd-20");
        assert_eq!(r[0].dep_type, DependencyType::Related);
    });
}

#[test]
fn rename_moves_outgoing_edges() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "source"), "t").unwrap();
        store.create_issue(&issue("bd-2", "target"), "t").unwrap();
        store
            .create_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "t")
            .unwrap();

        store.update_issue_id("bd-1", "bd-10", "t").unwrap();

        let moved = store.get_dependency_records("bd-10").unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].depends_on_id, "bd-2");
        assert!(store.get_dependency_records("bd-1").unwrap().is_empty());
    });
}

#[test]
fn rename_to_occupied_id_fails_without_side_effects() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "a"), "t").unwrap();
        store.create_issue(&issue("bd-2", "b"), "t").unwrap();

        let err = store.update_issue_id("bd-1", "bd-2", "t").unwrap_err();
        assert!(matches!(err, BeadsError::IdCollision { .. }));

        assert_eq!(store.get_issue("bd-1").unwrap().unwrap().title, "a");
        assert_eq!(store.get_issue("bd-2").unwrap().unwrap().title, "b");
    });
}

#[test]
fn rename_missing_source_is_not_found() {
    for_each_backend(|store| {
        assert!(matches!(
            store.update_issue_id("bd-404", "bd-1", "t"),
            Err(BeadsError::IssueNotFound { .. })
        ));
    });
}

#[test]
fn rename_rejects_malformed_target() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "a"), "t").unwrap();
        assert!(store.update_issue_id("bd-1", "BAD ID", "t").is_err());
    });
}

#[test]
fn rename_preserves_event_history() {
    for_each_backend(|store| {
        store.create_issue(&issue("bd-1", "tracked"), "t").unwrap();
        store.update_issue_id("bd-1", "bd-5", "t").unwrap();

        let events = store.get_events("bd-5", 0).unwrap();
        assert!(
            events.len() >= 2,
            "created + rename events expected, got {}",
            events.len()
        );
    });
}
