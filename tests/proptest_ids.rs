//! Property tests for ID handling and counter monotonicity.

mod common;

use beads_core::storage::Store;
use beads_core::util::id::{format_id, id_sort_key, parse_id};
use common::fixtures::issue;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Formatting then parsing a valid (prefix, n) pair is lossless.
    #[test]
    fn format_parse_roundtrip(
        prefix in "[a-z][a-z0-9]{0,7}",
        n in 1_u64..1_000_000,
    ) {
        let id = format_id(&prefix, n);
        let (parsed_prefix, parsed_n) = parse_id(&id).unwrap();
        prop_assert_eq!(parsed_prefix, prefix.as_str());
        prop_assert_eq!(parsed_n, n);
    }

    /// Numeric-aware sorting orders same-prefix IDs by suffix value.
    #[test]
    fn sort_key_orders_numerically(mut suffixes in proptest::collection::vec(1_u64..10_000, 2..20)) {
        suffixes.sort_unstable();
        suffixes.dedup();

        let mut ids: Vec<String> = suffixes.iter().map(|n| format_id("bd", *n)).collect();
        ids.reverse();
        ids.sort_by_key(|id| id_sort_key(id));

        let resorted: Vec<u64> = ids.iter().map(|id| parse_id(id).unwrap().1).collect();
        prop_assert_eq!(resorted, suffixes);
    }

    /// After creating issues with arbitrary suffixes, the next issued
    /// counter value strictly exceeds every existing suffix.
    #[test]
    fn counter_exceeds_existing_ids(suffixes in proptest::collection::hash_set(1_u64..500, 1..12)) {
        let mut store = common::sqlite_store();
        for n in &suffixes {
            store.create_issue(&issue(&format_id("bd", *n), "seed"), "t").unwrap();
        }

        let max = *suffixes.iter().max().unwrap();
        let next = store.increment_counter("bd").unwrap();
        prop_assert!(next > max, "next={} max={}", next, max);

        // And the issued value is itself unused.
        let ids: HashSet<String> = suffixes.iter().map(|n| format_id("bd", *n)).collect();
        prop_assert!(!ids.contains(&format_id("bd", next)));
    }

    /// Auto-assigned IDs never collide within a session.
    #[test]
    fn auto_ids_unique(count in 1_usize..20) {
        let mut store = common::sqlite_store();
        let mut seen = HashSet::new();
        for i in 0..count {
            let created = store
                .create_issue(&issue("", &format!("auto {i}")), "t")
                .unwrap();
            prop_assert!(seen.insert(created.id.clone()), "duplicate {}", created.id);
        }
    }
}
