//! # Leader Tracker Tests
//!
//! These tests verify:
//! - Tracker rebuild from discovered shared resources across tree versions
//! - Downgrades retain paths that cannot be migrated
//! - Tracker Secret columns stay aligned through encode and decode
//! - Election keeps a single owner per shared resource

use open_liberty_operator::constants::{
    TRACKER_KEY_NAMES, TRACKER_KEY_OWNERS, TRACKER_KEY_PATHS, TRACKER_KEY_PATH_INDICES,
    TRACKER_KEY_SUBLEASES,
};
use open_liberty_operator::leader::secret::{column, decode, encode};
use open_liberty_operator::leader::{DiscoveredResource, LeaderMetadata, LeaderTracker};
use open_liberty_operator::tree::parse;

const COMPLEX_TREE: &str = include_str!("fixtures/complex-decision-tree.yaml");
const NOW: i64 = 1_700_000_000;

fn discovered(pairs: &[(&str, &str)]) -> Vec<DiscoveredResource> {
    pairs
        .iter()
        .map(|(name, path_index)| DiscoveredResource {
            name: (*name).to_string(),
            path_index: (*path_index).to_string(),
        })
        .collect()
}

fn rebuild(pairs: &[(&str, &str)], latest: &str) -> LeaderTracker {
    let (tree, replace) = parse(COMPLEX_TREE).unwrap();
    LeaderTracker::rebuild(&discovered(pairs), &tree, &replace, latest, NOW)
}

#[test]
fn test_rebuild_upgrades_mapped_paths() {
    let tracker = rebuild(
        &[
            ("-ccccc", "v10_4_1.4"),
            ("-bazc1", "v10_4_1.3"),
            ("-b12g1", "v10_4_1.2"),
        ],
        "v10_4_500",
    );
    let secret = encode("olo-managed-leader-tracking-ltpa", "default", &tracker);

    assert_eq!(column(&secret, TRACKER_KEY_NAMES).unwrap(), "-b12g1,-bazc1,-ccccc");
    assert_eq!(
        column(&secret, TRACKER_KEY_PATHS).unwrap(),
        "v10_4_500.a.b.b.true,v10_4_500.a.f.g.i.bar,v10_4_1.j.fizz"
    );
    assert_eq!(
        column(&secret, TRACKER_KEY_PATH_INDICES).unwrap(),
        "v10_4_500.0,v10_4_500.4,v10_4_1.4"
    );
    assert_eq!(column(&secret, TRACKER_KEY_OWNERS).unwrap(), ",,");
    assert_eq!(tracker.version, "v10_4_500");
}

#[test]
fn test_rebuild_downgrade_retains_unmapped_paths() {
    let tracker = rebuild(
        &[
            ("-b12g1", "v10_4_500.0"),
            ("-bazc1", "v10_4_500.4"),
            ("-ccccc", "v10_4_1.4"),
        ],
        "v10_3_3",
    );
    let secret = encode("olo-managed-leader-tracking-ltpa", "default", &tracker);

    assert_eq!(
        column(&secret, TRACKER_KEY_PATHS).unwrap(),
        "v10_3_3.a.b,v10_4_1.a.b.e.false,v10_4_1.j.fizz"
    );
    assert_eq!(
        column(&secret, TRACKER_KEY_PATH_INDICES).unwrap(),
        "v10_3_3.0,v10_4_1.3,v10_4_1.4"
    );
}

#[test]
fn test_rebuild_skips_unresolvable_indices() {
    let tracker = rebuild(
        &[("-aaaaa", "v10_4_1.99"), ("-bbbbb", "garbage"), ("-ccccc", "v10_4_1.4")],
        "v10_4_500",
    );
    assert_eq!(tracker.entries.len(), 1);
    assert_eq!(tracker.entries[0].name, "-ccccc");
}

#[test]
fn test_rebuild_deduplicates_entries() {
    let tracker = rebuild(&[("-b12g1", "v10_4_1.2"), ("-b12g1", "v10_4_20.0")], "v10_4_500");
    assert_eq!(tracker.entries.len(), 1);
    assert_eq!(tracker.entries[0].path_index, "v10_4_500.0");
}

#[test]
fn test_columns_stay_aligned_through_decode() {
    let mut tracker = rebuild(
        &[("-b12g1", "v10_4_1.2"), ("-bazc1", "v10_4_1.3")],
        "v10_4_500",
    );
    let metadata = LeaderMetadata {
        name: "-b12g1".to_string(),
        path: "v10_4_500.a.b.b.true".to_string(),
        path_index: "v10_4_500.0".to_string(),
    };
    assert!(tracker.elect("web", &metadata, true, NOW).is_leader);

    let secret = encode("olo-managed-leader-tracking-ltpa", "default", &tracker);
    let decoded = decode(&secret).unwrap();
    assert_eq!(decoded, tracker);

    let lengths: Vec<usize> = [
        TRACKER_KEY_NAMES,
        TRACKER_KEY_OWNERS,
        TRACKER_KEY_PATHS,
        TRACKER_KEY_PATH_INDICES,
        TRACKER_KEY_SUBLEASES,
    ]
    .iter()
    .map(|key| column(&secret, key).unwrap().split(',').count())
    .collect();
    assert!(lengths.iter().all(|len| *len == 2), "{lengths:?}");
}

#[test]
fn test_second_instance_follows_first_leader() {
    let mut tracker = LeaderTracker::new("v10_4_500");
    let metadata = LeaderMetadata {
        name: "-bazc1".to_string(),
        path: "v10_4_500.a.f.g.i.bar".to_string(),
        path_index: "v10_4_500.4".to_string(),
    };

    let first = tracker.elect("app-a", &metadata, true, NOW);
    let second = tracker.elect("app-b", &metadata, true, NOW + 1);

    assert!(first.is_leader);
    assert!(!second.is_leader);
    assert_eq!(second.leader, "app-a");
    assert_eq!(
        tracker.entries.iter().filter(|e| !e.owner.is_empty()).count(),
        1
    );
}
