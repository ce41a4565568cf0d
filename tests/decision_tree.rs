//! # Decision Tree Tests
//!
//! These tests verify, against a multi-version tree:
//! - Leaf indexing and path round-trips for every version
//! - Multi-hop upgrades and downgrades through the replace map
//! - Latest-version selection

use open_liberty_operator::tree::{
    can_traverse, get_latest_version, get_leaf_index, get_path_from_leaf_index, label_from_path,
    parse, path_index_of, replace_path, DecisionTree, ReplaceMap,
};

const COMPLEX_TREE: &str = include_str!("fixtures/complex-decision-tree.yaml");

fn complex() -> (DecisionTree, ReplaceMap) {
    parse(COMPLEX_TREE).expect("fixture tree should parse")
}

#[test]
fn test_every_leaf_round_trips() {
    let (tree, _) = complex();
    let versions: Vec<String> = tree.versions().map(str::to_string).collect();
    for version in &versions {
        for (index, leaf) in tree.leaves(version).iter().enumerate() {
            let valid = can_traverse(&tree, leaf, false).unwrap();
            assert_eq!(get_leaf_index(&tree, &valid).unwrap(), index);
            assert_eq!(get_path_from_leaf_index(&tree, version, index).unwrap(), valid);
        }
    }
}

#[test]
fn test_leaf_indices() {
    let (tree, _) = complex();
    assert_eq!(path_index_of(&tree, "v10_4_1.a.b.e.true").unwrap(), "v10_4_1.2");
    assert_eq!(path_index_of(&tree, "v10_4_1.a.b.e.false").unwrap(), "v10_4_1.3");
    assert_eq!(path_index_of(&tree, "v10_4_1.j.fizz").unwrap(), "v10_4_1.4");
    assert_eq!(path_index_of(&tree, "v10_4_500.a.f.g.i.bar").unwrap(), "v10_4_500.4");
    assert!(get_path_from_leaf_index(&tree, "v10_4_1", 5).is_err());
}

#[test]
fn test_can_traverse_reports_valid_prefix() {
    let (tree, _) = complex();
    let label = label_from_path("v10_4_500", &["a", "f", "i"], &["f", "g", "bar"]).unwrap();
    assert_eq!(label, "v10_4_500.a.f.f.g.i.bar");
    assert!(can_traverse(&tree, &label, false).is_err());
    assert_eq!(can_traverse(&tree, &label, true).unwrap(), "v10_4_500.a.f");
}

#[test]
fn test_upgrade_walks_every_hop() {
    let (tree, replace) = complex();
    assert_eq!(
        replace_path("v10_4_1.a.b.e.true", "v10_4_500", &tree, &replace).unwrap(),
        "v10_4_500.a.b.b.true"
    );
    assert_eq!(
        replace_path("v10_3_3.a.b", "v10_4_500", &tree, &replace).unwrap(),
        "v10_4_500.a.b.b.true"
    );
}

#[test]
fn test_upgrade_stops_at_target() {
    let (tree, replace) = complex();
    assert_eq!(
        replace_path("v10_4_1.a.b.e.false", "v10_4_20", &tree, &replace).unwrap(),
        "v10_4_20.a.c.g.false"
    );
}

#[test]
fn test_downgrade_stops_at_first_unmapped_version() {
    let (tree, replace) = complex();
    assert_eq!(
        replace_path("v10_4_500.a.f.g.i.bar", "v10_3_3", &tree, &replace).unwrap(),
        "v10_4_1.a.b.e.false"
    );
    assert_eq!(
        replace_path("v10_4_500.a.b.b.true", "v10_3_3", &tree, &replace).unwrap(),
        "v10_3_3.a.b"
    );
}

#[test]
fn test_replace_is_idempotent_within_version() {
    let (tree, replace) = complex();
    for version in ["v10_3_3", "v10_4_1", "v10_4_20", "v10_4_500"] {
        for leaf in tree.leaves(version) {
            assert_eq!(replace_path(&leaf, version, &tree, &replace).unwrap(), leaf);
        }
    }
}

#[test]
fn test_latest_version() {
    let (tree, _) = complex();
    assert_eq!(get_latest_version(&tree, None).unwrap(), "v10_4_500");
    assert_eq!(get_latest_version(&tree, Some("v10_4_99")).unwrap(), "v10_4_20");
    assert!(get_latest_version(&tree, Some("v9_0_0")).is_err());
}
