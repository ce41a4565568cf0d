//! Migration of decision paths between tree versions.

use super::{compare_versions, version_of, DecisionTree, ReplaceMap, TreeError};
use std::cmp::Ordering;

/// Migrate `path` towards `target_version` through the replace map
///
/// Upgrading walks one hop at a time: the next hop is the lowest version above the
/// current one (and not above the target) whose replace entries map the current path,
/// either exactly or through the longest dotted prefix. Downgrading inverts the entries
/// of the current path's version, preferring the highest older version not below the target.
///
/// The walk stops at the first version without an applicable hop and returns the path
/// reached so far. A path already under `target_version` is returned as is.
///
/// # Errors
///
/// Returns [`TreeError::InvalidPath`] when `target_version` is not in the tree.
pub fn replace_path(
    path: &str,
    target_version: &str,
    tree: &DecisionTree,
    replace: &ReplaceMap,
) -> Result<String, TreeError> {
    if tree.root(target_version).is_none() {
        return Err(TreeError::InvalidPath {
            path: path.to_string(),
            reason: format!("unknown target version {target_version:?}"),
        });
    }

    let mut current = path.to_string();
    let direction = compare_versions(version_of(&current), target_version);
    loop {
        let current_version = version_of(&current).to_string();
        if current_version == target_version {
            break;
        }
        let next = match direction {
            Ordering::Less => upgrade_hop(&current, &current_version, target_version, replace),
            Ordering::Greater => downgrade_hop(&current, &current_version, target_version, replace),
            Ordering::Equal => None,
        };
        match next {
            // Every hop must move strictly towards the target
            Some(next) if compare_versions(version_of(&next), &current_version) == direction.reverse() => {
                current = next;
            }
            _ => break,
        }
    }
    Ok(current)
}

fn upgrade_hop(current: &str, current_version: &str, target: &str, replace: &ReplaceMap) -> Option<String> {
    let mut hops: Vec<&str> = replace
        .versions()
        .filter(|v| {
            compare_versions(v, current_version) == Ordering::Greater
                && compare_versions(v, target) != Ordering::Greater
        })
        .collect();
    hops.sort_by(|a, b| compare_versions(a, b));
    hops.into_iter()
        .find_map(|v| lookup(replace.for_version(v), current, Direction::Forward))
}

fn downgrade_hop(current: &str, current_version: &str, target: &str, replace: &ReplaceMap) -> Option<String> {
    let candidates = lookup_all(replace.for_version(current_version), current, Direction::Backward);
    candidates
        .into_iter()
        .filter(|(candidate, _)| {
            let v = version_of(candidate);
            compare_versions(v, target) != Ordering::Less
                && compare_versions(v, current_version) == Ordering::Less
        })
        .max_by(|(a, a_len), (b, b_len)| {
            compare_versions(version_of(a), version_of(b)).then(a_len.cmp(b_len))
        })
        .map(|(candidate, _)| candidate)
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Exact match first, then the longest dotted prefix
fn lookup(entries: &[(String, String)], path: &str, direction: Direction) -> Option<String> {
    lookup_all(entries, path, direction)
        .into_iter()
        .max_by_key(|(_, matched_len)| *matched_len)
        .map(|(candidate, _)| candidate)
}

/// Every rewrite of `path` allowed by `entries`, paired with the matched key length
fn lookup_all(entries: &[(String, String)], path: &str, direction: Direction) -> Vec<(String, usize)> {
    entries
        .iter()
        .filter_map(|(from, to)| {
            let (key, value) = match direction {
                Direction::Forward => (from, to),
                Direction::Backward => (to, from),
            };
            let rest = path.strip_prefix(key.as_str())?;
            (rest.is_empty() || rest.starts_with('.')).then(|| (format!("{value}{rest}"), key.len()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse;

    const LTPA: &str = r#"
tree:
  v1_4_0:
    type:
      keys:
        managePasswordEncryption: [false, true]
  v1_4_2:
    type:
      keys:
        managePasswordEncryption: [false, true]
      config:
        managePasswordEncryption: [false, true]
replace:
  v1_4_2:
    v1_4_0.type.keys: v1_4_2.type.keys
"#;

    #[test]
    fn test_prefix_upgrade_keeps_suffix() {
        let (tree, replace) = parse(LTPA).unwrap();
        assert_eq!(
            replace_path("v1_4_0.type.keys.managePasswordEncryption.true", "v1_4_2", &tree, &replace).unwrap(),
            "v1_4_2.type.keys.managePasswordEncryption.true"
        );
    }

    #[test]
    fn test_prefix_downgrade() {
        let (tree, replace) = parse(LTPA).unwrap();
        assert_eq!(
            replace_path("v1_4_2.type.keys.managePasswordEncryption.false", "v1_4_0", &tree, &replace).unwrap(),
            "v1_4_0.type.keys.managePasswordEncryption.false"
        );
    }

    #[test]
    fn test_unmapped_path_is_retained() {
        let (tree, replace) = parse(LTPA).unwrap();
        assert_eq!(
            replace_path("v1_4_2.type.config.managePasswordEncryption.true", "v1_4_0", &tree, &replace).unwrap(),
            "v1_4_2.type.config.managePasswordEncryption.true"
        );
    }

    #[test]
    fn test_same_version_is_identity() {
        let (tree, replace) = parse(LTPA).unwrap();
        let path = "v1_4_2.type.keys.managePasswordEncryption.true";
        assert_eq!(replace_path(path, "v1_4_2", &tree, &replace).unwrap(), path);
    }

    #[test]
    fn test_prefix_must_end_on_dot_boundary() {
        let (tree, replace) = parse(LTPA).unwrap();
        assert_eq!(
            replace_path("v1_4_0.type.keysx", "v1_4_2", &tree, &replace).unwrap(),
            "v1_4_0.type.keysx"
        );
    }

    #[test]
    fn test_unknown_target_version() {
        let (tree, replace) = parse(LTPA).unwrap();
        assert!(matches!(
            replace_path("v1_4_0.type.keys", "v2_0_0", &tree, &replace),
            Err(TreeError::InvalidPath { .. })
        ));
    }
}
