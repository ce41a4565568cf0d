//! Path construction, traversal and leaf indexing.

use super::{version_of, DecisionTree, Node, TreeError};

/// Weave a version, options and choices into `v.opt0.choice0.opt1.choice1...`
///
/// # Errors
///
/// Returns [`TreeError::InvalidPath`] when `options` and `choices` differ in length.
pub fn label_from_path(version: &str, options: &[&str], choices: &[&str]) -> Result<String, TreeError> {
    if options.len() != choices.len() {
        return Err(TreeError::InvalidPath {
            path: version.to_string(),
            reason: format!(
                "{} options but {} choices",
                options.len(),
                choices.len()
            ),
        });
    }
    let mut label = version.to_string();
    for (option, choice) in options.iter().zip(choices) {
        label.push('.');
        label.push_str(option);
        label.push('.');
        label.push_str(choice);
    }
    Ok(label)
}

/// Longest valid prefix of `label` in `tree`
///
/// Concrete tokens bound by a `*` edge are returned as `*` so the result can be used
/// for leaf-index lookup. With `allow_subpath == false` the label must end exactly on a leaf.
///
/// # Errors
///
/// Returns [`TreeError::InvalidPath`] when the version is unknown or, without
/// `allow_subpath`, when the label does not name a complete leaf path.
pub fn can_traverse(tree: &DecisionTree, label: &str, allow_subpath: bool) -> Result<String, TreeError> {
    let mut tokens = label.split('.');
    let version = tokens.next().unwrap_or_default();
    let mut node = tree.root(version).ok_or_else(|| TreeError::InvalidPath {
        path: label.to_string(),
        reason: format!("unknown version {version:?}"),
    })?;

    let rest: Vec<&str> = tokens.collect();
    let mut valid = vec![version];
    let mut consumed = 0;
    let mut reached_leaf = false;

    for token in &rest {
        match node {
            Node::Branch(_) => match node.child(token) {
                Some((edge, child)) => {
                    valid.push(edge);
                    node = child;
                    consumed += 1;
                }
                None => break,
            },
            Node::Leaves(_) => {
                if let Some(choice) = node.leaf(token) {
                    valid.push(choice);
                    consumed += 1;
                    reached_leaf = true;
                }
                break;
            }
        }
    }

    let subpath = valid.join(".");
    if (reached_leaf && consumed == rest.len()) || allow_subpath {
        Ok(subpath)
    } else {
        Err(TreeError::InvalidPath {
            path: label.to_string(),
            reason: format!("only {subpath:?} is a valid prefix"),
        })
    }
}

/// Leaf index of a full path within its version
///
/// # Errors
///
/// Returns [`TreeError::InvalidPath`] when the path does not end on a leaf.
pub fn get_leaf_index(tree: &DecisionTree, valid_subpath: &str) -> Result<usize, TreeError> {
    tree.leaves(version_of(valid_subpath))
        .iter()
        .position(|leaf| leaf == valid_subpath)
        .ok_or_else(|| TreeError::InvalidPath {
            path: valid_subpath.to_string(),
            reason: "path does not end on a leaf".to_string(),
        })
}

/// Full path of the `index`-th leaf of `version`
///
/// # Errors
///
/// Returns [`TreeError::OutOfRange`] when the version has fewer leaves.
pub fn get_path_from_leaf_index(tree: &DecisionTree, version: &str, index: usize) -> Result<String, TreeError> {
    tree.leaves(version)
        .into_iter()
        .nth(index)
        .ok_or_else(|| TreeError::OutOfRange {
            version: version.to_string(),
            index,
        })
}

/// `<version>.<leafIndex>` for a full path
///
/// # Errors
///
/// Propagates traversal and indexing errors.
pub fn path_index_of(tree: &DecisionTree, path: &str) -> Result<String, TreeError> {
    let valid = can_traverse(tree, path, false)?;
    let index = get_leaf_index(tree, &valid)?;
    Ok(format!("{}.{index}", version_of(&valid)))
}

/// Split `<version>.<leafIndex>` into its parts
pub fn split_path_index(path_index: &str) -> Option<(&str, usize)> {
    let (version, index) = path_index.rsplit_once('.')?;
    if version.is_empty() || version.contains('.') {
        return None;
    }
    Some((version, index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse;

    const TREE: &str = r#"
tree:
  v1_0_0:
    a:
      b:
        c: [true, false]
      d: "*"
    e: [x, "*"]
"#;

    fn tree() -> DecisionTree {
        parse(TREE).unwrap().0
    }

    #[test]
    fn test_label_from_path() {
        assert_eq!(
            label_from_path("v1_0_0", &["a", "c"], &["b", "true"]).unwrap(),
            "v1_0_0.a.b.c.true"
        );
        assert!(matches!(
            label_from_path("v1_0_0", &["a"], &[]),
            Err(TreeError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_can_traverse_full_path() {
        assert_eq!(
            can_traverse(&tree(), "v1_0_0.a.b.c.false", false).unwrap(),
            "v1_0_0.a.b.c.false"
        );
    }

    #[test]
    fn test_can_traverse_substitutes_wildcard() {
        assert_eq!(
            can_traverse(&tree(), "v1_0_0.a.d.my-pod", false).unwrap(),
            "v1_0_0.a.d.*"
        );
    }

    #[test]
    fn test_can_traverse_prefers_concrete_choice() {
        assert_eq!(can_traverse(&tree(), "v1_0_0.e.x", false).unwrap(), "v1_0_0.e.x");
        assert_eq!(can_traverse(&tree(), "v1_0_0.e.y", false).unwrap(), "v1_0_0.e.*");
    }

    #[test]
    fn test_can_traverse_subpath() {
        assert_eq!(can_traverse(&tree(), "v1_0_0.a.b.z", true).unwrap(), "v1_0_0.a.b");
        assert!(can_traverse(&tree(), "v1_0_0.a.b", false).is_err());
        assert!(can_traverse(&tree(), "v9_9_9.a", true).is_err());
    }

    #[test]
    fn test_leaf_indices_depth_first() {
        let tree = tree();
        assert_eq!(get_leaf_index(&tree, "v1_0_0.a.b.c.true").unwrap(), 0);
        assert_eq!(get_leaf_index(&tree, "v1_0_0.a.b.c.false").unwrap(), 1);
        assert_eq!(get_leaf_index(&tree, "v1_0_0.a.d.*").unwrap(), 2);
        assert_eq!(get_leaf_index(&tree, "v1_0_0.e.x").unwrap(), 3);
        assert_eq!(get_leaf_index(&tree, "v1_0_0.e.*").unwrap(), 4);
        assert!(get_leaf_index(&tree, "v1_0_0.a.b").is_err());
    }

    #[test]
    fn test_path_from_leaf_index() {
        let tree = tree();
        assert_eq!(get_path_from_leaf_index(&tree, "v1_0_0", 2).unwrap(), "v1_0_0.a.d.*");
        assert_eq!(
            get_path_from_leaf_index(&tree, "v1_0_0", 5),
            Err(TreeError::OutOfRange {
                version: "v1_0_0".to_string(),
                index: 5
            })
        );
    }

    #[test]
    fn test_round_trip_every_leaf() {
        let tree = tree();
        for (index, leaf) in tree.leaves("v1_0_0").iter().enumerate() {
            let valid = can_traverse(&tree, leaf, false).unwrap();
            let found = get_leaf_index(&tree, &valid).unwrap();
            assert_eq!(found, index);
            assert_eq!(&get_path_from_leaf_index(&tree, "v1_0_0", found).unwrap(), leaf);
        }
    }

    #[test]
    fn test_path_index_of() {
        assert_eq!(path_index_of(&tree(), "v1_0_0.a.d.pod-b").unwrap(), "v1_0_0.2");
    }

    #[test]
    fn test_split_path_index() {
        assert_eq!(split_path_index("v10_4_500.4"), Some(("v10_4_500", 4)));
        assert_eq!(split_path_index("v10_4_500"), None);
        assert_eq!(split_path_index("v1.a.2"), None);
    }
}
