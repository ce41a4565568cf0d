//! # Decision Tree
//!
//! A versioned tree of legal shared-resource configurations.
//!
//! Each operator version (`v1_4_0`, `v10_4_500`, ...) roots a tree whose edges are
//! spec options and choices. A full path such as `v1_4_2.type.keys.managePasswordEncryption.true`
//! identifies one shared resource. Leaves are enumerated depth-first, left to right, so a
//! path can be stored compactly as `<version>.<leafIndex>` in a Kubernetes label.
//!
//! A separate replace map migrates paths between versions so records written by an older
//! (or newer) operator can be reinterpreted without rewriting them.
//!
//! ## Document format
//!
//! ```yaml
//! tree:
//!   v1_4_0:
//!     type:
//!       keys:
//!         managePasswordEncryption: [false, true]
//! replace:
//!   v1_4_2:
//!     v1_4_0.type.keys: v1_4_2.type.keys
//! ```

mod replace;
mod traverse;

pub use replace::replace_path;
pub use traverse::{
    can_traverse, get_leaf_index, get_path_from_leaf_index, label_from_path, path_index_of,
    split_path_index,
};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Wildcard choice binding any concrete token
pub const WILDCARD: &str = "*";

/// Decision tree errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid decision tree: {0}")]
    InvalidTree(String),

    #[error("decision tree has no version{}", .0.as_ref().map(|s| format!(" at or below {s}")).unwrap_or_default())]
    NoVersion(Option<String>),

    #[error("leaf index {index} is out of range for version {version}")]
    OutOfRange { version: String, index: usize },

    #[error("invalid decision path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
}

/// A node below a version root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Ordered edges to child nodes, in document order
    Branch(Vec<(String, Node)>),
    /// Terminal choices; each one is a leaf of its own
    Leaves(Vec<String>),
}

impl Node {
    fn child(&self, token: &str) -> Option<(&str, &Node)> {
        let Node::Branch(children) = self else {
            return None;
        };
        children
            .iter()
            .find(|(edge, _)| edge == token)
            .or_else(|| children.iter().find(|(edge, _)| edge == WILDCARD))
            .map(|(edge, node)| (edge.as_str(), node))
    }

    fn leaf(&self, token: &str) -> Option<&str> {
        let Node::Leaves(choices) = self else {
            return None;
        };
        choices
            .iter()
            .find(|choice| *choice == token)
            .or_else(|| choices.iter().find(|choice| *choice == WILDCARD))
            .map(String::as_str)
    }

    /// Push every full path below this node onto `out`, depth-first in document order
    fn collect_leaves(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            Node::Branch(children) => {
                for (edge, child) in children {
                    child.collect_leaves(&format!("{prefix}.{edge}"), out);
                }
            }
            Node::Leaves(choices) => {
                for choice in choices {
                    out.push(format!("{prefix}.{choice}"));
                }
            }
        }
    }
}

/// Parsed decision tree: version roots in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionTree {
    roots: Vec<(String, Node)>,
}

/// Replace map: newer version -> (older path -> newer path)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceMap {
    entries: BTreeMap<String, Vec<(String, String)>>,
}

impl ReplaceMap {
    pub(crate) fn for_version(&self, version: &str) -> &[(String, String)] {
        self.entries.get(version).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn versions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl DecisionTree {
    /// Root node of `version`
    pub fn root(&self, version: &str) -> Option<&Node> {
        self.roots
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, node)| node)
    }

    /// Versions in document order
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(|(v, _)| v.as_str())
    }

    /// Every full path of `version`, in leaf-index order
    pub fn leaves(&self, version: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(node) = self.root(version) {
            node.collect_leaves(version, &mut out);
        }
        out
    }
}

/// Parse a decision tree document into its tree and replace map
///
/// # Errors
///
/// Returns [`TreeError::InvalidTree`] when the YAML is malformed, a version has no roots,
/// a mapping has no children, a leaf is not a primitive, or a version token is not
/// of the form `v<major>_<minor>_<patch>`.
pub fn parse(document: &str) -> Result<(DecisionTree, ReplaceMap), TreeError> {
    let value: serde_yaml::Value = serde_yaml::from_str(document)
        .map_err(|e| TreeError::InvalidTree(format!("malformed YAML: {e}")))?;
    let serde_yaml::Value::Mapping(top) = value else {
        return Err(TreeError::InvalidTree("document is not a mapping".to_string()));
    };

    let tree_value = top
        .get("tree")
        .ok_or_else(|| TreeError::InvalidTree("missing `tree` section".to_string()))?;
    let serde_yaml::Value::Mapping(versions) = tree_value else {
        return Err(TreeError::InvalidTree("`tree` is not a mapping".to_string()));
    };
    if versions.is_empty() {
        return Err(TreeError::InvalidTree("`tree` has no versions".to_string()));
    }

    let mut roots = Vec::with_capacity(versions.len());
    for (key, node) in versions {
        let version = scalar(key).ok_or_else(|| {
            TreeError::InvalidTree("version keys must be strings".to_string())
        })?;
        parse_version(&version)?;
        if !matches!(node, serde_yaml::Value::Mapping(m) if !m.is_empty()) {
            return Err(TreeError::InvalidTree(format!(
                "version {version} must contain at least one root"
            )));
        }
        roots.push((version.clone(), parse_node(node, &version)?));
    }

    let mut entries = BTreeMap::new();
    if let Some(replace) = top.get("replace") {
        match replace {
            serde_yaml::Value::Null => {}
            serde_yaml::Value::Mapping(by_version) => {
                for (key, mappings) in by_version {
                    let version = scalar(key).ok_or_else(|| {
                        TreeError::InvalidTree("replace keys must be strings".to_string())
                    })?;
                    parse_version(&version)?;
                    let serde_yaml::Value::Mapping(mappings) = mappings else {
                        return Err(TreeError::InvalidTree(format!(
                            "replace entry for {version} is not a mapping"
                        )));
                    };
                    let mut pairs = Vec::with_capacity(mappings.len());
                    for (from, to) in mappings {
                        match (from.as_str(), to.as_str()) {
                            (Some(from), Some(to)) => pairs.push((from.to_string(), to.to_string())),
                            _ => {
                                return Err(TreeError::InvalidTree(format!(
                                    "replace entry for {version} must map strings to strings"
                                )))
                            }
                        }
                    }
                    entries.insert(version, pairs);
                }
            }
            _ => return Err(TreeError::InvalidTree("`replace` is not a mapping".to_string())),
        }
    }

    Ok((DecisionTree { roots }, ReplaceMap { entries }))
}

fn parse_node(value: &serde_yaml::Value, at: &str) -> Result<Node, TreeError> {
    match value {
        serde_yaml::Value::Mapping(children) => {
            if children.is_empty() {
                return Err(TreeError::InvalidTree(format!("{at} has no children")));
            }
            let mut edges = Vec::with_capacity(children.len());
            for (key, child) in children {
                let edge = scalar(key)
                    .ok_or_else(|| TreeError::InvalidTree(format!("{at} has a non-primitive key")))?;
                let child_at = format!("{at}.{edge}");
                edges.push((edge, parse_node(child, &child_at)?));
            }
            Ok(Node::Branch(edges))
        }
        serde_yaml::Value::Sequence(items) => {
            if items.is_empty() {
                return Err(TreeError::InvalidTree(format!("{at} has no children")));
            }
            items
                .iter()
                .map(|item| {
                    scalar(item).ok_or_else(|| {
                        TreeError::InvalidTree(format!("{at} has a leaf that is not a primitive"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Node::Leaves)
        }
        other => scalar(other)
            .map(|choice| Node::Leaves(vec![choice]))
            .ok_or_else(|| TreeError::InvalidTree(format!("{at} has a leaf that is not a primitive"))),
    }
}

/// Render a YAML primitive as a path token
fn scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) if !s.is_empty() && !s.contains('.') => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse `v10_4_500` into a semantic version
///
/// # Errors
///
/// Returns [`TreeError::InvalidTree`] for tokens not shaped `v<major>_<minor>_<patch>`.
pub fn parse_version(version: &str) -> Result<semver::Version, TreeError> {
    version
        .strip_prefix('v')
        .map(|rest| rest.replace('_', "."))
        .and_then(|dotted| semver::Version::parse(&dotted).ok())
        .ok_or_else(|| TreeError::InvalidTree(format!("invalid version token {version:?}")))
}

/// Order two version tokens semantically, falling back to lexicographic order on ties
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// The version token a path is written under
pub fn version_of(path: &str) -> &str {
    path.split('.').next().unwrap_or_default()
}

/// Greatest version in the tree, optionally bounded above by `since`
///
/// # Errors
///
/// Returns [`TreeError::NoVersion`] when no version qualifies.
pub fn get_latest_version(tree: &DecisionTree, since: Option<&str>) -> Result<String, TreeError> {
    tree.versions()
        .filter(|v| since.is_none_or(|bound| compare_versions(v, bound) != Ordering::Greater))
        .max_by(|a, b| compare_versions(a, b))
        .map(str::to_string)
        .ok_or_else(|| TreeError::NoVersion(since.map(str::to_string)))
}
