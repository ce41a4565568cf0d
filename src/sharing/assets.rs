//! # Bundled Assets
//!
//! Decision trees, signatures and the LTPA generator script.
//!
//! Assets are compiled into the binary. When `ASSETS_DIR` is set, files found there take
//! precedence, so a deployment can ship updated trees without a rebuild.

use super::{Family, Signature};
use crate::tree::{self, DecisionTree, ReplaceMap};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const BUILTIN: &[(&str, &str)] = &[
    (
        "ltpa-decision-tree.yaml",
        include_str!("../../assets/ltpa-decision-tree.yaml"),
    ),
    (
        "password-encryption-decision-tree.yaml",
        include_str!("../../assets/password-encryption-decision-tree.yaml"),
    ),
    (
        "trace-decision-tree.yaml",
        include_str!("../../assets/trace-decision-tree.yaml"),
    ),
    (
        "ltpa-signature.yaml",
        include_str!("../../assets/ltpa-signature.yaml"),
    ),
    (
        "ltpa-config-signature.yaml",
        include_str!("../../assets/ltpa-config-signature.yaml"),
    ),
    (
        "password-encryption-signature.yaml",
        include_str!("../../assets/password-encryption-signature.yaml"),
    ),
    (
        "trace-signature.yaml",
        include_str!("../../assets/trace-signature.yaml"),
    ),
    (
        crate::constants::LTPA_SCRIPT_FILE,
        include_str!("../../assets/create_ltpa_keys.sh"),
    ),
];

/// A parsed decision tree with its latest version resolved
#[derive(Debug, Clone)]
pub struct SharedTree {
    pub tree: DecisionTree,
    pub replace: ReplaceMap,
    /// Version new tracker records are written against
    pub latest: String,
}

impl SharedTree {
    /// Parse a tree document, optionally pinning the latest version
    ///
    /// # Errors
    ///
    /// Returns an error for malformed trees or when no version satisfies the pin.
    pub fn parse(document: &str, pin: Option<&str>) -> Result<Self, tree::TreeError> {
        let (tree, replace) = tree::parse(document)?;
        let latest = tree::get_latest_version(&tree, pin)?;
        Ok(Self {
            tree,
            replace,
            latest,
        })
    }
}

/// Every asset the sharing layer needs, loaded once at startup
#[derive(Debug, Clone)]
pub struct SharingAssets {
    trees: HashMap<&'static str, SharedTree>,
    signatures: HashMap<&'static str, Vec<Signature>>,
    ltpa_script: String,
}

impl SharingAssets {
    /// Load assets from `dir` when given, falling back to the built-in copies
    ///
    /// # Errors
    ///
    /// Returns an error when an asset cannot be read or parsed.
    pub fn load(dir: Option<&Path>, tree_version_pin: Option<&str>) -> Result<Self> {
        let mut trees = HashMap::new();
        let mut signatures = HashMap::new();
        for family in Family::ALL {
            let tree_name = family.tree_name();
            if !trees.contains_key(tree_name) {
                let file = format!("{tree_name}-decision-tree.yaml");
                let document = read_asset(dir, &file)?;
                let shared = SharedTree::parse(&document, tree_version_pin)
                    .with_context(|| format!("Failed to parse decision tree {file}"))?;
                info!("🌳 Loaded {} decision tree at version {}", tree_name, shared.latest);
                trees.insert(tree_name, shared);
            }
            let signature_name = family.signature_name();
            if !signatures.contains_key(signature_name) {
                let file = format!("{signature_name}-signature.yaml");
                let document = read_asset(dir, &file)?;
                let parsed = Signature::parse_list(&document)
                    .with_context(|| format!("Failed to parse signature file {file}"))?;
                signatures.insert(signature_name, parsed);
            }
        }
        let ltpa_script = read_asset(dir, crate::constants::LTPA_SCRIPT_FILE)?;
        Ok(Self {
            trees,
            signatures,
            ltpa_script,
        })
    }

    /// Built-in assets only
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in asset fails to parse.
    pub fn builtin() -> Result<Self> {
        Self::load(None, None)
    }

    /// Decision tree describing `family`
    pub fn tree(&self, family: Family) -> &SharedTree {
        // Every family's tree is loaded in `load`
        &self.trees[family.tree_name()]
    }

    /// Signatures `family` is discovered through
    pub fn signatures(&self, family: Family) -> &[Signature] {
        self.signatures
            .get(family.signature_name())
            .map_or(&[], Vec::as_slice)
    }

    /// LTPA keys generator script
    pub fn ltpa_script(&self) -> &str {
        &self.ltpa_script
    }
}

fn read_asset(dir: Option<&Path>, file: &str) -> Result<String> {
    if let Some(dir) = dir {
        let path = dir.join(file);
        if path.exists() {
            return std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read asset {}", path.display()));
        }
    }
    BUILTIN
        .iter()
        .find(|(name, _)| *name == file)
        .map(|(_, content)| (*content).to_string())
        .with_context(|| format!("No built-in asset named {file}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_assets_load() {
        let assets = SharingAssets::builtin().unwrap();
        assert_eq!(assets.tree(Family::Ltpa).latest, "v1_4_2");
        assert_eq!(assets.tree(Family::PasswordEncryption).latest, "v1_4_0");
        assert_eq!(assets.tree(Family::Trace).latest, "v1_4_0");
        assert_eq!(assets.signatures(Family::Trace)[0].kind, "OpenLibertyTrace");
        assert!(assets.ltpa_script().starts_with("#!"));
    }

    #[test]
    fn test_assets_dir_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("trace-decision-tree.yaml"),
            "tree:\n  v1_5_0:\n    pod: \"*\"\n",
        )
        .unwrap();
        let assets = SharingAssets::load(Some(dir.path()), None).unwrap();
        assert_eq!(assets.tree(Family::Trace).latest, "v1_5_0");
        assert_eq!(assets.tree(Family::Ltpa).latest, "v1_4_2");
    }

    #[test]
    fn test_version_pin() {
        let assets = SharingAssets::load(None, Some("v1_4_0")).unwrap();
        assert_eq!(assets.tree(Family::Ltpa).latest, "v1_4_0");
    }
}
