//! In-memory leader tracker record and the election rules applied to it.

use crate::tree::{self, DecisionTree, ReplaceMap};
use tracing::warn;

/// One tracked shared resource
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaderEntry {
    /// Suffix disambiguating the resource within its family (`-abcde`)
    pub name: String,
    /// Application instance responsible for the resource; empty when evicted
    pub owner: String,
    /// Full decision-tree path
    pub path: String,
    /// `<version>.<leafIndex>` form of `path`
    pub path_index: String,
    /// Unix seconds of the owner's last renewal
    pub sublease: String,
}

impl LeaderEntry {
    fn matches(&self, name: &str, path_index: &str) -> bool {
        self.name == name && self.path_index == path_index
    }
}

/// Identity of a shared resource requested by an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderMetadata {
    pub name: String,
    pub path: String,
    pub path_index: String,
}

/// Result of a leadership decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderDecision {
    /// Current owner, empty when nobody leads
    pub leader: String,
    /// Whether the requesting instance is the owner
    pub is_leader: bool,
    /// Path index of the tracked entry, empty when untracked
    pub path_index: String,
    /// Whether the record must be persisted
    pub changed: bool,
}

impl LeaderDecision {
    fn none() -> Self {
        Self {
            leader: String::new(),
            is_leader: false,
            path_index: String::new(),
            changed: false,
        }
    }
}

/// A resource found in the cluster by family discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub name: String,
    pub path_index: String,
}

/// Per-namespace, per-family ownership record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaderTracker {
    /// Tree version the record was written against
    pub version: String,
    /// Entries kept in ascending name order
    pub entries: Vec<LeaderEntry>,
}

impl LeaderTracker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            entries: Vec::new(),
        }
    }

    /// Build a fresh record from a discovery snapshot
    ///
    /// Owners are evicted so the next reconciles re-elect. Path indices written under
    /// another version are resolved, migrated towards `latest` and re-indexed; entries
    /// whose index cannot be resolved are skipped. Duplicate `(name, pathIndex)` pairs
    /// keep their first occurrence.
    pub fn rebuild(
        discovered: &[DiscoveredResource],
        tree: &DecisionTree,
        replace: &ReplaceMap,
        latest: &str,
        now: i64,
    ) -> Self {
        let mut tracker = Self::new(latest);
        for resource in discovered {
            let Some((version, index)) = tree::split_path_index(&resource.path_index) else {
                warn!(
                    "Skipping shared resource {:?}: malformed path index {:?}",
                    resource.name, resource.path_index
                );
                continue;
            };
            let migrated = tree::get_path_from_leaf_index(tree, version, index)
                .and_then(|path| tree::replace_path(&path, latest, tree, replace))
                .and_then(|path| {
                    let path_index = tree::path_index_of(tree, &path)?;
                    Ok((path, path_index))
                });
            let (path, path_index) = match migrated {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(
                        "Skipping shared resource {:?} with path index {:?}: {}",
                        resource.name, resource.path_index, e
                    );
                    continue;
                }
            };
            if tracker.find(&resource.name, &path_index).is_some() {
                continue;
            }
            tracker.insert_sorted(LeaderEntry {
                name: resource.name.clone(),
                owner: String::new(),
                path,
                path_index,
                sublease: now.to_string(),
            });
        }
        tracker
    }

    pub fn find(&self, name: &str, path_index: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.matches(name, path_index))
    }

    /// Entry sharing the given path index, if any
    pub fn find_by_path_index(&self, path_index: &str) -> Option<&LeaderEntry> {
        self.entries.iter().find(|e| e.path_index == path_index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Insert keeping entries in ascending name order
    pub fn insert_sorted(&mut self, entry: LeaderEntry) {
        let at = self
            .entries
            .partition_point(|e| (e.name.as_str(), e.path_index.as_str()) <= (entry.name.as_str(), entry.path_index.as_str()));
        self.entries.insert(at, entry);
    }

    /// Clear `instance` from every entry except `keep`; returns whether anything changed
    fn clear_instance_except(&mut self, instance: &str, keep: Option<usize>) -> bool {
        let mut changed = false;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if Some(i) != keep && entry.owner == instance {
                entry.owner.clear();
                changed = true;
            }
        }
        changed
    }

    /// Claim, renew or observe leadership of `metadata` for `instance`
    pub fn elect(
        &mut self,
        instance: &str,
        metadata: &LeaderMetadata,
        should_elect: bool,
        now: i64,
    ) -> LeaderDecision {
        let Some(index) = self.find(&metadata.name, &metadata.path_index) else {
            if !should_elect {
                return LeaderDecision::none();
            }
            self.clear_instance_except(instance, None);
            self.insert_sorted(LeaderEntry {
                name: metadata.name.clone(),
                owner: instance.to_string(),
                path: metadata.path.clone(),
                path_index: metadata.path_index.clone(),
                sublease: now.to_string(),
            });
            return LeaderDecision {
                leader: instance.to_string(),
                is_leader: true,
                path_index: metadata.path_index.clone(),
                changed: true,
            };
        };

        let candidate = self.entries[index].owner.clone();
        let path_index = self.entries[index].path_index.clone();

        if !candidate.is_empty() && candidate != instance {
            let changed = self.clear_instance_except(instance, None);
            return LeaderDecision {
                leader: candidate,
                is_leader: false,
                path_index,
                changed,
            };
        }

        if candidate == instance {
            self.entries[index].sublease = now.to_string();
            return LeaderDecision {
                leader: candidate,
                is_leader: true,
                path_index,
                changed: true,
            };
        }

        if !should_elect {
            return LeaderDecision::none();
        }

        self.clear_instance_except(instance, Some(index));
        let entry = &mut self.entries[index];
        entry.owner = instance.to_string();
        entry.sublease = now.to_string();
        LeaderDecision {
            leader: instance.to_string(),
            is_leader: true,
            path_index,
            changed: true,
        }
    }

    /// Drop `instance` from the entry named `name`; returns whether anything changed
    pub fn release(&mut self, instance: &str, name: &str) -> bool {
        let mut changed = false;
        for entry in self.entries.iter_mut().filter(|e| e.name == name && e.owner == instance) {
            entry.owner.clear();
            changed = true;
        }
        changed
    }

    /// Clear `instance` from every entry it owns; returns whether anything changed
    pub fn remove_leader(&mut self, instance: &str) -> bool {
        self.clear_instance_except(instance, None)
    }

    pub fn has_owners(&self) -> bool {
        self.entries.iter().any(|e| !e.owner.is_empty())
    }

    /// Remove and return the entries nobody owns
    pub fn take_unowned(&mut self) -> Vec<LeaderEntry> {
        let (unowned, owned) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.owner.is_empty());
        self.entries = owned;
        unowned
    }

    /// Evict the owner of the entry at `index` if its sublease expired
    pub fn evict_owner_if_sublease_has_expired(&mut self, index: usize, now: i64, threshold_secs: i64) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.owner.is_empty() || !is_sublease_expired(&entry.sublease, now, threshold_secs) {
            return false;
        }
        warn!(
            "Evicting {} from shared resource {:?}: sublease {:?} expired",
            entry.owner, entry.name, entry.sublease
        );
        entry.owner.clear();
        true
    }
}

/// Whether a sublease is unparseable or older than `threshold_secs`
pub fn is_sublease_expired(sublease: &str, now: i64, threshold_secs: i64) -> bool {
    sublease
        .parse::<i64>()
        .map_or(true, |renewed| now - renewed > threshold_secs)
}
