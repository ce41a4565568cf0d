//! # Image-Pull State
//!
//! The most recent application image pull observed by the operator, kept in memory and
//! mirrored to a JSON file so it survives restarts. Updates only ever move the state
//! forward.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Last observed pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePullState {
    /// Unix seconds of the pull
    pub last_pull: i64,
    /// Image version (tag) pulled
    pub version: String,
}

impl ImagePullState {
    /// Monotone merge
    ///
    /// With equal versions the later pull wins. When versions disagree the greater
    /// version wins, and the later pull breaks a tie between equivalent spellings.
    #[must_use]
    pub fn max(self, other: ImagePullState) -> ImagePullState {
        let by_version = compare_dotted_versions(&self.version, &other.version);
        let keep_self = if self.version == other.version || by_version == Ordering::Equal {
            self.last_pull >= other.last_pull
        } else {
            by_version == Ordering::Greater
        };
        if keep_self {
            self
        } else {
            other
        }
    }
}

/// Compare numeric dotted versions (`1.10.2` > `1.9`); non-numeric parts compare as text
pub fn compare_dotted_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| -> Vec<String> {
        v.trim_start_matches('v')
            .split(['.', '-', '_'])
            .map(str::to_string)
            .collect()
    };
    let (left, right) = (split(a), split(b));
    for (l, r) in left.iter().zip(&right) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

/// Tag of an image reference, if any
pub fn image_version(image: &str) -> Option<&str> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
}

/// File-backed cache of the image-pull state
#[derive(Debug)]
pub struct ImagePullCache {
    path: PathBuf,
    state: Mutex<Option<ImagePullState>>,
}

impl ImagePullCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    /// Current state, read from disk on first use
    pub fn get(&self) -> ImagePullState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .get_or_insert_with(|| load(&self.path).unwrap_or_default())
            .clone()
    }

    /// Merge `observed` into the state and persist the result
    pub fn update(&self, observed: ImagePullState) -> ImagePullState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = state
            .take()
            .unwrap_or_else(|| load(&self.path).unwrap_or_default());
        let merged = current.clone().max(observed);
        if merged != current {
            if let Err(e) = save(&self.path, &merged) {
                debug!("Failed to persist image-pull state to {}: {}", self.path.display(), e);
            }
        }
        *state = Some(merged.clone());
        merged
    }
}

fn load(path: &Path) -> Option<ImagePullState> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn save(path: &Path, state: &ImagePullState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string(state)?;
    std::fs::write(path, content)
}
