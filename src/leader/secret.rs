//! Encoding of a [`LeaderTracker`] into the tracking Secret.
//!
//! Each data key holds one comma-separated column of the record. The number of
//! entries is taken from `pathIndices`, which is never empty for a real entry.

use super::record::{LeaderEntry, LeaderTracker};
use super::TrackerError;
use crate::constants::{
    LABEL_LEADER_VERSION, LABEL_MANAGED_BY, MANAGED_BY, TRACKER_KEY_NAMES, TRACKER_KEY_OWNERS,
    TRACKER_KEY_PATHS, TRACKER_KEY_PATH_INDICES, TRACKER_KEY_SUBLEASES,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

const COLUMNS: [&str; 5] = [
    TRACKER_KEY_NAMES,
    TRACKER_KEY_OWNERS,
    TRACKER_KEY_PATHS,
    TRACKER_KEY_PATH_INDICES,
    TRACKER_KEY_SUBLEASES,
];

/// Decode a tracking Secret
///
/// # Errors
///
/// Returns [`TrackerError::OutOfSync`] when a column is missing or the columns
/// disagree in length.
pub fn decode(secret: &Secret) -> Result<LeaderTracker, TrackerError> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let data = secret.data.clone().unwrap_or_default();

    let mut columns = BTreeMap::new();
    for key in COLUMNS {
        let raw = data.get(key).ok_or_else(|| TrackerError::OutOfSync {
            name: name.clone(),
            reason: format!("missing data key {key:?}"),
        })?;
        let text = String::from_utf8(raw.0.clone()).map_err(|e| TrackerError::OutOfSync {
            name: name.clone(),
            reason: format!("data key {key:?} is not UTF-8: {e}"),
        })?;
        columns.insert(key, text);
    }

    let len = split(&columns[TRACKER_KEY_PATH_INDICES], None).len();
    let mut split_columns = BTreeMap::new();
    for key in COLUMNS {
        let values = split(&columns[key], Some(len));
        if values.len() != len {
            return Err(TrackerError::OutOfSync {
                name,
                reason: format!("{key:?} has {} values, expected {len}", values.len()),
            });
        }
        split_columns.insert(key, values);
    }

    let entries = (0..len)
        .map(|i| LeaderEntry {
            name: split_columns[TRACKER_KEY_NAMES][i].clone(),
            owner: split_columns[TRACKER_KEY_OWNERS][i].clone(),
            path: split_columns[TRACKER_KEY_PATHS][i].clone(),
            path_index: split_columns[TRACKER_KEY_PATH_INDICES][i].clone(),
            sublease: split_columns[TRACKER_KEY_SUBLEASES][i].clone(),
        })
        .collect();

    let version = secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_LEADER_VERSION))
        .cloned()
        .unwrap_or_default();

    Ok(LeaderTracker { version, entries })
}

/// Split one column; an empty column holds no values when the record is empty
fn split(column: &str, expected: Option<usize>) -> Vec<String> {
    if column.is_empty() && expected.is_none_or(|len| len == 0) {
        return Vec::new();
    }
    column.split(',').map(str::to_string).collect()
}

/// Column data for a record
pub fn encode_data(tracker: &LeaderTracker) -> BTreeMap<String, ByteString> {
    let column = |f: fn(&LeaderEntry) -> &str| {
        ByteString(
            tracker
                .entries
                .iter()
                .map(f)
                .collect::<Vec<_>>()
                .join(",")
                .into_bytes(),
        )
    };
    BTreeMap::from([
        (TRACKER_KEY_NAMES.to_string(), column(|e| &e.name)),
        (TRACKER_KEY_OWNERS.to_string(), column(|e| &e.owner)),
        (TRACKER_KEY_PATHS.to_string(), column(|e| &e.path)),
        (TRACKER_KEY_PATH_INDICES.to_string(), column(|e| &e.path_index)),
        (TRACKER_KEY_SUBLEASES.to_string(), column(|e| &e.sublease)),
    ])
}

/// A complete tracking Secret for `tracker`
pub fn encode(name: &str, namespace: &str, tracker: &LeaderTracker) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
                (LABEL_LEADER_VERSION.to_string(), tracker.version.clone()),
            ])),
            ..Default::default()
        },
        data: Some(encode_data(tracker)),
        ..Default::default()
    }
}

/// Read one column of a tracking Secret as text
pub fn column(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|raw| String::from_utf8(raw.0.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, owner: &str, index: usize) -> LeaderEntry {
        LeaderEntry {
            name: name.to_string(),
            owner: owner.to_string(),
            path: format!("v1_4_2.p.{index}"),
            path_index: format!("v1_4_2.{index}"),
            sublease: "1700000000".to_string(),
        }
    }

    #[test]
    fn test_columns_are_comma_separated() {
        let tracker = LeaderTracker {
            version: "v1_4_2".to_string(),
            entries: vec![entry("-aaaaa", "", 0), entry("-bbbbb", "app-b", 1), entry("-ccccc", "", 2)],
        };
        let secret = encode("olo-managed-leader-tracking-ltpa", "ns", &tracker);
        assert_eq!(column(&secret, TRACKER_KEY_NAMES).unwrap(), "-aaaaa,-bbbbb,-ccccc");
        assert_eq!(column(&secret, TRACKER_KEY_OWNERS).unwrap(), ",app-b,");
        assert_eq!(
            secret.metadata.labels.as_ref().unwrap()[LABEL_LEADER_VERSION],
            "v1_4_2"
        );
        assert_eq!(decode(&secret).unwrap(), tracker);
    }

    #[test]
    fn test_single_evicted_entry_survives() {
        let tracker = LeaderTracker {
            version: "v1_4_2".to_string(),
            entries: vec![entry("", "", 0)],
        };
        let secret = encode("t", "ns", &tracker);
        let decoded = decode(&secret).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded, tracker);
    }

    #[test]
    fn test_empty_record() {
        let tracker = LeaderTracker::new("v1_4_2");
        assert_eq!(decode(&encode("t", "ns", &tracker)).unwrap(), tracker);
    }

    #[test]
    fn test_missing_column_is_out_of_sync() {
        let mut secret = encode("t", "ns", &LeaderTracker::new("v1_4_2"));
        secret.data.as_mut().unwrap().remove(TRACKER_KEY_SUBLEASES);
        assert!(matches!(decode(&secret), Err(TrackerError::OutOfSync { .. })));
    }

    #[test]
    fn test_length_mismatch_is_out_of_sync() {
        let tracker = LeaderTracker {
            version: "v1_4_2".to_string(),
            entries: vec![entry("-aaaaa", "a", 0), entry("-bbbbb", "b", 1)],
        };
        let mut secret = encode("t", "ns", &tracker);
        secret
            .data
            .as_mut()
            .unwrap()
            .insert(TRACKER_KEY_OWNERS.to_string(), ByteString(b"a,b,c".to_vec()));
        assert!(matches!(decode(&secret), Err(TrackerError::OutOfSync { .. })));
    }
}
