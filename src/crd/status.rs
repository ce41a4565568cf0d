//! # Status Types
//!
//! Conditions and status blocks shared by the Open Liberty custom resources.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the status changed
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Last time the condition was written
    #[serde(default)]
    pub last_update_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(r#type: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: Some(now.clone()),
            last_update_time: Some(now),
            reason: (!reason.is_empty()).then(|| reason.to_string()),
            message: Some(message.into()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    /// Whether `other` carries the same observation, ignoring timestamps
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Find the condition of type `r#type`
pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Insert or replace a condition, keeping its transition time when the status is unchanged
///
/// Returns whether anything other than timestamps changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.same_state(&condition) {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Status of an OpenLibertyApplication
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenLibertyApplicationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Image the workload last rolled out
    #[serde(default)]
    pub image_reference: Option<String>,
    /// Names of shared resources in use (`ltpaSecretName`, `encryptionSecretName`, ...)
    #[serde(default)]
    pub references: BTreeMap<String, String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Object a day-2 operation acts on
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatedResource {
    /// Always `pod` for traces
    pub resource_type: String,
    pub resource_name: String,
}

/// Status of an OpenLibertyTrace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenLibertyTraceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub operated_resource: Option<OperatedResource>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_on_same_status() {
        let mut conditions = vec![Condition {
            last_transition_time: Some("2024-01-01T00:00:00+00:00".to_string()),
            ..Condition::new("Reconciled", false, "LeaderPending", "waiting")
        }];
        let changed = set_condition(
            &mut conditions,
            Condition::new("Reconciled", false, "SecretMissing", "missing"),
        );
        assert!(changed);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert_eq!(conditions[0].reason.as_deref(), Some("SecretMissing"));
    }

    #[test]
    fn test_set_condition_unchanged() {
        let mut conditions = vec![Condition::new("Enabled", true, "", "ok")];
        assert!(!set_condition(&mut conditions, Condition::new("Enabled", true, "", "ok")));
        assert!(set_condition(&mut conditions, Condition::new("Ready", true, "", "ok")));
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, "Ready").is_some_and(Condition::is_true));
    }
}
