//! # Sharing Metrics
//!
//! Metrics for shared resources: leader elections, tracker rebuilds, LTPA generation Jobs,
//! password-encryption key rotations and trace operations.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec};
use std::sync::LazyLock;

static LEADER_ELECTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "open_liberty_operator_leader_elections_total",
            "Total number of shared-resource leadership decisions by family and role",
        ),
        &["family", "role"],
    )
    .expect("Failed to create LEADER_ELECTIONS_TOTAL metric - this should never happen")
});

static TRACKER_REBUILDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "open_liberty_operator_leader_tracker_rebuilds_total",
            "Total number of leader tracker rebuilds from discovery by family",
        ),
        &["family"],
    )
    .expect("Failed to create TRACKER_REBUILDS_TOTAL metric - this should never happen")
});

static LTPA_JOBS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "open_liberty_operator_ltpa_jobs_created_total",
        "Total number of LTPA keys generation Jobs created",
    )
    .expect("Failed to create LTPA_JOBS_CREATED_TOTAL metric - this should never happen")
});

static ENCRYPTION_KEY_ROTATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "open_liberty_operator_encryption_key_rotations_total",
        "Total number of internal password-encryption key writes",
    )
    .expect("Failed to create ENCRYPTION_KEY_ROTATIONS_TOTAL metric - this should never happen")
});

static TRACE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "open_liberty_operator_trace_operations_total",
            "Total number of trace dropin operations by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create TRACE_OPERATIONS_TOTAL metric - this should never happen")
});

/// Register sharing metrics with the registry
pub(crate) fn register_sharing_metrics() -> Result<()> {
    REGISTRY.register(Box::new(LEADER_ELECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRACKER_REBUILDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LTPA_JOBS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ENCRYPTION_KEY_ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRACE_OPERATIONS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_leader_elections(family: &str, role: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&[family, role]).inc();
}

pub fn increment_tracker_rebuilds(family: &str) {
    TRACKER_REBUILDS_TOTAL.with_label_values(&[family]).inc();
}

pub fn increment_ltpa_jobs_created() {
    LTPA_JOBS_CREATED_TOTAL.inc();
}

pub fn increment_encryption_key_rotations() {
    ENCRYPTION_KEY_ROTATIONS_TOTAL.inc();
}

pub fn increment_trace_operations(operation: &str) {
    TRACE_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_leader_elections() {
        let before = LEADER_ELECTIONS_TOTAL.with_label_values(&["ltpa", "leader"]).get();
        increment_leader_elections("ltpa", "leader");
        let after = LEADER_ELECTIONS_TOTAL.with_label_values(&["ltpa", "leader"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_ltpa_jobs_created() {
        let before = LTPA_JOBS_CREATED_TOTAL.get();
        increment_ltpa_jobs_created();
        assert_eq!(LTPA_JOBS_CREATED_TOTAL.get(), before + 1u64);
    }
}
