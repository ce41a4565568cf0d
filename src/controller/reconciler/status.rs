//! # Status Management
//!
//! Writes conditions and references back to the custom resources.
//!
//! Every writer compares the desired status with the observed one first: a status patch
//! triggers a watch event, so unchanged status is never written.

use crate::constants::FIELD_MANAGER;
use crate::controller::{Error, ErrorKind};
use crate::crd::{
    set_condition, Condition, OpenLibertyApplication, OpenLibertyApplicationStatus,
    OpenLibertyTrace, OpenLibertyTraceStatus,
};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

pub const CONDITION_RECONCILED: &str = "Reconciled";
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ENABLED: &str = "Enabled";

/// `Reconciled` condition for a reconcile outcome
pub fn reconciled_condition(result: Result<(), &Error>) -> Condition {
    match result {
        Ok(()) => Condition::new(CONDITION_RECONCILED, true, "", "Reconciled successfully"),
        Err(e) => Condition::new(CONDITION_RECONCILED, false, e.kind().as_str(), e.to_string()),
    }
}

/// Apply the outcome of a reconcile to an application status
///
/// Returns whether anything changed.
pub fn apply_outcome(status: &mut OpenLibertyApplicationStatus, result: Result<(), &Error>) -> bool {
    let mut changed = set_condition(&mut status.conditions, reconciled_condition(result));
    let ready = match result {
        Ok(()) => Condition::new(CONDITION_READY, true, "", "Application is ready"),
        // A follower waiting on its leader is not a failure of the application itself
        Err(e) if e.kind() == ErrorKind::LeaderPending => {
            Condition::new(CONDITION_READY, false, e.kind().as_str(), "Waiting for shared resources")
        }
        Err(e) => Condition::new(CONDITION_READY, false, e.kind().as_str(), e.to_string()),
    };
    changed |= set_condition(&mut status.conditions, ready);
    changed
}

/// Patch the application status when `desired` differs from what is recorded
///
/// # Errors
///
/// Propagates API errors.
pub async fn update_application_status(
    client: &Client,
    app: &OpenLibertyApplication,
    desired: &OpenLibertyApplicationStatus,
) -> Result<(), Error> {
    if app.status.as_ref() == Some(desired) {
        debug!("Skipping status update for {} - unchanged", app.name_any());
        return Ok(());
    }
    let namespace = app.namespace().unwrap_or_default();
    let api: Api<OpenLibertyApplication> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &app.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": desired })),
    )
    .await?;
    Ok(())
}

/// Patch the trace status when `desired` differs from what is recorded
///
/// # Errors
///
/// Propagates API errors.
pub async fn update_trace_status(
    client: &Client,
    trace: &OpenLibertyTrace,
    desired: &OpenLibertyTraceStatus,
) -> Result<(), Error> {
    if trace.status.as_ref() == Some(desired) {
        debug!("Skipping status update for {} - unchanged", trace.name_any());
        return Ok(());
    }
    let namespace = trace.namespace().unwrap_or_default();
    let api: Api<OpenLibertyTrace> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &trace.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": desired })),
    )
    .await?;
    Ok(())
}
