//! Finalizer bookkeeping for the Open Liberty custom resources.

use crate::constants::FIELD_MANAGER;
use crate::controller::Error;
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use tracing::{debug, warn};

/// A cleanup step that failed while finalizing a resource
#[derive(Debug)]
pub struct CleanupFailure {
    pub step: &'static str,
    pub error: Error,
}

/// Record the outcome of one cleanup step, keeping only failures
pub fn record_cleanup<T, E: Into<Error>>(failures: &mut Vec<CleanupFailure>, step: &'static str, result: Result<T, E>) {
    if let Err(e) = result {
        failures.push(CleanupFailure {
            step,
            error: e.into(),
        });
    }
}

/// Run `cleanup`, log what failed, then run `remove`
///
/// Cleanup failures never keep the finalizer in place; only a failure to remove the
/// finalizer itself is returned. On success, the cleanup failures are handed back.
///
/// # Errors
///
/// Returns the error of `remove`.
pub async fn finalize<C, R>(resource: &str, cleanup: C, remove: R) -> Result<Vec<CleanupFailure>, Error>
where
    C: Future<Output = Vec<CleanupFailure>>,
    R: Future<Output = Result<(), Error>>,
{
    let failures = cleanup.await;
    for failure in &failures {
        warn!(
            "Cleanup step {:?} of {} failed, removing the finalizer anyway: {}",
            failure.step, resource, failure.error
        );
    }
    remove.await?;
    Ok(failures)
}

/// Add `finalizer` to `obj`; returns whether a patch was sent
///
/// The patch carries the observed `resourceVersion` so a concurrent update fails with a
/// conflict instead of dropping another writer's finalizers.
///
/// # Errors
///
/// Propagates API errors.
pub async fn add_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<bool, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if obj.finalizers().iter().any(|f| f == finalizer) {
        return Ok(false);
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": obj.resource_version(),
        }
    });
    api.patch(&obj.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    debug!("Added finalizer {} to {}", finalizer, obj.name_any());
    Ok(true)
}

/// Remove `finalizer` from `obj`
///
/// # Errors
///
/// Propagates API errors other than the object already being gone.
pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !obj.finalizers().iter().any(|f| f == finalizer) {
        return Ok(());
    }
    let finalizers: Vec<&String> = obj.finalizers().iter().filter(|f| *f != finalizer).collect();
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": obj.resource_version(),
        }
    });
    match api
        .patch(&obj.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn forbidden() -> kube::Error {
        kube::Error::Api(Box::new(kube::core::Status {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: "persistentvolumeclaims is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
            metadata: None,
            details: None,
        }))
    }

    #[test]
    fn test_record_cleanup_keeps_failures_only() {
        let mut failures = Vec::new();
        record_cleanup::<(), Error>(&mut failures, "release", Ok(()));
        record_cleanup::<(), kube::Error>(&mut failures, "claims", Err(forbidden()));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "claims");
        assert!(matches!(failures[0].error, Error::Kube(_)));
    }

    #[tokio::test]
    async fn test_finalizer_removed_when_cleanup_fails() {
        let removed = AtomicBool::new(false);
        let cleanup = async {
            let mut failures = Vec::new();
            record_cleanup::<(), kube::Error>(&mut failures, "delete claims", Err(forbidden()));
            record_cleanup::<(), Error>(
                &mut failures,
                "release trackers",
                Err(Error::SharedResourceUnavailable("tracker unreadable".to_string())),
            );
            failures
        };
        let remove = async {
            removed.store(true, Ordering::SeqCst);
            Ok(())
        };

        let failures = finalize("default/app-a", cleanup, remove).await.unwrap();
        assert!(removed.load(Ordering::SeqCst));
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn test_finalize_reports_removal_error() {
        let result = finalize("default/app-a", async { Vec::new() }, async {
            Err(Error::Kube(forbidden()))
        })
        .await;
        assert!(matches!(result, Err(Error::Kube(_))));
    }
}
