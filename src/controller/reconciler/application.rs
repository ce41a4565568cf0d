//! # Application Reconcile
//!
//! Reconciles an `OpenLibertyApplication`: shared password encryption key, shared LTPA
//! keys and config, workload, and status.
//!
//! ## Reconciliation Flow
//!
//! 1. **Finalizer**: on deletion, release every shared resource the instance holds; cleanup
//!    failures are logged and never keep the finalizer in place
//! 2. **Admission**: with `manageConcurrency`, wait for a worker-cache slot
//! 3. **Password encryption**: mirror the user key into the shared internal Secret
//! 4. **LTPA keys**: generate (leader) or read (follower) the shared keys
//! 5. **LTPA config**: publish or read the server XML for the newest key-related rotation
//! 6. **Workload**: apply the Deployment/StatefulSet and Service with rotation annotations
//! 7. **Image change**: invalidate led keys so they are regenerated by the new image
//! 8. **Status**: record references, image and the `Reconciled`/`Ready` conditions

use super::finalizer::{add_finalizer, finalize, record_cleanup, remove_finalizer, CleanupFailure};
use super::status::{apply_outcome, update_application_status};
use super::workload::{apply_workload, SharedMounts};
use super::Reconciler;
use crate::constants::{APPLICATION_FINALIZER, LABEL_INSTANCE};
use crate::controller::Error;
use crate::crd::{OpenLibertyApplication, OpenLibertyApplicationStatus};
use crate::encryption::{reconcile_password_encryption, PasswordEncryptionFactory};
use crate::image::{image_version, ImagePullState};
use crate::ltpa::{
    invalidate_ltpa_keys, reconcile_ltpa_config, reconcile_ltpa_keys, LtpaConfigFactory,
    LtpaKeysFactory,
};
use crate::observability::metrics;
use crate::sharing::remove_from_tracker;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, DeleteParams, ListParams};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

const CONTROLLER: &str = "application";

/// Status reference keys
pub const REF_LTPA_SECRET: &str = "ltpaSecretName";
pub const REF_LTPA_CONFIG_SECRET: &str = "ltpaConfigSecretName";
pub const REF_ENCRYPTION_SECRET: &str = "encryptionSecretName";

/// Requeue while the worker cache is full
const WORKER_CACHE_REQUEUE: Duration = Duration::from_secs(5);

/// Newest of two Unix-second rotation stamps; unparseable stamps count as never rotated
pub fn last_key_related_rotation(encryption: Option<&str>, keys: Option<&str>) -> String {
    let parse = |stamp: Option<&str>| stamp.and_then(|s| s.trim().parse::<i64>().ok());
    match (parse(encryption), parse(keys)) {
        (Some(a), Some(b)) => a.max(b).to_string(),
        (Some(a), None) | (None, Some(a)) => a.to_string(),
        (None, None) => String::new(),
    }
}

/// Whether the application image changed since the last reconcile that recorded one
pub fn image_changed(status: &OpenLibertyApplicationStatus, image: &str) -> bool {
    status
        .image_reference
        .as_deref()
        .is_some_and(|previous| previous != image)
}

/// Reconcile one `OpenLibertyApplication`
///
/// # Errors
///
/// Returns the first error of the pass after recording it on the `Reconciled` condition.
pub async fn reconcile_application(
    app: Arc<OpenLibertyApplication>,
    ctx: Arc<Reconciler>,
) -> Result<Action, Error> {
    let start = Instant::now();
    metrics::increment_reconciliations(CONTROLLER);
    let name = app.name_any();
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::Validation("OpenLibertyApplication must be namespaced".to_string()))?;

    let span = info_span!(
        "controller.application.reconcile",
        resource.name = %name,
        resource.namespace = %namespace
    );
    reconcile_instrumented(app, ctx, namespace, name, start)
        .instrument(span)
        .await
}

async fn reconcile_instrumented(
    app: Arc<OpenLibertyApplication>,
    ctx: Arc<Reconciler>,
    namespace: String,
    name: String,
    start: Instant,
) -> Result<Action, Error> {
    let apps: Api<OpenLibertyApplication> = Api::namespaced(ctx.client.clone(), &namespace);
    if app.metadata.deletion_timestamp.is_some() {
        let result = cleanup_application(&ctx, &apps, &app, &namespace).await;
        metrics::observe_reconciliation_duration(CONTROLLER, start.elapsed().as_secs_f64());
        return result;
    }
    add_finalizer(&apps, app.as_ref(), APPLICATION_FINALIZER).await?;

    let manage_concurrency = app.manage_concurrency();
    if manage_concurrency && !ctx.workers.reserve(&namespace, &name, app.worker_pool_size()) {
        debug!("No worker slot free for {}/{}, requeueing", namespace, name);
        metrics::increment_requeues_total("worker-cache-full");
        return Ok(Action::requeue(WORKER_CACHE_REQUEUE));
    }

    let mut status = app.status.clone().unwrap_or_default();
    let result = apply_application(&ctx, &app, &mut status).await;
    if manage_concurrency {
        ctx.workers.release(&namespace, &name);
    }

    apply_outcome(&mut status, result.as_ref().map(|_| ()));
    status.observed_generation = app.metadata.generation;
    let status_result = update_application_status(&ctx.client, &app, &status).await;
    metrics::observe_reconciliation_duration(CONTROLLER, start.elapsed().as_secs_f64());

    match (result, status_result) {
        (Ok(()), Ok(())) => {
            ctx.reset_backoff(&format!("{CONTROLLER}/{namespace}/{name}"));
            Ok(Action::requeue(Duration::from_secs(ctx.config.resync_secs)))
        }
        (Ok(()), Err(e)) => Err(e),
        (Err(e), status_result) => {
            if let Err(status_error) = status_result {
                warn!("Failed to record reconcile error for {}: {}", name, status_error);
            }
            Err(e)
        }
    }
}

async fn apply_application(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    status: &mut OpenLibertyApplicationStatus,
) -> Result<(), Error> {
    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let cleanup = ctx.config.cleanup_unused_resources;

    let encryption = if app.password_encryption_enabled() {
        let key = reconcile_password_encryption(ctx, app).await?;
        status
            .references
            .insert(REF_ENCRYPTION_SECRET.to_string(), key.internal_secret_name.clone());
        Some(key)
    } else {
        if status.references.remove(REF_ENCRYPTION_SECRET).is_some() {
            let factory = PasswordEncryptionFactory::new(cleanup);
            remove_from_tracker(&ctx.client, &namespace, &name, &factory, &ctx.assets).await?;
        }
        None
    };

    let ltpa = if app.ltpa_enabled() {
        let keys = reconcile_ltpa_keys(ctx, app, encryption.as_ref()).await?;
        status
            .references
            .insert(REF_LTPA_SECRET.to_string(), keys.secret_name.clone());
        let rotation = last_key_related_rotation(
            encryption.as_ref().map(|e| e.last_rotation.as_str()),
            Some(keys.last_rotation.as_str()),
        );
        let config = reconcile_ltpa_config(ctx, app, &keys, &rotation).await?;
        status
            .references
            .insert(REF_LTPA_CONFIG_SECRET.to_string(), config.server_xml_secret.clone());
        Some((keys, config))
    } else {
        let was_enabled = status.references.remove(REF_LTPA_SECRET).is_some();
        status.references.remove(REF_LTPA_CONFIG_SECRET);
        if was_enabled {
            release_ltpa(ctx, app, &namespace).await?;
        }
        None
    };

    let mounts = SharedMounts {
        ltpa: ltpa.as_ref().map(|(keys, config)| (keys, config)),
        encryption: encryption.as_ref(),
    };
    apply_workload(&ctx.client, app, &mounts).await?;

    let image = app.spec.application_image.as_str();
    if status.image_reference.as_deref() != Some(image) {
        if image_changed(status, image) && app.ltpa_enabled() {
            invalidate_ltpa_keys(ctx, app).await?;
        }
        if app.manage_cache() {
            let observed = ImagePullState {
                last_pull: chrono::Utc::now().timestamp(),
                version: image_version(image).unwrap_or_default().to_string(),
            };
            let merged = ctx.image_pulls.update(observed);
            debug!("Image-pull state now at version {:?}", merged.version);
        }
        info!("📦 {}/{} now runs image {}", namespace, name, image);
        status.image_reference = Some(image.to_string());
    }
    Ok(())
}

/// Leave the LTPA keys tracker and both config variant trackers
async fn release_ltpa(ctx: &Reconciler, app: &OpenLibertyApplication, namespace: &str) -> Result<(), Error> {
    let name = app.name_any();
    let cleanup = ctx.config.cleanup_unused_resources;
    let keys = LtpaKeysFactory::new(app, cleanup);
    remove_from_tracker(&ctx.client, namespace, &name, &keys, &ctx.assets).await?;
    for manage_password_encryption in [false, true] {
        let config = LtpaConfigFactory::for_variant(manage_password_encryption, Vec::new(), cleanup);
        remove_from_tracker(&ctx.client, namespace, &name, &config, &ctx.assets).await?;
    }
    Ok(())
}

async fn cleanup_application(
    ctx: &Reconciler,
    apps: &Api<OpenLibertyApplication>,
    app: &OpenLibertyApplication,
    namespace: &str,
) -> Result<Action, Error> {
    let name = app.name_any();
    info!("🗑️  Finalizing OpenLibertyApplication {}/{}", namespace, name);

    let failures = finalize(
        &format!("{namespace}/{name}"),
        release_application_resources(ctx, app, namespace),
        remove_finalizer(apps, app, APPLICATION_FINALIZER),
    )
    .await?;
    if !failures.is_empty() {
        warn!(
            "Finalized {}/{} with {} cleanup failure(s)",
            namespace,
            name,
            failures.len()
        );
    }
    ctx.reset_backoff(&format!("{CONTROLLER}/{namespace}/{name}"));
    Ok(Action::await_change())
}

/// Leave every tracker, forget worker slots and delete the instance's PVCs
async fn release_application_resources(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    namespace: &str,
) -> Vec<CleanupFailure> {
    let name = app.name_any();
    let mut failures = Vec::new();

    let cleanup = ctx.config.cleanup_unused_resources;
    let keys = LtpaKeysFactory::new(app, cleanup);
    record_cleanup(
        &mut failures,
        "release LTPA keys",
        remove_from_tracker(&ctx.client, namespace, &name, &keys, &ctx.assets).await,
    );
    for manage_password_encryption in [false, true] {
        let config = LtpaConfigFactory::for_variant(manage_password_encryption, Vec::new(), cleanup);
        record_cleanup(
            &mut failures,
            "release LTPA config",
            remove_from_tracker(&ctx.client, namespace, &name, &config, &ctx.assets).await,
        );
    }
    let encryption = PasswordEncryptionFactory::new(cleanup);
    record_cleanup(
        &mut failures,
        "release password encryption",
        remove_from_tracker(&ctx.client, namespace, &name, &encryption, &ctx.assets).await,
    );
    ctx.workers.forget(namespace, &name);

    let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let selector = format!("{LABEL_INSTANCE}={name}");
    let deleted = match claims
        .delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector))
        .await
    {
        Ok(_) => {
            debug!("Deleted PVCs matching {} in {}", selector, namespace);
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e),
    };
    record_cleanup(&mut failures, "delete PVCs", deleted);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_key_related_rotation_is_numeric_max() {
        assert_eq!(last_key_related_rotation(Some("900"), Some("1000")), "1000");
        assert_eq!(last_key_related_rotation(Some("1700000200"), Some("1700000000")), "1700000200");
        assert_eq!(last_key_related_rotation(None, Some("42")), "42");
        assert_eq!(last_key_related_rotation(Some(""), Some("42")), "42");
        assert_eq!(last_key_related_rotation(None, None), "");
    }

    #[test]
    fn test_image_changed() {
        let mut status = OpenLibertyApplicationStatus::default();
        assert!(!image_changed(&status, "app:1"));
        status.image_reference = Some("app:1".to_string());
        assert!(!image_changed(&status, "app:1"));
        assert!(image_changed(&status, "app:2"));
    }
}
