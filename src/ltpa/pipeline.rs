//! Keys generation and config publication for one application.

use super::factory::delete_generation_rbac;
use super::generation::{
    follower_keys_ready, forbidden_as_validation, next_step, stale_config_suffixes, GenerationStep,
    Observed, RbacObject,
};
use super::resources::{
    self, keys_encryption_rotation, EncryptionMount, GenerationJobParams,
};
use super::xml::{config_secrets, is_published_for, server_xml_data};
use super::{
    check_keys_drift, KeysDrift, LtpaConfig, LtpaConfigFactory, LtpaConfigNames, LtpaKeys,
    LtpaKeysFactory, LtpaKeysNames,
};
use crate::constants::{LAST_ROTATION, LTPA_PASSWORD};
use crate::controller::reconciler::Reconciler;
use crate::controller::Error;
use crate::crd::OpenLibertyApplication;
use crate::encryption::EncryptionKey;
use crate::leader::TrackerError;
use crate::observability::metrics;
use crate::sharing::{
    apply_secret, create_if_absent, delete_if_exists, lease_shared_resource, remove_from_tracker,
    secret_string, shared_resource_labels, tracker_store, Family, SharedResourceFactory,
    SharedResourceLease,
};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::Api;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

fn namespace_of(app: &OpenLibertyApplication) -> Result<String, Error> {
    app.namespace()
        .ok_or_else(|| Error::Validation("OpenLibertyApplication must be namespaced".to_string()))
}

fn ltpa_keys_from(lease: &SharedResourceLease, names: &LtpaKeysNames, secret: &Secret) -> Result<LtpaKeys, Error> {
    let password = secret_string(secret, LTPA_PASSWORD).ok_or_else(|| {
        Error::SharedResourceUnavailable(format!(
            "LTPA keys Secret {} has no {LTPA_PASSWORD}",
            names.keys_secret
        ))
    })?;
    Ok(LtpaKeys {
        name: lease.name().to_string(),
        secret_name: names.keys_secret.clone(),
        password,
        last_rotation: secret_string(secret, LAST_ROTATION).unwrap_or_default(),
        leader: lease.leader().to_string(),
        is_leader: lease.is_leader(),
    })
}

/// Make the shared LTPA keys available to `app`
///
/// The keys leader drives the generation Job; followers return the keys once the leader
/// has produced them.
///
/// # Errors
///
/// Returns [`Error::LeaderPending`] for a follower while the keys are missing or encoded
/// with another encryption key,
/// [`Error::SharedResourceUnavailable`] while a generation is in progress,
/// [`Error::ConfigurationMismatch`] after deleting keys encoded with a stale encryption key,
/// [`Error::JobFailed`] when the generation Job failed, and API errors.
pub async fn reconcile_ltpa_keys(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    encryption: Option<&EncryptionKey>,
) -> Result<LtpaKeys, Error> {
    let namespace = namespace_of(app)?;
    let instance = app.name_any();
    let factory = LtpaKeysFactory::new(app, ctx.config.cleanup_unused_resources);
    let lease = lease_shared_resource(
        &ctx.client,
        &namespace,
        &instance,
        &factory,
        &ctx.assets,
        ctx.config.sublease_eviction,
    )
    .await?;
    let names = LtpaKeysNames::new(lease.name());
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    let existing = secrets.get_opt(&names.keys_secret).await?;

    if !lease.is_leader() {
        return match existing {
            Some(secret)
                if follower_keys_ready(
                    Some(&secret),
                    app.password_encryption_enabled(),
                    encryption.map(|e| e.last_rotation.as_str()),
                ) =>
            {
                ltpa_keys_from(&lease, &names, &secret)
            }
            _ => Err(Error::LeaderPending {
                family: Family::Ltpa.to_string(),
                name: names.keys_secret,
                leader: lease.leader().to_string(),
            }),
        };
    }

    match existing {
        Some(secret) => {
            let drift = check_keys_drift(
                app.password_encryption_enabled(),
                encryption.map(|e| e.last_rotation.as_str()),
                keys_encryption_rotation(&secret).as_deref(),
            );
            if drift == KeysDrift::DeleteKeys {
                info!(
                    "♻️  LTPA keys {}/{} do not match the password encryption key, deleting",
                    namespace, names.keys_secret
                );
                delete_if_exists(&secrets, &names.keys_secret).await?;
                return Err(Error::ConfigurationMismatch(format!(
                    "LTPA keys {} were encoded with another encryption key and are being regenerated",
                    names.keys_secret
                )));
            }
            finish_generation(ctx, &namespace, &names).await?;
            ltpa_keys_from(&lease, &names, &secret)
        }
        None => Err(generate_keys(ctx, app, &namespace, &lease, &names, encryption).await),
    }
}

/// Remove the request ConfigMap, Job and RBAC of a completed generation
async fn finish_generation(ctx: &Reconciler, namespace: &str, names: &LtpaKeysNames) -> Result<(), Error> {
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
    if config_maps.get_opt(&names.job_request).await?.is_none() {
        return Ok(());
    }
    info!(
        "✅ LTPA keys {}/{} generated, cleaning up the generation objects",
        namespace, names.keys_secret
    );
    delete_if_exists(&config_maps, &names.job_request).await?;
    delete_if_exists(&Api::<Job>::namespaced(ctx.client.clone(), namespace), &names.generation).await?;
    delete_generation_rbac(&ctx.client, namespace, names).await?;
    Ok(())
}

/// Advance the generation of missing keys; always yields the error describing the wait
async fn generate_keys(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    namespace: &str,
    lease: &SharedResourceLease,
    names: &LtpaKeysNames,
    encryption: Option<&EncryptionKey>,
) -> Error {
    match run_generation(ctx, app, namespace, lease, names, encryption).await {
        Ok(()) => Error::SharedResourceUnavailable(format!(
            "waiting for LTPA keys generation Job {} to create {}",
            names.generation, names.keys_secret
        )),
        Err(e) => e,
    }
}

async fn run_generation(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    namespace: &str,
    lease: &SharedResourceLease,
    names: &LtpaKeysNames,
    encryption: Option<&EncryptionKey>,
) -> Result<(), Error> {
    let client = &ctx.client;
    let instance = app.name_any();
    let owner = app.controller_owner_ref(&()).ok_or_else(|| {
        Error::Validation(format!("OpenLibertyApplication {instance} has no uid yet"))
    })?;
    let labels = shared_resource_labels(&names.generation, &instance, &lease.metadata.path_index);
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let roles: Api<Role> = Api::namespaced(client.clone(), namespace);
    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);

    let script = ctx.assets.ltpa_script();
    let desired = resources::generation_job(&GenerationJobParams {
        names,
        namespace,
        instance: &instance,
        path_index: &lease.metadata.path_index,
        image: &app.spec.application_image,
        pull_policy: app.pull_policy(),
        pull_secret: app.spec.pull_secret.as_deref(),
        encryption: encryption.map(|e| EncryptionMount {
            secret_name: &e.internal_secret_name,
            key: e.key_field,
            last_rotation: &e.last_rotation,
        }),
        labels: &labels,
        owner: &owner,
    });

    let mut observed = Observed {
        request: config_maps.get_opt(&names.job_request).await?.is_some(),
        service_account: service_accounts.get_opt(&names.generation).await?.is_some(),
        role: roles.get_opt(&names.generation).await?.is_some(),
        role_binding: role_bindings.get_opt(&names.generation).await?.is_some(),
        script: config_maps.get_opt(&names.script).await?,
        job: jobs.get_opt(&names.generation).await?,
    };

    loop {
        match next_step(&observed, script, &desired) {
            GenerationStep::Request => {
                let request = resources::job_request_config_map(names, namespace, &labels, &owner);
                create_if_absent(&config_maps, &request).await?;
                info!(
                    "🔑 Requested LTPA keys generation {}/{} for {}",
                    namespace, names.keys_secret, instance
                );
                if delete_if_exists(&jobs, &names.generation).await? {
                    debug!("Deleted previous generation Job {}", names.generation);
                }
                delete_stale_config(ctx, app, namespace, lease).await?;
                observed.request = true;
                observed.job = None;
            }
            GenerationStep::Rbac(object) => {
                let created = match object {
                    RbacObject::ServiceAccount => {
                        create_if_absent(
                            &service_accounts,
                            &resources::service_account(names, namespace, &labels, &owner),
                        )
                        .await
                    }
                    RbacObject::Role => {
                        create_if_absent(&roles, &resources::role(names, namespace, &labels, &owner)).await
                    }
                    RbacObject::RoleBinding => {
                        create_if_absent(
                            &role_bindings,
                            &resources::role_binding(names, namespace, &labels, &owner),
                        )
                        .await
                    }
                };
                created.map_err(|e| forbidden_as_validation(e, object.kind()))?;
                match object {
                    RbacObject::ServiceAccount => observed.service_account = true,
                    RbacObject::Role => observed.role = true,
                    RbacObject::RoleBinding => observed.role_binding = true,
                }
            }
            GenerationStep::CreateScript => {
                let config_map = resources::script_config_map(names, namespace, script, &labels, &owner);
                create_if_absent(&config_maps, &config_map).await?;
                observed.script = Some(config_map);
            }
            GenerationStep::ReplaceScript => {
                warn!(
                    "LTPA script ConfigMap {}/{} is out of sync, deleting",
                    namespace, names.script
                );
                delete_if_exists(&config_maps, &names.script).await?;
                return Err(Error::ScriptOutOfSync {
                    name: names.script.clone(),
                });
            }
            GenerationStep::CreateJob => {
                if create_if_absent(&jobs, &desired).await? {
                    metrics::increment_ltpa_jobs_created();
                    info!(
                        "🚀 Created LTPA keys generation Job {}/{}",
                        namespace, names.generation
                    );
                }
                return Ok(());
            }
            GenerationStep::RestartJob => {
                info!(
                    "♻️  LTPA keys generation Job {}/{} no longer matches the application, restarting",
                    namespace, names.generation
                );
                delete_if_exists(&config_maps, &names.job_request).await?;
                delete_if_exists(&jobs, &names.generation).await?;
                return Err(Error::SharedResourceUnavailable(format!(
                    "restarting LTPA keys generation Job {}",
                    names.generation
                )));
            }
            GenerationStep::JobFailed => {
                return Err(Error::JobFailed {
                    job: names.generation.clone(),
                    leader: instance,
                });
            }
            GenerationStep::AwaitKeys => return Ok(()),
        }
    }
}

/// Delete the XML Secrets still pointing at the keys being regenerated
async fn delete_stale_config(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    namespace: &str,
    lease: &SharedResourceLease,
) -> Result<(), Error> {
    let manage_encryption = app.password_encryption_enabled();
    let store = tracker_store(&ctx.client, namespace, Family::ltpa_config(manage_encryption), &ctx.assets);
    let tracker = match store.get().await {
        Ok((_, tracker)) => tracker,
        Err(TrackerError::NotFound { .. }) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let factory = LtpaConfigFactory::for_variant(manage_encryption, Vec::new(), ctx.config.cleanup_unused_resources);
    for suffix in stale_config_suffixes(&lease.metadata.path, &tracker) {
        factory.delete(&ctx.client, namespace, &suffix).await?;
        debug!("Deleted stale LTPA config Secrets {}/{}", namespace, suffix);
    }
    Ok(())
}

/// Publish or read the server XML Secrets of the active LTPA config variant
///
/// `last_key_related_rotation` is the newest rotation among the keys and the encryption
/// key; followers wait until the published Secret carries it.
///
/// # Errors
///
/// Returns [`Error::LeaderPending`] for a follower while the published config is stale,
/// and tracker or API errors.
pub async fn reconcile_ltpa_config(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
    keys: &LtpaKeys,
    last_key_related_rotation: &str,
) -> Result<LtpaConfig, Error> {
    let namespace = namespace_of(app)?;
    let instance = app.name_any();
    let cleanup = ctx.config.cleanup_unused_resources;
    let factory = LtpaConfigFactory::new(app, cleanup);
    let lease = lease_shared_resource(
        &ctx.client,
        &namespace,
        &instance,
        &factory,
        &ctx.assets,
        ctx.config.sublease_eviction,
    )
    .await?;

    // An instance uses one variant at a time
    let other = LtpaConfigFactory::for_variant(!app.password_encryption_enabled(), Vec::new(), cleanup);
    remove_from_tracker(&ctx.client, &namespace, &instance, &other, &ctx.assets).await?;

    let names = LtpaConfigNames::new(lease.name());
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    let existing = secrets.get_opt(&names.server_xml_secret).await?;

    if !lease.is_leader() {
        return match existing {
            Some(secret) if is_published_for(&secret, last_key_related_rotation) => Ok(LtpaConfig {
                name: lease.name().to_string(),
                last_rotation: secret_string(&secret, LAST_ROTATION).unwrap_or_default(),
                server_xml_secret: names.server_xml_secret,
                mount_xml_secret: names.mount_xml_secret,
            }),
            _ => Err(Error::LeaderPending {
                family: factory.family().to_string(),
                name: names.server_xml_secret,
                leader: lease.leader().to_string(),
            }),
        };
    }

    let data = server_xml_data(
        existing.as_ref(),
        &keys.password,
        last_key_related_rotation,
        chrono::Utc::now().timestamp(),
    );
    let last_rotation = data
        .get(LAST_ROTATION)
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
        .unwrap_or_default();
    let labels = shared_resource_labels(&names.server_xml_secret, &instance, &lease.metadata.path_index);
    let (server_xml, mount_xml) = config_secrets(&names, &namespace, &labels, data);
    apply_secret(&secrets, &server_xml).await?;
    apply_secret(&secrets, &mount_xml).await?;
    debug!(
        "Published LTPA config {}/{} (lastRotation {})",
        namespace, names.server_xml_secret, last_rotation
    );

    Ok(LtpaConfig {
        name: lease.name().to_string(),
        server_xml_secret: names.server_xml_secret,
        mount_xml_secret: names.mount_xml_secret,
        last_rotation,
    })
}

/// Delete the keys led by `app` so they are regenerated with its new image
///
/// # Errors
///
/// Propagates tracker and API errors.
pub async fn invalidate_ltpa_keys(ctx: &Reconciler, app: &OpenLibertyApplication) -> Result<(), Error> {
    let namespace = namespace_of(app)?;
    let instance = app.name_any();
    let store = tracker_store(&ctx.client, &namespace, Family::Ltpa, &ctx.assets);
    let tracker = match store.get().await {
        Ok((_, tracker)) => tracker,
        Err(TrackerError::NotFound { .. }) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let Some(entry) = tracker.entries.iter().find(|e| e.owner == instance) else {
        return Ok(());
    };
    let names = LtpaKeysNames::new(&entry.name);
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    if delete_if_exists(&secrets, &names.keys_secret).await? {
        info!(
            "🖼️  Image of {} changed, deleted LTPA keys {}/{} for regeneration",
            instance, namespace, names.keys_secret
        );
    }
    Ok(())
}
