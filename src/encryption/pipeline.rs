//! Mirror reconcile for one application.

use super::mirror::{internal_secret, mirror_action, select_form, xml_secrets, MirrorAction, UserSecretState};
use super::{EncryptionForm, EncryptionKey, EncryptionNames, PasswordEncryptionFactory};
use crate::constants::LAST_ROTATION;
use crate::controller::reconciler::Reconciler;
use crate::controller::Error;
use crate::crd::OpenLibertyApplication;
use crate::observability::metrics;
use crate::sharing::{
    apply_secret, delete_if_exists, lease_shared_resource, secret_bytes, secret_string,
    shared_resource_labels, Family, SharedResourceLease,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Make the internal encryption key available to `app`
///
/// # Errors
///
/// Returns [`Error::SecretMissing`] without a user Secret, [`Error::Validation`] when the
/// user Secret is misconfigured, [`Error::LeaderPending`] for a follower while the mirror
/// is stale, and tracker or API errors.
pub async fn reconcile_password_encryption(
    ctx: &Reconciler,
    app: &OpenLibertyApplication,
) -> Result<EncryptionKey, Error> {
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::Validation("OpenLibertyApplication must be namespaced".to_string()))?;
    let instance = app.name_any();
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);

    let aes = secrets.get_opt(EncryptionForm::Aes.user_secret()).await?;
    let legacy = secrets.get_opt(EncryptionForm::Legacy.user_secret()).await?;
    let selection = select_form(
        UserSecretState::of(aes.as_ref(), EncryptionForm::Aes),
        UserSecretState::of(legacy.as_ref(), EncryptionForm::Legacy),
    )?;
    if let Some(warning) = &selection.warning {
        warn!("⚠️  {}/{}: {}", namespace, instance, warning);
    }
    let form = selection.form;
    let user = match form {
        EncryptionForm::Aes => aes.as_ref(),
        EncryptionForm::Legacy => legacy.as_ref(),
    };
    let user_key = user
        .and_then(|s| secret_bytes(s, form.key_field()))
        .map(<[u8]>::to_vec)
        .unwrap_or_default();

    let factory = PasswordEncryptionFactory::new(ctx.config.cleanup_unused_resources);
    let lease = lease_shared_resource(
        &ctx.client,
        &namespace,
        &instance,
        &factory,
        &ctx.assets,
        ctx.config.sublease_eviction,
    )
    .await?;
    let names = EncryptionNames::new(form, lease.name());

    if !lease.is_leader() {
        let internal = secrets.get_opt(&names.internal_secret).await?;
        return match internal {
            Some(internal) if secret_bytes(&internal, form.key_field()) == Some(user_key.as_slice()) => {
                Ok(encryption_key(form, &lease, names, &internal))
            }
            _ => Err(Error::LeaderPending {
                family: Family::PasswordEncryption.to_string(),
                name: names.internal_secret,
                leader: lease.leader().to_string(),
            }),
        };
    }

    let labels = shared_resource_labels(&names.internal_secret, &instance, &lease.metadata.path_index);
    for candidate in EncryptionForm::ALL {
        let candidate_user = match candidate {
            EncryptionForm::Aes => aes.as_ref(),
            EncryptionForm::Legacy => legacy.as_ref(),
        };
        mirror(
            &secrets,
            &namespace,
            candidate,
            &EncryptionNames::new(candidate, lease.name()),
            &labels,
            candidate_user.and_then(|s| secret_bytes(s, candidate.key_field())),
        )
        .await?;
    }

    let internal = secrets.get_opt(&names.internal_secret).await?.ok_or_else(|| {
        Error::SharedResourceUnavailable(format!(
            "internal encryption key {} is not readable yet",
            names.internal_secret
        ))
    })?;
    let key = String::from_utf8_lossy(&user_key);
    let (server_xml, mount_xml) = xml_secrets(form, &names, &namespace, &labels, &key);
    apply_secret(&secrets, &server_xml).await?;
    apply_secret(&secrets, &mount_xml).await?;

    Ok(encryption_key(form, &lease, names, &internal))
}

/// Apply the mirror transition of one form
async fn mirror(
    secrets: &Api<Secret>,
    namespace: &str,
    form: EncryptionForm,
    names: &EncryptionNames,
    labels: &std::collections::BTreeMap<String, String>,
    user_key: Option<&[u8]>,
) -> Result<(), Error> {
    let internal = secrets.get_opt(&names.internal_secret).await?;
    let internal_key = internal.as_ref().and_then(|s| secret_bytes(s, form.key_field()));
    match mirror_action(user_key.filter(|k| !k.is_empty()), internal_key) {
        MirrorAction::Noop => {}
        MirrorAction::DeleteInternal => {
            info!("🧹 User {} Secret removed, deleting {}", form, names.internal_secret);
            delete_if_exists(secrets, &names.internal_secret).await?;
            delete_if_exists(secrets, &names.server_xml_secret).await?;
            delete_if_exists(secrets, &names.mount_xml_secret).await?;
        }
        MirrorAction::Write => {
            let Some(key) = user_key else {
                return Ok(());
            };
            let now = chrono::Utc::now().timestamp();
            let desired = internal_secret(form, names, namespace, labels, key, now);
            apply_secret(secrets, &desired).await?;
            metrics::increment_encryption_key_rotations();
            info!(
                "🔐 Mirrored {} encryption key into {} (lastRotation {})",
                form, names.internal_secret, now
            );
        }
    }
    debug!("Encryption mirror for {} is in sync", names.internal_secret);
    Ok(())
}

fn encryption_key(
    form: EncryptionForm,
    lease: &SharedResourceLease,
    names: EncryptionNames,
    internal: &Secret,
) -> EncryptionKey {
    EncryptionKey {
        form,
        name: lease.name().to_string(),
        internal_secret_name: names.internal_secret,
        key_field: form.key_field(),
        last_rotation: secret_string(internal, LAST_ROTATION).unwrap_or_default(),
        server_xml_secret: names.server_xml_secret,
        mount_xml_secret: names.mount_xml_secret,
    }
}
