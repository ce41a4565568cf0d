//! # Resource Sharing
//!
//! Binds each shared-resource family to the generic leader tracker.
//!
//! A family supplies a [`SharedResourceFactory`]: how to recognise its objects in the
//! cluster (through [`Signature`]s), how to key them, which tree paths an application
//! instance requests, and how to delete the artifacts behind a name.
//! [`lease_shared_resource`] then runs the common protocol: make sure the tracker exists
//! (rebuilding it from discovery when needed), compute the instance's metadata, and claim
//! or observe leadership.

pub mod assets;
pub mod signature;
pub mod suffix;
pub mod xml;

pub use assets::{SharedTree, SharingAssets};
pub use signature::Signature;

use crate::constants::{
    FIELD_MANAGER, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_NAME, LABEL_RESOURCE_PATH_INDEX,
    MANAGED_BY,
};
use crate::controller::Error;
use crate::leader::{
    DiscoveredResource, LeaderDecision, LeaderMetadata, LeaderTracker, LeaderTrackerStore,
    SubleaseEviction, TrackerError,
};
use crate::observability;
use crate::tree;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info};

/// Shared-resource families, each with its own leader tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// LTPA keys Secret and its generation Job
    Ltpa,
    /// LTPA server XML without password encryption
    LtpaConfig1,
    /// LTPA server XML with password encryption
    LtpaConfig2,
    /// Internal password-encryption key mirror
    PasswordEncryption,
    /// Per-pod trace dropin
    Trace,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::Ltpa,
        Family::LtpaConfig1,
        Family::LtpaConfig2,
        Family::PasswordEncryption,
        Family::Trace,
    ];

    /// Family name, used in the tracker Secret name and lock keys
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Ltpa => "ltpa",
            Family::LtpaConfig1 => "ltpa-config-1",
            Family::LtpaConfig2 => "ltpa-config-2",
            Family::PasswordEncryption => "password-encryption",
            Family::Trace => "trace",
        }
    }

    /// Decision tree asset the family is described by
    pub fn tree_name(self) -> &'static str {
        match self {
            Family::Ltpa | Family::LtpaConfig1 | Family::LtpaConfig2 => "ltpa",
            Family::PasswordEncryption => "password-encryption",
            Family::Trace => "trace",
        }
    }

    /// Signature asset the family is discovered through
    pub fn signature_name(self) -> &'static str {
        match self {
            Family::Ltpa => "ltpa",
            Family::LtpaConfig1 | Family::LtpaConfig2 => "ltpa-config",
            Family::PasswordEncryption => "password-encryption",
            Family::Trace => "trace",
        }
    }

    /// LTPA config variant for the given password-encryption setting
    pub fn ltpa_config(manage_password_encryption: bool) -> Self {
        if manage_password_encryption {
            Family::LtpaConfig2
        } else {
            Family::LtpaConfig1
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities a family provides to the generic leader protocol
#[async_trait]
pub trait SharedResourceFactory: Send + Sync {
    fn family(&self) -> Family;

    /// Tracked name of a discovered object
    fn name_from(&self, signature: &Signature, obj: &DynamicObject) -> Option<String> {
        signature.suffix_of(obj.metadata.name.as_deref()?)
    }

    /// Path index of a discovered object
    fn path_index_from(&self, obj: &DynamicObject, _tree: &SharedTree) -> Option<String> {
        obj.metadata
            .labels
            .as_ref()?
            .get(LABEL_RESOURCE_PATH_INDEX)
            .cloned()
    }

    /// Whether a discovered path belongs to this family
    fn accepts_path(&self, _path: &str) -> bool {
        true
    }

    /// Resources requested by the instance; the first is claimed, the rest are released
    ///
    /// # Errors
    ///
    /// Returns an error when the instance's options have no path in the tree.
    fn compute_metadata(&self, tree: &SharedTree, tracker: &LeaderTracker) -> Result<Vec<LeaderMetadata>, Error>;

    /// Delete every artifact generated for `name`
    async fn delete(&self, client: &Client, namespace: &str, name: &str) -> Result<(), kube::Error>;

    /// Whether artifacts left without an owner may be deleted opportunistically
    fn cleanup_unused_resources(&self) -> bool {
        false
    }
}

/// Outcome of the leader protocol for one instance
#[derive(Debug, Clone)]
pub struct SharedResourceLease {
    pub metadata: LeaderMetadata,
    pub decision: LeaderDecision,
}

impl SharedResourceLease {
    pub fn is_leader(&self) -> bool {
        self.decision.is_leader
    }

    pub fn leader(&self) -> &str {
        &self.decision.leader
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// List every in-cluster object matching one of `signatures`
///
/// # Errors
///
/// Propagates API errors other than a missing resource type.
pub async fn enumerate_existing(
    client: &Client,
    namespace: &str,
    signatures: &[Signature],
) -> Result<Vec<(usize, DynamicObject)>, kube::Error> {
    let mut found = Vec::new();
    for (index, signature) in signatures.iter().enumerate() {
        let resource = signature.api_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &resource);
        let mut params = ListParams::default();
        if let Some(selector) = &signature.label_selector {
            params = params.labels(selector);
        }
        let list = match api.list(&params).await {
            Ok(list) => list,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Resource type {} is not served, skipping discovery", signature.kind);
                continue;
            }
            Err(e) => return Err(e),
        };
        found.extend(
            list.items
                .into_iter()
                .filter(|obj| obj.metadata.name.as_deref().is_some_and(|n| signature.matches(n)))
                .map(|obj| (index, obj)),
        );
    }
    Ok(found)
}

/// Discovery snapshot of a family, as consumed by the tracker rebuild
///
/// # Errors
///
/// Propagates API errors.
pub async fn discover<F: SharedResourceFactory + ?Sized>(
    client: &Client,
    namespace: &str,
    factory: &F,
    assets: &SharingAssets,
) -> Result<Vec<DiscoveredResource>, TrackerError> {
    let signatures = assets.signatures(factory.family());
    let shared_tree = assets.tree(factory.family());
    let objects = enumerate_existing(client, namespace, signatures).await?;
    Ok(objects
        .iter()
        .filter_map(|(index, obj)| {
            let name = factory.name_from(&signatures[*index], obj)?;
            let path_index = factory.path_index_from(obj, shared_tree)?;
            let (version, leaf) = tree::split_path_index(&path_index)?;
            let path = tree::get_path_from_leaf_index(&shared_tree.tree, version, leaf).ok()?;
            factory
                .accepts_path(&path)
                .then_some(DiscoveredResource { name, path_index })
        })
        .collect())
}

/// Tracker store for a family in a namespace
pub fn tracker_store(client: &Client, namespace: &str, family: Family, assets: &SharingAssets) -> LeaderTrackerStore {
    LeaderTrackerStore::new(
        client.clone(),
        namespace,
        family.as_str(),
        &assets.tree(family).latest,
    )
}

/// Run the leader protocol for `instance` over the family of `factory`
///
/// # Errors
///
/// Propagates tracker, tree and API errors.
pub async fn lease_shared_resource<F: SharedResourceFactory + ?Sized>(
    client: &Client,
    namespace: &str,
    instance: &str,
    factory: &F,
    assets: &SharingAssets,
    eviction: SubleaseEviction,
) -> Result<SharedResourceLease, Error> {
    let family = factory.family();
    let shared_tree = assets.tree(family);
    let store = tracker_store(client, namespace, family, assets);

    let tracker = store
        .reconcile(&shared_tree.tree, &shared_tree.replace, &shared_tree.latest, || {
            discover(client, namespace, factory, assets)
        })
        .await?;

    let mut requested = factory.compute_metadata(shared_tree, &tracker)?.into_iter();
    let metadata = requested.next().ok_or_else(|| {
        Error::Validation(format!("no {family} resource applies to {instance}"))
    })?;
    for released in requested {
        info!(
            "🔓 Releasing {} resource {:?} held by {}",
            family, released.name, instance
        );
        store.release_leader(instance, &released.name).await?;
    }

    let decision = store
        .reconcile_leader(instance, &metadata, true, eviction)
        .await?;
    let role = if decision.is_leader { "leader" } else { "follower" };
    observability::metrics::increment_leader_elections(family.as_str(), role);
    if decision.is_leader {
        debug!("👑 {} leads {} resource {:?}", instance, family, metadata.name);
    } else {
        debug!(
            "{} follows {} for {} resource {:?}",
            instance, decision.leader, family, metadata.name
        );
    }
    Ok(SharedResourceLease { metadata, decision })
}

/// Remove `instance` from the family's tracker, deleting orphaned artifacts when allowed
///
/// # Errors
///
/// Propagates tracker and API errors.
pub async fn remove_from_tracker<F: SharedResourceFactory + ?Sized>(
    client: &Client,
    namespace: &str,
    instance: &str,
    factory: &F,
    assets: &SharingAssets,
) -> Result<(), Error> {
    let store = tracker_store(client, namespace, factory.family(), assets);
    let unused = store
        .remove_leader(instance, factory.cleanup_unused_resources())
        .await?;
    for entry in unused {
        info!(
            "🧹 Deleting unused {} resource {:?} ({})",
            factory.family(),
            entry.name,
            entry.path
        );
        factory.delete(client, namespace, &entry.name).await?;
    }
    Ok(())
}

/// Create `obj` unless an object of that name exists; returns whether it was created
///
/// # Errors
///
/// Propagates API errors other than a conflict.
pub async fn create_if_absent<K>(api: &Api<K>, obj: &K) -> Result<bool, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete `name` if it exists; returns whether a deletion was issued
///
/// # Errors
///
/// Propagates API errors other than not-found.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<bool, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
        Err(e) => Err(e),
    }
}

/// Labels carried by every generated shared resource
pub fn shared_resource_labels(name: &str, instance: &str, path_index: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_INSTANCE.to_string(), instance.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_RESOURCE_PATH_INDEX.to_string(), path_index.to_string()),
    ])
}

/// Server-side apply a Secret owned by the operator
///
/// # Errors
///
/// Propagates API errors.
pub async fn apply_secret(api: &Api<Secret>, secret: &Secret) -> Result<Secret, kube::Error> {
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(secret))
        .await
}

/// UTF-8 value of a Secret data key
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    let bytes = secret.data.as_ref()?.get(key)?;
    String::from_utf8(bytes.0.clone()).ok()
}

/// Raw bytes of a Secret data key
pub fn secret_bytes<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret.data.as_ref()?.get(key).map(|b| b.0.as_slice())
}

/// Secret data from string pairs
pub fn secret_data<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> BTreeMap<String, ByteString> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names() {
        let names: Vec<_> = Family::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(
            names,
            vec!["ltpa", "ltpa-config-1", "ltpa-config-2", "password-encryption", "trace"]
        );
        assert_eq!(Family::LtpaConfig2.tree_name(), "ltpa");
        assert_eq!(Family::LtpaConfig1.signature_name(), "ltpa-config");
    }

    #[test]
    fn test_shared_resource_labels() {
        let labels = shared_resource_labels("olo-managed-ltpa-abcde", "app-a", "v1_4_2.0");
        assert_eq!(labels[LABEL_MANAGED_BY], "open-liberty-operator");
        assert_eq!(labels[LABEL_RESOURCE_PATH_INDEX], "v1_4_2.0");
    }

    #[test]
    fn test_secret_accessors() {
        let secret = Secret {
            data: Some(secret_data([("password", "{aes}abc".to_string())])),
            ..Default::default()
        };
        assert_eq!(secret_string(&secret, "password").as_deref(), Some("{aes}abc"));
        assert_eq!(secret_bytes(&secret, "password"), Some(b"{aes}abc".as_slice()));
        assert_eq!(secret_string(&secret, "missing"), None);
    }

    #[test]
    fn test_ltpa_config_variant() {
        assert_eq!(Family::ltpa_config(false), Family::LtpaConfig1);
        assert_eq!(Family::ltpa_config(true), Family::LtpaConfig2);
    }
}
