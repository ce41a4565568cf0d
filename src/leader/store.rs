//! Kubernetes persistence of leader trackers.

use super::record::{DiscoveredResource, LeaderDecision, LeaderEntry, LeaderMetadata, LeaderTracker};
use super::{secret, tracker_lock, tracker_secret_name, SubleaseEviction, TrackerError};
use crate::tree::{DecisionTree, ReplaceMap};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::future::Future;
use tracing::{debug, info, warn};

/// Tracking Secret of one family in one namespace
#[derive(Clone)]
pub struct LeaderTrackerStore {
    api: Api<Secret>,
    namespace: String,
    family: String,
    secret_name: String,
    /// Tree version new records are written against
    version: String,
}

impl std::fmt::Debug for LeaderTrackerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderTrackerStore")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl LeaderTrackerStore {
    pub fn new(client: Client, namespace: &str, family: &str, version: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            family: family.to_string(),
            secret_name: tracker_secret_name(family),
            version: version.to_string(),
        }
    }

    /// Read and validate the tracking Secret
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`] when absent. [`TrackerError::OutOfSync`] when the Secret
    /// fails validation; it is deleted before returning so the next pass rebuilds it.
    pub async fn get(&self) -> Result<(Secret, LeaderTracker), TrackerError> {
        let secret = match self.api.get(&self.secret_name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(TrackerError::NotFound {
                    name: self.secret_name.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        match secret::decode(&secret) {
            Ok(tracker) => Ok((secret, tracker)),
            Err(e) => {
                warn!("⚠️  {}", e);
                self.delete_secret().await?;
                Err(e)
            }
        }
    }

    /// Ensure the tracking Secret exists and matches the latest tree version
    ///
    /// An absent (or invalid) Secret is rebuilt from `discover`, with every owner evicted
    /// and every path migrated to `latest`. A Secret written against another version is
    /// deleted and [`TrackerError::Outdated`] returned so the next pass rebuilds it.
    ///
    /// # Errors
    ///
    /// Propagates API errors, discovery errors and creation conflicts.
    pub async fn reconcile<F, Fut>(
        &self,
        tree: &DecisionTree,
        replace: &ReplaceMap,
        latest: &str,
        discover: F,
    ) -> Result<LeaderTracker, TrackerError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<DiscoveredResource>, TrackerError>> + Send,
    {
        let lock = tracker_lock(&self.namespace, &self.family);
        let _guard = lock.lock().await;

        match self.get().await {
            Ok((_, tracker)) if tracker.version == latest => return Ok(tracker),
            Ok((_, tracker)) => {
                self.delete_secret().await?;
                return Err(TrackerError::Outdated {
                    name: self.secret_name.clone(),
                    found: tracker.version,
                    expected: latest.to_string(),
                });
            }
            Err(TrackerError::NotFound { .. } | TrackerError::OutOfSync { .. }) => {}
            Err(e) => return Err(e),
        }

        let discovered = discover().await?;
        let tracker = LeaderTracker::rebuild(
            &discovered,
            tree,
            replace,
            latest,
            chrono::Utc::now().timestamp(),
        );
        info!(
            "🔧 Rebuilding leader tracker {}/{} from {} discovered resources ({} tracked)",
            self.namespace,
            self.secret_name,
            discovered.len(),
            tracker.entries.len()
        );
        self.save(None, &tracker).await?;
        crate::observability::metrics::increment_tracker_rebuilds(&self.family);
        Ok(tracker)
    }

    /// Claim, renew or observe leadership of `metadata` for `instance`
    ///
    /// # Errors
    ///
    /// Propagates API errors; a concurrent write surfaces as [`TrackerError::Conflict`].
    pub async fn reconcile_leader(
        &self,
        instance: &str,
        metadata: &LeaderMetadata,
        should_elect: bool,
        eviction: SubleaseEviction,
    ) -> Result<LeaderDecision, TrackerError> {
        let lock = tracker_lock(&self.namespace, &self.family);
        let _guard = lock.lock().await;

        let (existing, mut tracker) = self.get_or_empty().await?;
        let now = chrono::Utc::now().timestamp();

        if let SubleaseEviction::Expired { threshold_secs } = eviction {
            if let Some(index) = tracker.find(&metadata.name, &metadata.path_index) {
                if tracker.entries[index].owner != instance {
                    tracker.evict_owner_if_sublease_has_expired(index, now, threshold_secs);
                }
            }
        }

        let decision = tracker.elect(instance, metadata, should_elect, now);
        if decision.changed {
            self.save(existing.as_ref(), &tracker).await?;
        }
        debug!(
            family = %self.family,
            instance,
            leader = %decision.leader,
            "Leader decision for shared resource {:?}",
            metadata.name
        );
        Ok(decision)
    }

    /// Drop `instance` from the entry named `name`
    ///
    /// # Errors
    ///
    /// Propagates API errors.
    pub async fn release_leader(&self, instance: &str, name: &str) -> Result<(), TrackerError> {
        let lock = tracker_lock(&self.namespace, &self.family);
        let _guard = lock.lock().await;

        let (existing, mut tracker) = match self.get().await {
            Ok((secret, tracker)) => (secret, tracker),
            Err(TrackerError::NotFound { .. } | TrackerError::OutOfSync { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        if tracker.release(instance, name) {
            self.save(Some(&existing), &tracker).await?;
        }
        Ok(())
    }

    /// Remove `instance` from every entry it owns
    ///
    /// The Secret is deleted once no entry has an owner. With `cleanup_unused`, entries
    /// left without an owner are dropped from the record; they are returned so the caller
    /// can delete the resources they describe.
    ///
    /// # Errors
    ///
    /// Propagates API errors.
    pub async fn remove_leader(
        &self,
        instance: &str,
        cleanup_unused: bool,
    ) -> Result<Vec<LeaderEntry>, TrackerError> {
        let lock = tracker_lock(&self.namespace, &self.family);
        let _guard = lock.lock().await;

        let (existing, mut tracker) = match self.get().await {
            Ok((secret, tracker)) => (secret, tracker),
            Err(TrackerError::NotFound { .. } | TrackerError::OutOfSync { .. }) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        if !tracker.remove_leader(instance) {
            return Ok(Vec::new());
        }

        if !tracker.has_owners() {
            info!(
                "🧹 No owners left in {}/{}, deleting leader tracker",
                self.namespace, self.secret_name
            );
            self.delete_secret().await?;
            return Ok(if cleanup_unused { tracker.entries } else { Vec::new() });
        }

        let unused = if cleanup_unused {
            tracker.take_unowned()
        } else {
            Vec::new()
        };
        self.save(Some(&existing), &tracker).await?;
        Ok(unused)
    }

    async fn get_or_empty(&self) -> Result<(Option<Secret>, LeaderTracker), TrackerError> {
        match self.get().await {
            Ok((secret, tracker)) => Ok((Some(secret), tracker)),
            Err(TrackerError::NotFound { .. } | TrackerError::OutOfSync { .. }) => {
                Ok((None, LeaderTracker::new(self.version.clone())))
            }
            Err(e) => Err(e),
        }
    }

    /// Create or replace the Secret; `existing` supplies the resourceVersion to compare
    async fn save(&self, existing: Option<&Secret>, tracker: &LeaderTracker) -> Result<(), TrackerError> {
        let mut desired = secret::encode(&self.secret_name, &self.namespace, tracker);
        let result = match existing {
            Some(current) => {
                desired.metadata.resource_version = current.metadata.resource_version.clone();
                desired.metadata.owner_references = current.metadata.owner_references.clone();
                self.api
                    .replace(&self.secret_name, &PostParams::default(), &desired)
                    .await
            }
            None => self.api.create(&PostParams::default(), &desired).await,
        };
        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(TrackerError::Conflict {
                name: self.secret_name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_secret(&self) -> Result<(), TrackerError> {
        match self.api.delete(&self.secret_name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
