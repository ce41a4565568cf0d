//! # Manager Leader Election
//!
//! With `--enable-leader-election`, only the holder of a `coordination.k8s.io/v1` Lease
//! runs the controllers.
//!
//! Updates carry the observed `resourceVersion`, so two replicas racing for an expired
//! lease cannot both win: the loser gets a 409 and retries.

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::jiff::{SignedDuration, Timestamp};
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(20);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// What to do with the Lease as observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Create,
    Renew,
    TakeOver,
    Wait,
}

/// Decide how `identity` proceeds with `lease` at `now`
pub fn lease_action(lease: Option<&Lease>, identity: &str, now: Timestamp) -> LeaseAction {
    let Some(lease) = lease else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseAction::Renew;
    }
    let expired = match (
        spec.and_then(|s| s.renew_time.as_ref()),
        spec.and_then(|s| s.lease_duration_seconds),
    ) {
        (Some(renewed), Some(duration)) => renewed
            .0
            .checked_add(SignedDuration::from_secs(i64::from(duration)))
            .map_or(true, |expiry| now > expiry),
        _ => true,
    };
    if holder.is_none() || expired {
        LeaseAction::TakeOver
    } else {
        LeaseAction::Wait
    }
}

/// Manager-level Lease elector
pub struct ManagerLease {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl ManagerLease {
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until the Lease is held, then keep renewing it
    ///
    /// Transient API failures are retried. The returned receiver fires when leadership
    /// is lost.
    pub async fn acquire(self: Arc<Self>) -> oneshot::Receiver<()> {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "Waiting for leadership..."
        );
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => debug!(identity = %self.identity, "Lease held by another, waiting..."),
                Err(e) => warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying..."),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
        info!(identity = %self.identity, "👑 Leadership acquired");

        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RENEW_INTERVAL).await;
                match elector.try_acquire_or_renew().await {
                    Ok(true) => debug!(identity = %elector.identity, "Lease renewed"),
                    Ok(false) | Err(_) => {
                        warn!(identity = %elector.identity, "Leadership lost");
                        // The receiver may already be gone during shutdown
                        let _ = lost_tx.send(());
                        return;
                    }
                }
            }
        });
        lost_rx
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Timestamp::now();
        let existing = api.get_opt(&self.lease_name).await?;

        let action = lease_action(existing.as_ref(), &self.identity, now);
        let previous = existing.as_ref().and_then(|l| l.spec.clone()).unwrap_or_default();
        let spec = match action {
            LeaseAction::Wait => return Ok(false),
            LeaseAction::Renew => LeaseSpec {
                renew_time: Some(MicroTime(now)),
                ..previous
            },
            LeaseAction::Create | LeaseAction::TakeOver => LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: i32::try_from(LEASE_DURATION.as_secs()).ok(),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(
                    previous.lease_transitions.unwrap_or(0) + i32::from(action == LeaseAction::TakeOver),
                ),
                ..Default::default()
            },
        };
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: existing.and_then(|l| l.metadata.resource_version),
                ..Default::default()
            },
            spec: Some(spec),
        };

        let result = if action == LeaseAction::Create {
            api.create(&PostParams::default(), &lease).await
        } else {
            api.replace(&self.lease_name, &PostParams::default(), &lease).await
        };
        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease update conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: Timestamp) -> Lease {
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(30),
                renew_time: Some(MicroTime(renewed)),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_lease_action() {
        let now = Timestamp::now();
        assert_eq!(lease_action(None, "pod-a", now), LeaseAction::Create);
        assert_eq!(
            lease_action(Some(&lease(Some("pod-a"), now)), "pod-a", now),
            LeaseAction::Renew
        );
        assert_eq!(
            lease_action(Some(&lease(Some("pod-b"), now)), "pod-a", now),
            LeaseAction::Wait
        );
        let stale = now - SignedDuration::from_secs(31);
        assert_eq!(
            lease_action(Some(&lease(Some("pod-b"), stale)), "pod-a", now),
            LeaseAction::TakeOver
        );
        assert_eq!(
            lease_action(Some(&lease(None, now)), "pod-a", now),
            LeaseAction::TakeOver
        );
    }
}
