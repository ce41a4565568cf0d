//! Step selection for the LTPA keys generation and the follower wait.
//!
//! The leader observes the generation objects of its keys suffix once per pass and then
//! walks [`next_step`] until a step has to wait or fail.

use super::drift::{check_keys_drift, KeysDrift};
use super::resources::{job_failed, job_template_matches, keys_encryption_rotation, script_in_sync};
use crate::controller::Error;
use crate::leader::LeaderTracker;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};

/// Generation objects seen for one keys suffix
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub request: bool,
    pub service_account: bool,
    pub role: bool,
    pub role_binding: bool,
    pub script: Option<ConfigMap>,
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbacObject {
    ServiceAccount,
    Role,
    RoleBinding,
}

impl RbacObject {
    pub fn kind(self) -> &'static str {
        match self {
            RbacObject::ServiceAccount => "ServiceAccounts",
            RbacObject::Role => "Roles",
            RbacObject::RoleBinding => "RoleBindings",
        }
    }
}

/// Next action of the keys leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStep {
    /// Create the request ConfigMap and drop the old Job and XML Secrets
    Request,
    Rbac(RbacObject),
    CreateScript,
    /// Deployed script differs from the bundled one
    ReplaceScript,
    CreateJob,
    /// Job was created from another template; delete it with the request
    RestartJob,
    JobFailed,
    AwaitKeys,
}

/// First unsatisfied step, in request, RBAC, script, Job order
pub fn next_step(observed: &Observed, script: &str, desired: &Job) -> GenerationStep {
    if !observed.request {
        return GenerationStep::Request;
    }
    if !observed.service_account {
        return GenerationStep::Rbac(RbacObject::ServiceAccount);
    }
    if !observed.role {
        return GenerationStep::Rbac(RbacObject::Role);
    }
    if !observed.role_binding {
        return GenerationStep::Rbac(RbacObject::RoleBinding);
    }
    match observed.script.as_ref() {
        None => return GenerationStep::CreateScript,
        Some(deployed) if !script_in_sync(deployed, script) => return GenerationStep::ReplaceScript,
        Some(_) => {}
    }
    match observed.job.as_ref() {
        None => GenerationStep::CreateJob,
        Some(job) if !job_template_matches(job, desired) => GenerationStep::RestartJob,
        Some(job) if job_failed(job) => GenerationStep::JobFailed,
        Some(_) => GenerationStep::AwaitKeys,
    }
}

/// Map a 403 on the generation RBAC to a validation error naming the missing permission
pub fn forbidden_as_validation(error: kube::Error, what: &str) -> Error {
    match error {
        kube::Error::Api(e) if e.code == 403 => Error::Validation(format!(
            "operator is not permitted to create {what}: {}",
            e.message
        )),
        e => e.into(),
    }
}

/// Config suffixes whose XML Secrets point at the keys generated under `keys_path`
pub fn stale_config_suffixes(keys_path: &str, config_tracker: &LeaderTracker) -> Vec<String> {
    let config_path = keys_path.replacen(".type.keys.", ".type.config.", 1);
    config_tracker
        .entries
        .iter()
        .filter(|e| e.path == config_path)
        .map(|e| e.name.clone())
        .collect()
}

/// Whether a follower may use the keys Secret the leader published
///
/// Keys the leader is about to regenerate for a new encryption key are not usable.
pub fn follower_keys_ready(
    keys: Option<&Secret>,
    manage_encryption: bool,
    internal_rotation: Option<&str>,
) -> bool {
    keys.is_some_and(|secret| {
        check_keys_drift(
            manage_encryption,
            internal_rotation,
            keys_encryption_rotation(secret).as_deref(),
        ) == KeysDrift::Keep
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ENCRYPTION_SECRET_LAST_ROTATION;
    use crate::leader::LeaderEntry;
    use crate::ltpa::resources::{generation_job, script_config_map, GenerationJobParams};
    use crate::ltpa::LtpaKeysNames;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    const SCRIPT: &str = "#!/bin/bash\necho keys\n";

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "apps.openliberty.io/v1".to_string(),
            kind: "OpenLibertyApplication".to_string(),
            name: "app-a".to_string(),
            uid: "uid-a".to_string(),
            ..Default::default()
        }
    }

    fn job(image: &str) -> Job {
        let names = LtpaKeysNames::new("-abcde");
        let labels = BTreeMap::new();
        let owner = owner();
        generation_job(&GenerationJobParams {
            names: &names,
            namespace: "ns",
            instance: "app-a",
            path_index: "v1_4_2.0",
            image,
            pull_policy: "IfNotPresent",
            pull_secret: None,
            encryption: None,
            labels: &labels,
            owner: &owner,
        })
    }

    fn script(content: &str) -> ConfigMap {
        script_config_map(&LtpaKeysNames::new("-abcde"), "ns", content, &BTreeMap::new(), &owner())
    }

    fn ready() -> Observed {
        Observed {
            request: true,
            service_account: true,
            role: true,
            role_binding: true,
            script: Some(script(SCRIPT)),
            job: Some(job("icr.io/app:1")),
        }
    }

    fn failed(mut job: Job) -> Job {
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        job
    }

    fn step(observed: &Observed) -> GenerationStep {
        next_step(observed, SCRIPT, &job("icr.io/app:1"))
    }

    #[test]
    fn test_request_comes_first() {
        assert_eq!(step(&Observed::default()), GenerationStep::Request);
        let mut observed = ready();
        observed.request = false;
        observed.script = Some(script("#!/bin/bash\necho old\n"));
        assert_eq!(step(&observed), GenerationStep::Request);
    }

    #[test]
    fn test_rbac_in_order_before_script() {
        let mut observed = Observed {
            request: true,
            ..Default::default()
        };
        assert_eq!(step(&observed), GenerationStep::Rbac(RbacObject::ServiceAccount));
        observed.service_account = true;
        assert_eq!(step(&observed), GenerationStep::Rbac(RbacObject::Role));
        observed.role = true;
        assert_eq!(step(&observed), GenerationStep::Rbac(RbacObject::RoleBinding));
        observed.role_binding = true;
        assert_eq!(step(&observed), GenerationStep::CreateScript);
    }

    #[test]
    fn test_out_of_sync_script_is_replaced_before_job() {
        let mut observed = ready();
        observed.script = Some(script("#!/bin/bash\necho old\n"));
        observed.job = Some(failed(job("icr.io/app:1")));
        assert_eq!(step(&observed), GenerationStep::ReplaceScript);
    }

    #[test]
    fn test_job_outcomes() {
        let mut observed = ready();
        assert_eq!(step(&observed), GenerationStep::AwaitKeys);

        observed.job = None;
        assert_eq!(step(&observed), GenerationStep::CreateJob);

        observed.job = Some(failed(job("icr.io/app:1")));
        assert_eq!(step(&observed), GenerationStep::JobFailed);

        // a stale template restarts even when that Job failed
        observed.job = Some(failed(job("icr.io/app:0")));
        assert_eq!(step(&observed), GenerationStep::RestartJob);
    }

    #[test]
    fn test_forbidden_rbac_is_validation() {
        let forbidden = kube::Error::Api(Box::new(kube::core::Status {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: "roles.rbac.authorization.k8s.io is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
            metadata: None,
            details: None,
        }));
        match forbidden_as_validation(forbidden, RbacObject::Role.kind()) {
            Error::Validation(message) => {
                assert!(message.contains("Roles"));
                assert!(message.contains("forbidden"));
            }
            other => panic!("expected a validation error, got {other:?}"),
        }

        let conflict = kube::Error::Api(Box::new(kube::core::Status {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
            metadata: None,
            details: None,
        }));
        assert!(matches!(
            forbidden_as_validation(conflict, "Roles"),
            Error::Kube(_)
        ));
    }

    #[test]
    fn test_stale_config_suffixes_follow_keys_path() {
        let entry = |name: &str, path: &str| LeaderEntry {
            name: name.to_string(),
            owner: "app-a".to_string(),
            path: path.to_string(),
            path_index: "v1_4_2.1".to_string(),
            sublease: "0".to_string(),
        };
        let mut tracker = LeaderTracker::new("v1_4_2");
        tracker.entries = vec![
            entry("-aaaaa", "v1_4_2.type.config.managePasswordEncryption.true"),
            entry("-bbbbb", "v1_4_2.type.config.managePasswordEncryption.false"),
            entry("-ccccc", "v1_4_1.type.config.managePasswordEncryption.true"),
        ];
        assert_eq!(
            stale_config_suffixes("v1_4_2.type.keys.managePasswordEncryption.true", &tracker),
            vec!["-aaaaa".to_string()]
        );
        assert!(stale_config_suffixes("v1_4_2.type.keys.managePasswordEncryption.true", &LeaderTracker::new("v1_4_2")).is_empty());
    }

    #[test]
    fn test_follower_waits_for_drifted_keys() {
        let keys = |rotation: Option<&str>| Secret {
            data: rotation.map(|r| {
                BTreeMap::from([(
                    ENCRYPTION_SECRET_LAST_ROTATION.to_string(),
                    ByteString(r.as_bytes().to_vec()),
                )])
            }),
            ..Default::default()
        };
        assert!(!follower_keys_ready(None, true, Some("200")));
        assert!(follower_keys_ready(Some(&keys(Some("200"))), true, Some("200")));
        // leader will delete keys encoded with an older encryption key
        assert!(!follower_keys_ready(Some(&keys(Some("100"))), true, Some("200")));
        assert!(!follower_keys_ready(Some(&keys(Some("100"))), false, None));
        assert!(follower_keys_ready(Some(&keys(None)), false, None));
    }
}
