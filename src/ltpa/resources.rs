//! Builders for the objects of an LTPA keys generation.

use super::LtpaKeysNames;
use crate::constants::{
    ANNOTATION_SCRIPT_HASH, ENCRYPTION_SECRET_LAST_ROTATION, LABEL_NAME, LTPA_KEYS_FILE,
    LTPA_SCRIPT_FILE,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, EnvVar, KeyToPath,
    LocalObjectReference, PodSecurityContext, PodSpec, PodTemplateSpec, SeccompProfile,
    SecretVolumeSource, SecurityContext, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const SCRIPTS_DIR: &str = "/scripts";
const ENCRYPTION_KEY_DIR: &str = "/etc/encryption-key";
const ENCRYPTION_KEY_FILE: &str = "encryptionKey";

/// Internal encryption key handed to the generation Job
#[derive(Debug, Clone, Copy)]
pub struct EncryptionMount<'a> {
    pub secret_name: &'a str,
    /// Data key holding the key bytes
    pub key: &'a str,
    pub last_rotation: &'a str,
}

/// Everything the generation Job depends on
#[derive(Debug, Clone, Copy)]
pub struct GenerationJobParams<'a> {
    pub names: &'a LtpaKeysNames,
    pub namespace: &'a str,
    pub instance: &'a str,
    pub path_index: &'a str,
    pub image: &'a str,
    pub pull_policy: &'a str,
    pub pull_secret: Option<&'a str>,
    pub encryption: Option<EncryptionMount<'a>>,
    pub labels: &'a BTreeMap<String, String>,
    pub owner: &'a OwnerReference,
}

fn metadata(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> ObjectMeta {
    let mut labels = labels.clone();
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// Hex SHA-256 of the generator script
pub fn script_hash(script: &str) -> String {
    format!("{:x}", Sha256::digest(script.as_bytes()))
}

/// ConfigMap whose presence marks a generation in progress
pub fn job_request_config_map(
    names: &LtpaKeysNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> ConfigMap {
    ConfigMap {
        metadata: metadata(&names.job_request, namespace, labels, owner),
        ..Default::default()
    }
}

/// Immutable ConfigMap carrying the generator script and its hash
pub fn script_config_map(
    names: &LtpaKeysNames,
    namespace: &str,
    script: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> ConfigMap {
    let mut meta = metadata(&names.script, namespace, labels, owner);
    meta.annotations = Some(BTreeMap::from([(
        ANNOTATION_SCRIPT_HASH.to_string(),
        script_hash(script),
    )]));
    ConfigMap {
        metadata: meta,
        immutable: Some(true),
        data: Some(BTreeMap::from([(
            LTPA_SCRIPT_FILE.to_string(),
            script.to_string(),
        )])),
        ..Default::default()
    }
}

/// Whether a deployed script ConfigMap carries exactly `script`
pub fn script_in_sync(config_map: &ConfigMap, script: &str) -> bool {
    let content_matches = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(LTPA_SCRIPT_FILE))
        .is_some_and(|deployed| deployed == script);
    let hash_matches = config_map
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_SCRIPT_HASH))
        .is_some_and(|hash| *hash == script_hash(script));
    content_matches && hash_matches
}

pub fn service_account(
    names: &LtpaKeysNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(&names.generation, namespace, labels, owner),
        ..Default::default()
    }
}

/// Role allowing the Job to read and create Secrets in its namespace
pub fn role(
    names: &LtpaKeysNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> Role {
    Role {
        metadata: metadata(&names.generation, namespace, labels, owner),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["secrets".to_string()]),
            verbs: vec!["create".to_string(), "get".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn role_binding(
    names: &LtpaKeysNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> RoleBinding {
    RoleBinding {
        metadata: metadata(&names.generation, namespace, labels, owner),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: names.generation.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: names.generation.clone(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn container_security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(true),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Job running the generator script in the application image
pub fn generation_job(params: &GenerationJobParams<'_>) -> Job {
    let names = params.names;
    let mut env_vars = vec![
        env("NAMESPACE", params.namespace),
        env("LTPA_SECRET_NAME", &names.keys_secret),
        env("LTPA_FILE_NAME", LTPA_KEYS_FILE),
        env("ENCODING_TYPE", "aes"),
        env("PATH_INDEX", params.path_index),
        env("INSTANCE_NAME", params.instance),
    ];
    let mut volumes = vec![Volume {
        name: "scripts".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: names.script.clone(),
            default_mode: Some(0o555),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "scripts".to_string(),
        mount_path: SCRIPTS_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    if let Some(encryption) = params.encryption {
        env_vars.push(env(
            "ENCRYPTION_SECRET_LAST_ROTATION",
            encryption.last_rotation,
        ));
        volumes.push(Volume {
            name: "encryption-key".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(encryption.secret_name.to_string()),
                items: Some(vec![KeyToPath {
                    key: encryption.key.to_string(),
                    path: ENCRYPTION_KEY_FILE.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "encryption-key".to_string(),
            mount_path: ENCRYPTION_KEY_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    Job {
        metadata: metadata(&names.generation, params.namespace, params.labels, params.owner),
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            ttl_seconds_after_finished: Some(300),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        LABEL_NAME.to_string(),
                        names.generation.clone(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(names.generation.clone()),
                    restart_policy: Some("Never".to_string()),
                    image_pull_secrets: params.pull_secret.map(|name| {
                        vec![LocalObjectReference {
                            name: name.to_string(),
                        }]
                    }),
                    security_context: Some(pod_security_context()),
                    containers: vec![Container {
                        name: "create-ltpa-keys".to_string(),
                        image: Some(params.image.to_string()),
                        image_pull_policy: Some(params.pull_policy.to_string()),
                        command: Some(vec![
                            "/bin/bash".to_string(),
                            format!("{SCRIPTS_DIR}/{LTPA_SCRIPT_FILE}"),
                        ]),
                        env: Some(env_vars),
                        volume_mounts: Some(mounts),
                        security_context: Some(container_security_context()),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

type TemplateFingerprint<'a> = (
    Option<&'a Vec<LocalObjectReference>>,
    Option<&'a PodSecurityContext>,
    Option<&'a String>,
    Option<&'a String>,
    Option<&'a SecurityContext>,
    Option<String>,
);

fn template_fingerprint(job: &Job) -> Option<TemplateFingerprint<'_>> {
    let pod = job.spec.as_ref()?.template.spec.as_ref()?;
    let container = pod.containers.first()?;
    let rotation = container.env.as_ref().and_then(|env| {
        env.iter()
            .find(|e| e.name == "ENCRYPTION_SECRET_LAST_ROTATION")
            .and_then(|e| e.value.clone())
    });
    Some((
        pod.image_pull_secrets.as_ref(),
        pod.security_context.as_ref(),
        container.image.as_ref(),
        container.image_pull_policy.as_ref(),
        container.security_context.as_ref(),
        rotation,
    ))
}

/// Whether an existing Job was created from the same template as `desired`
///
/// Compares pull secret, pull policy, image, security contexts and the encryption key
/// rotation the keys would be encoded with.
pub fn job_template_matches(existing: &Job, desired: &Job) -> bool {
    match (template_fingerprint(existing), template_fingerprint(desired)) {
        (Some(existing), Some(desired)) => existing == desired,
        _ => false,
    }
}

/// Whether the Job reports terminal failure
pub fn job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Failed" && c.status == "True")
        })
}

/// Rotation the keys Secret was encoded against
pub fn keys_encryption_rotation(keys: &k8s_openapi::api::core::v1::Secret) -> Option<String> {
    crate::sharing::secret_string(keys, ENCRYPTION_SECRET_LAST_ROTATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "apps.openliberty.io/v1".to_string(),
            kind: "OpenLibertyApplication".to_string(),
            name: "app-a".to_string(),
            uid: "uid-a".to_string(),
            ..Default::default()
        }
    }

    fn job(pull_policy: &str, encryption: Option<EncryptionMount<'_>>) -> Job {
        let names = LtpaKeysNames::new("-abcde");
        let labels = BTreeMap::new();
        let owner = owner();
        generation_job(&GenerationJobParams {
            names: &names,
            namespace: "ns",
            instance: "app-a",
            path_index: "v1_4_2.0",
            image: "icr.io/app:1",
            pull_policy,
            pull_secret: Some("pull"),
            encryption,
            labels: &labels,
            owner: &owner,
        })
    }

    #[test]
    fn test_script_config_map_is_immutable_and_hashed() {
        let names = LtpaKeysNames::new("-abcde");
        let cm = script_config_map(&names, "ns", "#!/bin/bash\necho hi\n", &BTreeMap::new(), &owner());
        assert_eq!(cm.immutable, Some(true));
        assert!(script_in_sync(&cm, "#!/bin/bash\necho hi\n"));
        assert!(!script_in_sync(&cm, "#!/bin/bash\necho bye\n"));

        let mut missing_key = cm.clone();
        missing_key.data = Some(BTreeMap::new());
        assert!(!script_in_sync(&missing_key, "#!/bin/bash\necho hi\n"));
    }

    #[test]
    fn test_script_hash_is_hex_sha256() {
        assert_eq!(
            script_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_job_is_restricted() {
        let job = job("IfNotPresent", None);
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(2));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        let pod = spec.template.spec.as_ref().unwrap();
        let container = &pod.containers[0];
        let sc = container.security_context.as_ref().unwrap();
        assert_eq!(sc.allow_privilege_escalation, Some(false));
        assert_eq!(sc.capabilities.as_ref().unwrap().drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            pod.security_context.as_ref().unwrap().seccomp_profile.as_ref().unwrap().type_,
            "RuntimeDefault"
        );
        let env = container.env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "LTPA_SECRET_NAME"
            && e.value.as_deref() == Some("olo-managed-ltpa-abcde")));
        assert!(!env.iter().any(|e| e.name == "ENCRYPTION_SECRET_LAST_ROTATION"));
    }

    #[test]
    fn test_job_mounts_encryption_key() {
        let job = job(
            "IfNotPresent",
            Some(EncryptionMount {
                secret_name: "wlp-aes-encryption-key-internal-abcde",
                key: "aesEncryptionKey",
                last_rotation: "1700000000",
            }),
        );
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert!(pod.volumes.unwrap().iter().any(|v| v.name == "encryption-key"));
        assert!(pod.containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .any(|e| e.name == "ENCRYPTION_SECRET_LAST_ROTATION"));
    }

    #[test]
    fn test_job_template_matches() {
        assert!(job_template_matches(&job("IfNotPresent", None), &job("IfNotPresent", None)));
        assert!(!job_template_matches(&job("Always", None), &job("IfNotPresent", None)));
    }

    #[test]
    fn test_job_failed() {
        let mut failed = job("IfNotPresent", None);
        assert!(!job_failed(&failed));
        failed.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(job_failed(&failed));
    }
}
