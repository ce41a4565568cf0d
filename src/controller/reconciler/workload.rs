//! # Workload
//!
//! Deployment (or StatefulSet) and Service of an `OpenLibertyApplication`.
//!
//! The pod template mounts the shared Secrets published by the LTPA and password
//! encryption pipelines and carries their `lastRotation` values as annotations, so a key
//! rotation rolls the pods.

use crate::constants::{
    ANNOTATION_ENCRYPTION_LAST_ROTATION, ANNOTATION_LTPA_CONFIG_LAST_ROTATION,
    ANNOTATION_LTPA_KEYS_LAST_ROTATION, APP_CONTAINER, ENCRYPTION_MOUNT_XML_FILE,
    ENCRYPTION_SERVER_XML_MOUNT_PATH, FIELD_MANAGER, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_NAME,
    LABEL_PART_OF, LTPA_KEYS_MOUNT_PATH, LTPA_MOUNT_XML_FILE, LTPA_SERVER_XML_MOUNT_PATH,
    MANAGED_BY, OVERRIDES_DIR,
};
use crate::controller::Error;
use crate::crd::OpenLibertyApplication;
use crate::encryption::EncryptionKey;
use crate::ltpa::{LtpaConfig, LtpaKeys};
use crate::sharing::delete_if_exists;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, SecretVolumeSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Mount path of the StatefulSet volume when the spec does not name one
const DEFAULT_STORAGE_MOUNT_PATH: &str = "/opt/ol/wlp/output";
const STORAGE_VOLUME: &str = "pvc";

/// Shared resources the workload consumes
#[derive(Debug, Default, Clone, Copy)]
pub struct SharedMounts<'a> {
    pub ltpa: Option<(&'a LtpaKeys, &'a LtpaConfig)>,
    pub encryption: Option<&'a EncryptionKey>,
}

/// Labels of every workload object of `app`
pub fn workload_labels(app: &OpenLibertyApplication) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), app.name_any()),
        (LABEL_INSTANCE.to_string(), app.name_any()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_PART_OF.to_string(), app.application_name()),
    ])
}

fn selector_labels(app: &OpenLibertyApplication) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_INSTANCE.to_string(), app.name_any())])
}

/// Pod-template annotations rolled by shared-key rotations
pub fn rotation_annotations(mounts: &SharedMounts<'_>) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    if let Some((keys, config)) = mounts.ltpa {
        annotations.insert(
            ANNOTATION_LTPA_KEYS_LAST_ROTATION.to_string(),
            keys.last_rotation.clone(),
        );
        annotations.insert(
            ANNOTATION_LTPA_CONFIG_LAST_ROTATION.to_string(),
            config.last_rotation.clone(),
        );
    }
    if let Some(encryption) = mounts.encryption {
        annotations.insert(
            ANNOTATION_ENCRYPTION_LAST_ROTATION.to_string(),
            encryption.last_rotation.clone(),
        );
    }
    annotations
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(str::to_string),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Volumes and mounts of the shared Secrets
fn shared_volumes(mounts: &SharedMounts<'_>) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    if let Some((keys, config)) = mounts.ltpa {
        volumes.push(secret_volume("ltpa-keys", &keys.secret_name));
        volume_mounts.push(read_only_mount("ltpa-keys", LTPA_KEYS_MOUNT_PATH, None));

        volumes.push(secret_volume("ltpa-server-xml", &config.server_xml_secret));
        volume_mounts.push(read_only_mount("ltpa-server-xml", LTPA_SERVER_XML_MOUNT_PATH, None));

        volumes.push(secret_volume("ltpa-mount-xml", &config.mount_xml_secret));
        volume_mounts.push(read_only_mount(
            "ltpa-mount-xml",
            &format!("{OVERRIDES_DIR}/{LTPA_MOUNT_XML_FILE}"),
            Some(LTPA_MOUNT_XML_FILE),
        ));
    }
    if let Some(encryption) = mounts.encryption {
        volumes.push(secret_volume("encryption-server-xml", &encryption.server_xml_secret));
        volume_mounts.push(read_only_mount(
            "encryption-server-xml",
            ENCRYPTION_SERVER_XML_MOUNT_PATH,
            None,
        ));

        volumes.push(secret_volume("encryption-mount-xml", &encryption.mount_xml_secret));
        volume_mounts.push(read_only_mount(
            "encryption-mount-xml",
            &format!("{OVERRIDES_DIR}/{ENCRYPTION_MOUNT_XML_FILE}"),
            Some(ENCRYPTION_MOUNT_XML_FILE),
        ));
    }
    (volumes, volume_mounts)
}

/// Pod template of the application container
pub fn pod_template(app: &OpenLibertyApplication, mounts: &SharedMounts<'_>) -> PodTemplateSpec {
    let (volumes, mut volume_mounts) = shared_volumes(mounts);
    if let Some(storage) = app.spec.stateful_set.as_ref().and_then(|s| s.storage.as_ref()) {
        volume_mounts.push(VolumeMount {
            name: STORAGE_VOLUME.to_string(),
            mount_path: storage
                .mount_path
                .clone()
                .unwrap_or_else(|| DEFAULT_STORAGE_MOUNT_PATH.to_string()),
            ..Default::default()
        });
    }

    let env: Vec<EnvVar> = app
        .spec
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: APP_CONTAINER.to_string(),
        image: Some(app.spec.application_image.clone()),
        image_pull_policy: Some(app.pull_policy().to_string()),
        ports: Some(vec![ContainerPort {
            name: Some(format!("{}-tcp", app.service_port())),
            container_port: app.service_port(),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    };

    let annotations = rotation_annotations(mounts);
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(workload_labels(app)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            image_pull_secrets: app.spec.pull_secret.as_ref().map(|name| {
                vec![LocalObjectReference {
                    name: name.clone(),
                }]
            }),
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..Default::default()
        }),
    }
}

fn workload_meta(app: &OpenLibertyApplication, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(app.name_any()),
        namespace: app.namespace(),
        labels: Some(workload_labels(app)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

pub fn deployment(app: &OpenLibertyApplication, mounts: &SharedMounts<'_>, owner: &OwnerReference) -> Deployment {
    Deployment {
        metadata: workload_meta(app, owner),
        spec: Some(DeploymentSpec {
            replicas: Some(app.spec.replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(selector_labels(app)),
                ..Default::default()
            },
            template: pod_template(app, mounts),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn stateful_set(app: &OpenLibertyApplication, mounts: &SharedMounts<'_>, owner: &OwnerReference) -> StatefulSet {
    let claims = app
        .spec
        .stateful_set
        .as_ref()
        .and_then(|s| s.storage.as_ref())
        .map(|storage| {
            vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(STORAGE_VOLUME.to_string()),
                    labels: Some(workload_labels(app)),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(storage.size.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                status: None,
            }]
        });
    StatefulSet {
        metadata: workload_meta(app, owner),
        spec: Some(StatefulSetSpec {
            replicas: Some(app.spec.replicas.unwrap_or(1)),
            service_name: Some(app.name_any()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(app)),
                ..Default::default()
            },
            template: pod_template(app, mounts),
            volume_claim_templates: claims,
            ..Default::default()
        }),
        status: None,
    }
}

pub fn service(app: &OpenLibertyApplication, owner: &OwnerReference) -> Service {
    let port = app.service_port();
    Service {
        metadata: workload_meta(app, owner),
        spec: Some(ServiceSpec {
            type_: Some(app.service_type().to_string()),
            selector: Some(selector_labels(app)),
            ports: Some(vec![ServicePort {
                name: Some(format!("{port}-tcp")),
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Server-side apply the workload and Service of `app`
///
/// Switching between Deployment and StatefulSet deletes the workload of the other kind.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the application has no uid yet, and API errors.
pub async fn apply_workload(client: &Client, app: &OpenLibertyApplication, mounts: &SharedMounts<'_>) -> Result<(), Error> {
    let name = app.name_any();
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::Validation("OpenLibertyApplication must be namespaced".to_string()))?;
    let owner = app
        .controller_owner_ref(&())
        .ok_or_else(|| Error::Validation(format!("OpenLibertyApplication {name} has no uid yet")))?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let stateful_sets: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    if app.spec.stateful_set.is_some() {
        let desired = stateful_set(app, mounts, &owner);
        stateful_sets.patch(&name, &params, &Patch::Apply(&desired)).await?;
        if delete_if_exists(&deployments, &name).await? {
            info!("Replaced Deployment {}/{} with a StatefulSet", namespace, name);
        }
    } else {
        let desired = deployment(app, mounts, &owner);
        deployments.patch(&name, &params, &Patch::Apply(&desired)).await?;
        if delete_if_exists(&stateful_sets, &name).await? {
            info!("Replaced StatefulSet {}/{} with a Deployment", namespace, name);
        }
    }

    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    services
        .patch(&name, &params, &Patch::Apply(&service(app, &owner)))
        .await?;
    debug!("Applied workload {}/{}", namespace, name);
    Ok(())
}
