//! # OpenLibertyApplication
//!
//! The application custom resource, limited to the fields the operator core consumes.

use super::status::OpenLibertyApplicationStatus;
use crate::constants::{
    DEFAULT_SERVICE_PORT, DEFAULT_SERVICE_TYPE, LABEL_PART_OF,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OpenLibertyApplication Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: apps.openliberty.io/v1
/// kind: OpenLibertyApplication
/// metadata:
///   name: inventory
///   namespace: shop
/// spec:
///   applicationImage: icr.io/appcafe/open-liberty/samples/getting-started:1.0.0
///   manageLTPA: true
///   managePasswordEncryption: true
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "OpenLibertyApplication",
    group = "apps.openliberty.io",
    version = "v1",
    namespaced,
    status = "OpenLibertyApplicationStatus",
    shortname = "olapp",
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".status.imageReference"}"#,
    printcolumn = r#"{"name":"Reconciled", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Reconciled\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Reconciled\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenLibertyApplicationSpec {
    /// Application image reference
    pub application_image: String,
    /// Name of the application this instance is part of
    /// Defaults to the `app.kubernetes.io/part-of` label, then the resource name
    #[serde(default)]
    pub application_name: Option<String>,
    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default)]
    pub pull_policy: Option<String>,
    /// Name of the image pull Secret
    #[serde(default)]
    pub pull_secret: Option<String>,
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Environment of the application container
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub service: Option<ServiceSpec>,
    /// When present, the workload is a StatefulSet instead of a Deployment
    #[serde(default)]
    pub stateful_set: Option<StatefulSetSpec>,
    /// Share LTPA keys with the other applications of the namespace
    /// Defaults to true when single sign-on is configured
    #[serde(default, rename = "manageLTPA")]
    pub manage_ltpa: Option<bool>,
    /// Share a password-encryption key with the other applications of the namespace
    #[serde(default)]
    pub manage_password_encryption: Option<bool>,
    /// Single sign-on configuration
    #[serde(default)]
    pub sso: Option<SsoSpec>,
    #[serde(default)]
    pub experimental: Option<ExperimentalSpec>,
}

/// Plain environment variable
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub port: Option<i32>,
    /// ClusterIP, NodePort or LoadBalancer
    #[serde(default)]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    #[serde(default)]
    pub storage: Option<StorageSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Volume size, e.g. `1Gi`
    pub size: String,
    /// Mount path in the application container
    #[serde(default)]
    pub mount_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SsoSpec {
    #[serde(default)]
    pub map_to_user_registry: Option<bool>,
    #[serde(default)]
    pub redirect_to_rp_host_and_port: Option<String>,
}

/// Experimental operator behaviour
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalSpec {
    /// Track image pulls in the shared image-pull state
    #[serde(default)]
    pub manage_cache: Option<bool>,
    /// Admit reconciles through the worker cache
    #[serde(default)]
    pub manage_concurrency: Option<bool>,
    /// Worker cache capacity used for this application
    #[serde(default)]
    pub ephemeral_pod_worker_pool_size: Option<usize>,
}

impl OpenLibertyApplication {
    /// LTPA sharing is on when requested, or by default when SSO is configured
    pub fn ltpa_enabled(&self) -> bool {
        self.spec.manage_ltpa.unwrap_or(self.spec.sso.is_some())
    }

    pub fn password_encryption_enabled(&self) -> bool {
        self.spec.manage_password_encryption.unwrap_or(false)
    }

    pub fn application_name(&self) -> String {
        self.spec
            .application_name
            .clone()
            .or_else(|| self.labels().get(LABEL_PART_OF).cloned())
            .unwrap_or_else(|| self.name_any())
    }

    pub fn pull_policy(&self) -> &str {
        self.spec.pull_policy.as_deref().unwrap_or("IfNotPresent")
    }

    pub fn service_port(&self) -> i32 {
        self.spec
            .service
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVICE_PORT)
    }

    pub fn service_type(&self) -> &str {
        self.spec
            .service
            .as_ref()
            .and_then(|s| s.r#type.as_deref())
            .unwrap_or(DEFAULT_SERVICE_TYPE)
    }

    /// Value of a plain environment variable of the application container
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.spec
            .env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    pub fn manage_cache(&self) -> bool {
        self.experimental().and_then(|e| e.manage_cache).unwrap_or(false)
    }

    pub fn manage_concurrency(&self) -> bool {
        self.experimental()
            .and_then(|e| e.manage_concurrency)
            .unwrap_or(false)
    }

    pub fn worker_pool_size(&self) -> Option<usize> {
        self.experimental()
            .and_then(|e| e.ephemeral_pod_worker_pool_size)
    }

    fn experimental(&self) -> Option<&ExperimentalSpec> {
        self.spec.experimental.as_ref()
    }
}
