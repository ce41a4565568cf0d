//! # OpenLibertyTrace
//!
//! Day-2 operation enabling Liberty trace on a single pod.

use super::status::OpenLibertyTraceStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OpenLibertyTrace Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: apps.openliberty.io/v1
/// kind: OpenLibertyTrace
/// metadata:
///   name: inventory-trace
/// spec:
///   podName: inventory-7d9c8b5f4-x2v6q
///   traceSpecification: "*=info:com.ibm.ws.webcontainer*=all"
///   maxFileSize: 20
///   maxFiles: 5
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "OpenLibertyTrace",
    group = "apps.openliberty.io",
    version = "v1",
    namespaced,
    status = "OpenLibertyTraceStatus",
    shortname = "oltrace",
    printcolumn = r#"{"name":"PodName", "type":"string", "jsonPath":".status.operatedResource.resourceName"}"#,
    printcolumn = r#"{"name":"Tracing", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Enabled\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenLibertyTraceSpec {
    /// Pod to trace
    pub pod_name: String,
    /// Liberty trace specification
    pub trace_specification: String,
    /// Maximum size of a trace file in MB
    #[serde(default)]
    pub max_file_size: Option<i32>,
    /// Maximum number of trace files
    #[serde(default)]
    pub max_files: Option<i32>,
    /// Turn trace off on the pod
    #[serde(default)]
    pub disable: Option<bool>,
}

impl OpenLibertyTrace {
    pub fn is_disabled(&self) -> bool {
        self.spec.disable.unwrap_or(false)
    }
}
