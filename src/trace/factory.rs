//! Shared-resource factory of the `trace` family.
//!
//! Traced pods are the shared resources: the tracked name is the pod name, and at most
//! one `OpenLibertyTrace` leads each pod.

use crate::controller::Error;
use crate::leader::{LeaderMetadata, LeaderTracker};
use crate::sharing::{Family, SharedResourceFactory, SharedTree, Signature};
use crate::tree;
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::Client;

#[derive(Debug, Clone)]
pub struct TraceFactory {
    pod_name: String,
    previous_pod: Option<String>,
}

impl TraceFactory {
    /// Factory requesting `pod_name` and releasing `previous_pod` when it differs
    pub fn new(pod_name: &str, previous_pod: Option<&str>) -> Self {
        Self {
            pod_name: pod_name.to_string(),
            previous_pod: previous_pod
                .filter(|p| *p != pod_name && !p.is_empty())
                .map(str::to_string),
        }
    }
}

/// Every pod maps to the `pod.*` leaf; pod names may contain dots, so they stay out of the path
fn pod_metadata(shared: &SharedTree, pod: &str) -> Result<LeaderMetadata, Error> {
    let label = tree::label_from_path(&shared.latest, &["pod"], &["*"])?;
    let path = tree::can_traverse(&shared.tree, &label, false)?;
    let path_index = tree::path_index_of(&shared.tree, &path)?;
    Ok(LeaderMetadata {
        name: pod.to_string(),
        path,
        path_index,
    })
}

/// `spec.podName` of a discovered trace
fn pod_of(obj: &DynamicObject) -> Option<String> {
    obj.data
        .get("spec")?
        .get("podName")?
        .as_str()
        .filter(|pod| !pod.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl SharedResourceFactory for TraceFactory {
    fn family(&self) -> Family {
        Family::Trace
    }

    fn name_from(&self, _signature: &Signature, obj: &DynamicObject) -> Option<String> {
        pod_of(obj)
    }

    fn path_index_from(&self, obj: &DynamicObject, shared: &SharedTree) -> Option<String> {
        pod_metadata(shared, &pod_of(obj)?).ok().map(|m| m.path_index)
    }

    fn compute_metadata(&self, shared: &SharedTree, _tracker: &LeaderTracker) -> Result<Vec<LeaderMetadata>, Error> {
        let mut requested = vec![pod_metadata(shared, &self.pod_name)?];
        if let Some(previous) = &self.previous_pod {
            requested.push(pod_metadata(shared, previous)?);
        }
        Ok(requested)
    }

    async fn delete(&self, _client: &Client, _namespace: &str, _name: &str) -> Result<(), kube::Error> {
        // The operated pod is not owned by the trace
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::SharingAssets;
    use serde_json::json;

    fn trace_object(pod: &str) -> DynamicObject {
        let assets = SharingAssets::builtin().unwrap();
        let resource = assets.signatures(Family::Trace)[0].api_resource();
        DynamicObject::new("trace-a", &resource).data(json!({"spec": {"podName": pod}}))
    }

    #[test]
    fn test_metadata_requests_pod_and_releases_previous() {
        let assets = SharingAssets::builtin().unwrap();
        let shared = assets.tree(Family::Trace);
        let factory = TraceFactory::new("web-1", Some("web-0"));
        let metadata = factory
            .compute_metadata(shared, &LeaderTracker::new("v1_4_0"))
            .unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[0].name, "web-1");
        assert_eq!(metadata[0].path, "v1_4_0.pod.*");
        assert_eq!(metadata[0].path_index, "v1_4_0.0");
        assert_eq!(metadata[1].name, "web-0");

        let dotted = TraceFactory::new("web.shop-0", None)
            .compute_metadata(shared, &LeaderTracker::new("v1_4_0"))
            .unwrap();
        assert_eq!(dotted[0].path_index, "v1_4_0.0");

        let unchanged = TraceFactory::new("web-1", Some("web-1"))
            .compute_metadata(shared, &LeaderTracker::new("v1_4_0"))
            .unwrap();
        assert_eq!(unchanged.len(), 1);
    }

    #[test]
    fn test_discovered_trace_is_keyed_by_pod() {
        let assets = SharingAssets::builtin().unwrap();
        let shared = assets.tree(Family::Trace);
        let signature = &assets.signatures(Family::Trace)[0];
        let factory = TraceFactory::new("web-1", None);
        let obj = trace_object("web-7");
        assert_eq!(factory.name_from(signature, &obj).as_deref(), Some("web-7"));
        assert_eq!(factory.path_index_from(&obj, shared).as_deref(), Some("v1_4_0.0"));
        assert_eq!(factory.name_from(signature, &trace_object("")), None);
    }
}
