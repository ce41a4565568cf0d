//! Server XML and mount XML Secrets of the LTPA config variants.

use super::LtpaConfigNames;
use crate::constants::{
    LAST_KEY_RELATED_ROTATION, LAST_ROTATION, LTPA_KEYS_FILE, LTPA_KEYS_MOUNT_PATH,
    LTPA_MOUNT_XML_FILE, LTPA_SERVER_XML_FILE, LTPA_SERVER_XML_MOUNT_PATH,
};
use crate::sharing::{secret_data, secret_string, xml};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// `<ltpa>` element pointing at the mounted keys file
pub fn ltpa_server_xml(keys_password: &str) -> String {
    format!(
        "<server>\n  <ltpa keysFileName=\"{}/{}\" keysPassword=\"{}\"/>\n</server>\n",
        LTPA_KEYS_MOUNT_PATH,
        LTPA_KEYS_FILE,
        xml::escape_attr(keys_password)
    )
}

/// Dropin including the mounted server XML
pub fn ltpa_mount_xml() -> String {
    xml::include_xml(&xml::output_dir_location(
        LTPA_SERVER_XML_MOUNT_PATH,
        LTPA_SERVER_XML_FILE,
    ))
}

/// Data of the server XML Secret
///
/// `lastRotation` is carried over from `existing` unless the rendered XML changed.
pub fn server_xml_data(
    existing: Option<&Secret>,
    keys_password: &str,
    last_key_related_rotation: &str,
    now: i64,
) -> BTreeMap<String, k8s_openapi::ByteString> {
    let rendered = ltpa_server_xml(keys_password);
    let unchanged = existing
        .and_then(|s| secret_string(s, LTPA_SERVER_XML_FILE))
        .is_some_and(|current| current == rendered);
    let last_rotation = existing
        .filter(|_| unchanged)
        .and_then(|s| secret_string(s, LAST_ROTATION))
        .unwrap_or_else(|| now.to_string());
    secret_data([
        (LTPA_SERVER_XML_FILE, rendered),
        (LAST_ROTATION, last_rotation),
        (LAST_KEY_RELATED_ROTATION, last_key_related_rotation.to_string()),
    ])
}

/// Whether a published server XML Secret matches the key rotation an application expects
pub fn is_published_for(secret: &Secret, last_key_related_rotation: &str) -> bool {
    secret_string(secret, LAST_KEY_RELATED_ROTATION).as_deref() == Some(last_key_related_rotation)
        && secret_string(secret, LTPA_SERVER_XML_FILE).is_some()
}

fn secret(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    data: BTreeMap<String, k8s_openapi::ByteString>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Desired server XML and mount XML Secrets
///
/// Both are shared by every follower, so neither is owned by the publishing application.
pub fn config_secrets(
    names: &LtpaConfigNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    server_data: BTreeMap<String, k8s_openapi::ByteString>,
) -> (Secret, Secret) {
    let mut server_labels = labels.clone();
    server_labels.insert(
        crate::constants::LABEL_NAME.to_string(),
        names.server_xml_secret.clone(),
    );
    let mut mount_labels = labels.clone();
    mount_labels.insert(
        crate::constants::LABEL_NAME.to_string(),
        names.mount_xml_secret.clone(),
    );
    // The mount Secret is not a tracked resource, only the server XML carries the path index
    mount_labels.remove(crate::constants::LABEL_RESOURCE_PATH_INDEX);
    (
        secret(&names.server_xml_secret, namespace, &server_labels, server_data),
        secret(
            &names.mount_xml_secret,
            namespace,
            &mount_labels,
            secret_data([(LTPA_MOUNT_XML_FILE, ltpa_mount_xml())]),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_ltpa_server_xml() {
        assert_eq!(
            ltpa_server_xml("{aes}AAEC"),
            "<server>\n  <ltpa keysFileName=\"/config/managedLTPA/ltpa.keys\" keysPassword=\"{aes}AAEC\"/>\n</server>\n"
        );
    }

    #[test]
    fn test_mount_xml_includes_server_xml() {
        assert!(ltpa_mount_xml()
            .contains("${server.output.dir}/liberty-operator/ltpa/ltpaKeysMount.xml"));
    }

    #[test]
    fn test_mount_secret_is_not_tracked() {
        let names = LtpaConfigNames::new("-fghij");
        let labels = crate::sharing::shared_resource_labels(&names.server_xml_secret, "app-a", "v1_4_2.2");
        let (server, mount) = config_secrets(&names, "ns", &labels, BTreeMap::new());
        assert!(server.labels().contains_key(crate::constants::LABEL_RESOURCE_PATH_INDEX));
        assert!(!mount.labels().contains_key(crate::constants::LABEL_RESOURCE_PATH_INDEX));
        assert_eq!(mount.labels()[crate::constants::LABEL_NAME], names.mount_xml_secret);
        assert!(server.metadata.owner_references.is_none());
    }

    #[test]
    fn test_rotation_advances_only_on_content_change() {
        let first = server_xml_data(None, "{aes}one", "100", 1_000);
        let published = Secret {
            data: Some(first),
            ..Default::default()
        };
        assert!(is_published_for(&published, "100"));
        assert!(!is_published_for(&published, "200"));

        let same = server_xml_data(Some(&published), "{aes}one", "100", 2_000);
        assert_eq!(same[LAST_ROTATION].0, b"1000");

        let rotated = server_xml_data(Some(&published), "{aes}two", "200", 3_000);
        assert_eq!(rotated[LAST_ROTATION].0, b"3000");
        assert_eq!(rotated[LAST_KEY_RELATED_ROTATION].0, b"200");
    }
}
