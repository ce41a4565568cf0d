//! Shared-resource factory of the `password-encryption` family.

use super::{EncryptionForm, EncryptionNames};
use crate::controller::Error;
use crate::leader::{LeaderMetadata, LeaderTracker};
use crate::sharing::suffix::choose_name;
use crate::sharing::{delete_if_exists, Family, SharedResourceFactory, SharedTree};
use crate::tree;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;

#[derive(Debug, Clone, Default)]
pub struct PasswordEncryptionFactory {
    cleanup_unused: bool,
}

impl PasswordEncryptionFactory {
    pub fn new(cleanup_unused: bool) -> Self {
        Self { cleanup_unused }
    }
}

#[async_trait]
impl SharedResourceFactory for PasswordEncryptionFactory {
    fn family(&self) -> Family {
        Family::PasswordEncryption
    }

    fn compute_metadata(&self, shared: &SharedTree, tracker: &LeaderTracker) -> Result<Vec<LeaderMetadata>, Error> {
        let label = tree::label_from_path(&shared.latest, &["managePasswordEncryption"], &["true"])?;
        let path = tree::can_traverse(&shared.tree, &label, false)?;
        let path_index = tree::path_index_of(&shared.tree, &path)?;
        let name = choose_name(&[], tracker, &path_index, &mut rand::rng());
        Ok(vec![LeaderMetadata {
            name,
            path,
            path_index,
        }])
    }

    async fn delete(&self, client: &Client, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        for form in EncryptionForm::ALL {
            let names = EncryptionNames::new(form, name);
            delete_if_exists(&secrets, &names.internal_secret).await?;
            delete_if_exists(&secrets, &names.server_xml_secret).await?;
            delete_if_exists(&secrets, &names.mount_xml_secret).await?;
        }
        Ok(())
    }

    fn cleanup_unused_resources(&self) -> bool {
        self.cleanup_unused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::LeaderEntry;
    use crate::sharing::{SharingAssets, Signature};
    use kube::api::DynamicObject;

    #[test]
    fn test_metadata_shares_existing_name() {
        let assets = SharingAssets::builtin().unwrap();
        let shared = assets.tree(Family::PasswordEncryption);
        let factory = PasswordEncryptionFactory::default();

        let fresh = factory
            .compute_metadata(shared, &LeaderTracker::new("v1_4_0"))
            .unwrap();
        assert_eq!(fresh[0].path, "v1_4_0.managePasswordEncryption.true");
        assert_eq!(fresh[0].path_index, "v1_4_0.0");
        assert_eq!(fresh[0].name.len(), 6);

        let mut tracker = LeaderTracker::new("v1_4_0");
        tracker.insert_sorted(LeaderEntry {
            name: "-abcde".to_string(),
            owner: "app-b".to_string(),
            path: "v1_4_0.managePasswordEncryption.true".to_string(),
            path_index: "v1_4_0.0".to_string(),
            sublease: String::new(),
        });
        let shared_entry = factory.compute_metadata(shared, &tracker).unwrap();
        assert_eq!(shared_entry[0].name, "-abcde");
    }

    #[test]
    fn test_name_from_internal_secret() {
        let assets = SharingAssets::builtin().unwrap();
        let signatures: &[Signature] = assets.signatures(Family::PasswordEncryption);
        let mut obj = DynamicObject::new(
            "wlp-password-encryption-key-internal-abcde",
            &signatures[0].api_resource(),
        );
        obj.metadata.namespace = Some("ns".to_string());
        let factory = PasswordEncryptionFactory::default();
        assert_eq!(factory.name_from(&signatures[0], &obj).as_deref(), Some("-abcde"));
    }
}
