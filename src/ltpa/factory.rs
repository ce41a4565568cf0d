//! Shared-resource factories of the LTPA keys and config families.

use super::{LtpaConfigNames, LtpaKeysNames};
use crate::constants::{
    ENV_LTPA_CONFIG_RESOURCE_SUFFIXES, ENV_LTPA_KEY_RESOURCE_SUFFIXES, ENV_LTPA_RESOURCE_SUFFIXES,
};
use crate::controller::Error;
use crate::crd::OpenLibertyApplication;
use crate::leader::{LeaderMetadata, LeaderTracker};
use crate::sharing::suffix::{choose_name, parse_suffix_list};
use crate::sharing::{delete_if_exists, Family, SharedResourceFactory, SharedTree};
use crate::tree;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::Api;
use kube::Client;

/// Suffix overrides from the application env, falling back to `LTPA_RESOURCE_SUFFIXES`
fn suffix_overrides(app: &OpenLibertyApplication, specific: &str) -> Vec<String> {
    let specific = app.env_value(specific).map(parse_suffix_list).unwrap_or_default();
    if !specific.is_empty() {
        return specific;
    }
    app.env_value(ENV_LTPA_RESOURCE_SUFFIXES)
        .map(parse_suffix_list)
        .unwrap_or_default()
}

fn metadata_for(
    shared: &SharedTree,
    tracker: &LeaderTracker,
    kind: &str,
    manage_password_encryption: bool,
    overrides: &[String],
) -> Result<LeaderMetadata, Error> {
    let label = tree::label_from_path(
        &shared.latest,
        &["type", "managePasswordEncryption"],
        &[kind, if manage_password_encryption { "true" } else { "false" }],
    )?;
    let path = tree::can_traverse(&shared.tree, &label, false)?;
    let path_index = tree::path_index_of(&shared.tree, &path)?;
    let name = choose_name(overrides, tracker, &path_index, &mut rand::rng());
    Ok(LeaderMetadata {
        name,
        path,
        path_index,
    })
}

/// Factory of the `ltpa` family: keys Secret and its generation objects
#[derive(Debug, Clone)]
pub struct LtpaKeysFactory {
    manage_password_encryption: bool,
    overrides: Vec<String>,
    cleanup_unused: bool,
}

impl LtpaKeysFactory {
    pub fn new(app: &OpenLibertyApplication, cleanup_unused: bool) -> Self {
        Self {
            manage_password_encryption: app.password_encryption_enabled(),
            overrides: suffix_overrides(app, ENV_LTPA_KEY_RESOURCE_SUFFIXES),
            cleanup_unused,
        }
    }
}

#[async_trait]
impl SharedResourceFactory for LtpaKeysFactory {
    fn family(&self) -> Family {
        Family::Ltpa
    }

    fn accepts_path(&self, path: &str) -> bool {
        path.contains(".type.keys.")
    }

    fn compute_metadata(&self, shared: &SharedTree, tracker: &LeaderTracker) -> Result<Vec<LeaderMetadata>, Error> {
        Ok(vec![metadata_for(
            shared,
            tracker,
            "keys",
            self.manage_password_encryption,
            &self.overrides,
        )?])
    }

    async fn delete(&self, client: &Client, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let names = LtpaKeysNames::new(name);
        delete_if_exists(&Api::<Secret>::namespaced(client.clone(), namespace), &names.keys_secret).await?;
        let config_maps = Api::<ConfigMap>::namespaced(client.clone(), namespace);
        delete_if_exists(&config_maps, &names.job_request).await?;
        delete_if_exists(&config_maps, &names.script).await?;
        delete_if_exists(&Api::<Job>::namespaced(client.clone(), namespace), &names.generation).await?;
        delete_generation_rbac(client, namespace, &names).await
    }

    fn cleanup_unused_resources(&self) -> bool {
        self.cleanup_unused
    }
}

/// Delete the ServiceAccount, Role and RoleBinding of a keys generation
///
/// # Errors
///
/// Propagates API errors other than not-found.
pub(crate) async fn delete_generation_rbac(
    client: &Client,
    namespace: &str,
    names: &LtpaKeysNames,
) -> Result<(), kube::Error> {
    delete_if_exists(&Api::<RoleBinding>::namespaced(client.clone(), namespace), &names.generation).await?;
    delete_if_exists(&Api::<Role>::namespaced(client.clone(), namespace), &names.generation).await?;
    delete_if_exists(&Api::<ServiceAccount>::namespaced(client.clone(), namespace), &names.generation).await?;
    Ok(())
}

/// Factory of the `ltpa-config-1` and `ltpa-config-2` families: server XML Secrets
#[derive(Debug, Clone)]
pub struct LtpaConfigFactory {
    manage_password_encryption: bool,
    overrides: Vec<String>,
    cleanup_unused: bool,
}

impl LtpaConfigFactory {
    pub fn new(app: &OpenLibertyApplication, cleanup_unused: bool) -> Self {
        Self::for_variant(
            app.password_encryption_enabled(),
            suffix_overrides(app, ENV_LTPA_CONFIG_RESOURCE_SUFFIXES),
            cleanup_unused,
        )
    }

    /// Factory of one variant regardless of the application's current setting
    pub fn for_variant(manage_password_encryption: bool, overrides: Vec<String>, cleanup_unused: bool) -> Self {
        Self {
            manage_password_encryption,
            overrides,
            cleanup_unused,
        }
    }
}

#[async_trait]
impl SharedResourceFactory for LtpaConfigFactory {
    fn family(&self) -> Family {
        Family::ltpa_config(self.manage_password_encryption)
    }

    fn accepts_path(&self, path: &str) -> bool {
        path.ends_with(&format!(
            ".type.config.managePasswordEncryption.{}",
            self.manage_password_encryption
        ))
    }

    fn compute_metadata(&self, shared: &SharedTree, tracker: &LeaderTracker) -> Result<Vec<LeaderMetadata>, Error> {
        Ok(vec![metadata_for(
            shared,
            tracker,
            "config",
            self.manage_password_encryption,
            &self.overrides,
        )?])
    }

    async fn delete(&self, client: &Client, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let names = LtpaConfigNames::new(name);
        let secrets = Api::<Secret>::namespaced(client.clone(), namespace);
        delete_if_exists(&secrets, &names.server_xml_secret).await?;
        delete_if_exists(&secrets, &names.mount_xml_secret).await?;
        Ok(())
    }

    fn cleanup_unused_resources(&self) -> bool {
        self.cleanup_unused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{EnvVar, OpenLibertyApplicationSpec};
    use crate::leader::LeaderEntry;
    use crate::sharing::SharingAssets;

    fn app(env: &[(&str, &str)], manage_password_encryption: bool) -> OpenLibertyApplication {
        OpenLibertyApplication::new(
            "app-a",
            OpenLibertyApplicationSpec {
                application_image: "icr.io/app:1".to_string(),
                manage_ltpa: Some(true),
                manage_password_encryption: Some(manage_password_encryption),
                env: env
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: (*name).to_string(),
                        value: Some((*value).to_string()),
                    })
                    .collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_keys_metadata_uses_override() {
        let assets = SharingAssets::builtin().unwrap();
        let shared = assets.tree(Family::Ltpa);
        let factory = LtpaKeysFactory::new(&app(&[("LTPA_KEY_RESOURCE_SUFFIXES", "abcde")], false), false);
        let metadata = factory
            .compute_metadata(shared, &LeaderTracker::new("v1_4_2"))
            .unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].name, "-abcde");
        assert_eq!(metadata[0].path, "v1_4_2.type.keys.managePasswordEncryption.false");
        assert_eq!(metadata[0].path_index, "v1_4_2.0");
    }

    #[test]
    fn test_overrides_fall_back_to_shared_list() {
        let app = app(
            &[("LTPA_RESOURCE_SUFFIXES", "zzzzz"), ("LTPA_CONFIG_RESOURCE_SUFFIXES", "BAD")],
            false,
        );
        assert_eq!(suffix_overrides(&app, ENV_LTPA_CONFIG_RESOURCE_SUFFIXES), vec!["zzzzz"]);
    }

    #[test]
    fn test_keys_metadata_shares_existing_entry() {
        let assets = SharingAssets::builtin().unwrap();
        let shared = assets.tree(Family::Ltpa);
        let mut tracker = LeaderTracker::new("v1_4_2");
        tracker.insert_sorted(LeaderEntry {
            name: "-qwert".to_string(),
            owner: "app-b".to_string(),
            path: "v1_4_2.type.keys.managePasswordEncryption.true".to_string(),
            path_index: "v1_4_2.1".to_string(),
            sublease: String::new(),
        });
        let factory = LtpaKeysFactory::new(&app(&[], true), false);
        let metadata = factory.compute_metadata(shared, &tracker).unwrap();
        assert_eq!(metadata[0].name, "-qwert");
    }

    #[test]
    fn test_config_variant_by_password_encryption() {
        let assets = SharingAssets::builtin().unwrap();
        let shared = assets.tree(Family::LtpaConfig2);
        let factory = LtpaConfigFactory::new(&app(&[], true), false);
        assert_eq!(factory.family(), Family::LtpaConfig2);
        let metadata = factory
            .compute_metadata(shared, &LeaderTracker::new("v1_4_2"))
            .unwrap();
        assert_eq!(metadata[0].path, "v1_4_2.type.config.managePasswordEncryption.true");
        assert!(factory.accepts_path(&metadata[0].path));
        assert!(!factory.accepts_path("v1_4_2.type.config.managePasswordEncryption.false"));
    }

    #[test]
    fn test_config_requires_tree_with_config_branch() {
        let assets = SharingAssets::load(None, Some("v1_4_0")).unwrap();
        let shared = assets.tree(Family::LtpaConfig1);
        let factory = LtpaConfigFactory::new(&app(&[], false), false);
        let err = factory
            .compute_metadata(shared, &LeaderTracker::new("v1_4_0"))
            .unwrap_err();
        assert!(matches!(err, Error::Tree(_)));
    }
}
