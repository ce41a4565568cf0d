//! # LTPA Pipeline
//!
//! Shared LTPA keys for the applications of a namespace.
//!
//! The leader of the `ltpa` family generates the keys through a short-lived Job running
//! the bundled `create_ltpa_keys.sh` in the application image:
//!
//! 1. a job-request ConfigMap marks a generation in progress; creating it drops the old
//!    Job and the XML Secrets that point at the old keys
//! 2. ServiceAccount, Role and RoleBinding let the Job create the keys Secret
//! 3. an immutable ConfigMap carries the script
//! 4. the Job runs the script
//! 5. the leader waits for the keys Secret (or reports the failed Job)
//! 6. once the Secret exists, the request ConfigMap and RBAC are deleted
//! 7. on every later pass, keys encoded with a stale encryption key are deleted
//!
//! The leader of the active config variant (`ltpa-config-1` without password encryption,
//! `ltpa-config-2` with it) publishes the server XML and mount XML Secrets that point
//! Liberty at the keys. Followers read the published artifacts or wait.

pub mod drift;
pub mod factory;
pub mod generation;
pub mod pipeline;
pub mod resources;
pub mod xml;

pub use drift::{check_keys_drift, KeysDrift};
pub use factory::{LtpaConfigFactory, LtpaKeysFactory};
pub use pipeline::{invalidate_ltpa_keys, reconcile_ltpa_config, reconcile_ltpa_keys};

use crate::constants::{
    LTPA_JOB_REQUEST_PREFIX, LTPA_KEYS_GENERATION_PREFIX, LTPA_KEYS_SECRET_PREFIX,
    LTPA_MOUNT_XML_SECRET_PREFIX, LTPA_SCRIPT_PREFIX, LTPA_SERVER_XML_SECRET_PREFIX,
};

/// Objects generated for one keys suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtpaKeysNames {
    pub keys_secret: String,
    pub job_request: String,
    pub script: String,
    /// Job, ServiceAccount, Role and RoleBinding share this name
    pub generation: String,
}

impl LtpaKeysNames {
    pub fn new(suffix: &str) -> Self {
        Self {
            keys_secret: format!("{LTPA_KEYS_SECRET_PREFIX}{suffix}"),
            job_request: format!("{LTPA_JOB_REQUEST_PREFIX}{suffix}"),
            script: format!("{LTPA_SCRIPT_PREFIX}{suffix}"),
            generation: format!("{LTPA_KEYS_GENERATION_PREFIX}{suffix}"),
        }
    }
}

/// Objects published for one config suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtpaConfigNames {
    pub server_xml_secret: String,
    pub mount_xml_secret: String,
}

impl LtpaConfigNames {
    pub fn new(suffix: &str) -> Self {
        Self {
            server_xml_secret: format!("{LTPA_SERVER_XML_SECRET_PREFIX}{suffix}"),
            mount_xml_secret: format!("{LTPA_MOUNT_XML_SECRET_PREFIX}{suffix}"),
        }
    }
}

/// Keys Secret in use by an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtpaKeys {
    /// Tracked name (suffix)
    pub name: String,
    pub secret_name: String,
    /// Encoded keys password
    pub password: String,
    pub last_rotation: String,
    pub leader: String,
    pub is_leader: bool,
}

/// Server XML Secrets in use by an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtpaConfig {
    pub name: String,
    pub server_xml_secret: String,
    pub mount_xml_secret: String,
    /// Advances whenever the rendered server XML changes
    pub last_rotation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let keys = LtpaKeysNames::new("-abcde");
        assert_eq!(keys.keys_secret, "olo-managed-ltpa-abcde");
        assert_eq!(keys.job_request, "olo-managed-ltpa-job-request-abcde");
        assert_eq!(keys.script, "olo-managed-ltpa-script-abcde");
        assert_eq!(keys.generation, "olo-managed-ltpa-keys-generation-abcde");

        let config = LtpaConfigNames::new("-fghij");
        assert_eq!(config.server_xml_secret, "olo-managed-ltpa-server-xml-fghij");
        assert_eq!(config.mount_xml_secret, "olo-managed-ltpa-server-xml-mount-fghij");
    }
}
