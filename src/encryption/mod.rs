//! # Password Encryption
//!
//! Mirrors the user's password-encryption key Secret into an operator-owned internal
//! Secret shared by every application of the namespace.
//!
//! Two forms exist: the AES form (`wlp-aes-encryption-key`, key `aesEncryptionKey`) and
//! the legacy form (`wlp-password-encryption-key`, key `passwordEncryptionKey`). The
//! leader of the `password-encryption` family copies the key bytes of the active form
//! into `wlp-<form>-encryption-key-internal<suffix>`, stamping `lastRotation` whenever
//! they change, and publishes the server XML Secrets that hand the key to Liberty.

pub mod factory;
pub mod mirror;
pub mod pipeline;

pub use factory::PasswordEncryptionFactory;
pub use mirror::{mirror_action, select_form, MirrorAction, UserSecretState};
pub use pipeline::reconcile_password_encryption;

use crate::constants::{
    AES_ENCRYPTION_KEY, AES_ENCRYPTION_SECRET, LEGACY_ENCRYPTION_KEY, LEGACY_ENCRYPTION_SECRET,
};

/// Form of the user's encryption key Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionForm {
    Aes,
    Legacy,
}

impl EncryptionForm {
    pub const ALL: [EncryptionForm; 2] = [EncryptionForm::Aes, EncryptionForm::Legacy];

    /// Name of the user-provided Secret
    pub fn user_secret(self) -> &'static str {
        match self {
            EncryptionForm::Aes => AES_ENCRYPTION_SECRET,
            EncryptionForm::Legacy => LEGACY_ENCRYPTION_SECRET,
        }
    }

    /// Data key holding the key bytes, in both the user and the internal Secret
    pub fn key_field(self) -> &'static str {
        match self {
            EncryptionForm::Aes => AES_ENCRYPTION_KEY,
            EncryptionForm::Legacy => LEGACY_ENCRYPTION_KEY,
        }
    }

    /// Liberty variable the key is exposed through
    pub fn variable(self) -> &'static str {
        match self {
            EncryptionForm::Aes => "wlp.aes.encryption.key",
            EncryptionForm::Legacy => "wlp.password.encryption.key",
        }
    }
}

impl std::fmt::Display for EncryptionForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EncryptionForm::Aes => "aes",
            EncryptionForm::Legacy => "password",
        })
    }
}

/// Operator-owned Secrets of one form for one suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionNames {
    pub internal_secret: String,
    pub server_xml_secret: String,
    pub mount_xml_secret: String,
}

impl EncryptionNames {
    pub fn new(form: EncryptionForm, suffix: &str) -> Self {
        Self {
            internal_secret: format!("wlp-{form}-encryption-key-internal{suffix}"),
            server_xml_secret: format!("wlp-{form}-encryption-key-server-xml{suffix}"),
            mount_xml_secret: format!("wlp-{form}-encryption-key-server-xml-mount{suffix}"),
        }
    }
}

/// Internal encryption key in use by an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub form: EncryptionForm,
    /// Tracked name (suffix)
    pub name: String,
    pub internal_secret_name: String,
    pub key_field: &'static str,
    /// Epoch seconds of the last key change
    pub last_rotation: String,
    pub server_xml_secret: String,
    pub mount_xml_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let aes = EncryptionNames::new(EncryptionForm::Aes, "-abcde");
        assert_eq!(aes.internal_secret, "wlp-aes-encryption-key-internal-abcde");
        assert_eq!(aes.server_xml_secret, "wlp-aes-encryption-key-server-xml-abcde");
        assert_eq!(aes.mount_xml_secret, "wlp-aes-encryption-key-server-xml-mount-abcde");

        let legacy = EncryptionNames::new(EncryptionForm::Legacy, "-abcde");
        assert_eq!(legacy.internal_secret, "wlp-password-encryption-key-internal-abcde");
    }

    #[test]
    fn test_form_fields() {
        assert_eq!(EncryptionForm::Aes.user_secret(), "wlp-aes-encryption-key");
        assert_eq!(EncryptionForm::Legacy.key_field(), "passwordEncryptionKey");
    }
}
