//! Form precedence, mirror transitions and Secret rendering.

use super::{EncryptionForm, EncryptionNames};
use crate::constants::{
    ENCRYPTION_MOUNT_XML_FILE, ENCRYPTION_SERVER_XML_FILE, ENCRYPTION_SERVER_XML_MOUNT_PATH,
    LABEL_NAME, LABEL_RESOURCE_PATH_INDEX, LAST_ROTATION,
};
use crate::controller::Error;
use crate::sharing::{secret_bytes, secret_data, xml};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

/// State of a user encryption key Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSecretState {
    Absent,
    /// The Secret exists without a non-empty key
    Misconfigured,
    Valid,
}

impl UserSecretState {
    pub fn of(secret: Option<&Secret>, form: EncryptionForm) -> Self {
        match secret {
            None => UserSecretState::Absent,
            Some(s) if secret_bytes(s, form.key_field()).is_some_and(|k| !k.is_empty()) => {
                UserSecretState::Valid
            }
            Some(_) => UserSecretState::Misconfigured,
        }
    }
}

/// Active form, with a warning when the legacy Secret is ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSelection {
    pub form: EncryptionForm,
    pub warning: Option<String>,
}

/// Pick the active form
///
/// # Errors
///
/// Returns [`Error::Validation`] when the only Secrets present are misconfigured and
/// [`Error::SecretMissing`] when neither exists.
pub fn select_form(aes: UserSecretState, legacy: UserSecretState) -> Result<FormSelection, Error> {
    match (aes, legacy) {
        (UserSecretState::Valid, UserSecretState::Valid) => Ok(FormSelection {
            form: EncryptionForm::Aes,
            warning: Some(format!(
                "both {} and {} are set; {} is used and {} should be deleted",
                EncryptionForm::Aes.user_secret(),
                EncryptionForm::Legacy.user_secret(),
                EncryptionForm::Aes.user_secret(),
                EncryptionForm::Legacy.user_secret()
            )),
        }),
        (UserSecretState::Valid, _) => Ok(FormSelection {
            form: EncryptionForm::Aes,
            warning: None,
        }),
        (_, UserSecretState::Valid) => Ok(FormSelection {
            form: EncryptionForm::Legacy,
            warning: None,
        }),
        (UserSecretState::Misconfigured, _) => Err(Error::Validation(format!(
            "Secret {} must contain a non-empty {}",
            EncryptionForm::Aes.user_secret(),
            EncryptionForm::Aes.key_field()
        ))),
        (_, UserSecretState::Misconfigured) => Err(Error::Validation(format!(
            "Secret {} must contain a non-empty {}",
            EncryptionForm::Legacy.user_secret(),
            EncryptionForm::Legacy.key_field()
        ))),
        (UserSecretState::Absent, UserSecretState::Absent) => Err(Error::SecretMissing(format!(
            "managePasswordEncryption is enabled but neither {} nor {} exists",
            EncryptionForm::Aes.user_secret(),
            EncryptionForm::Legacy.user_secret()
        ))),
    }
}

/// Write the leader performs on the internal Secret of one form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
    Noop,
    DeleteInternal,
    /// Copy the user's key and stamp a new rotation
    Write,
}

pub fn mirror_action(user_key: Option<&[u8]>, internal_key: Option<&[u8]>) -> MirrorAction {
    match (user_key, internal_key) {
        (None, None) => MirrorAction::Noop,
        (None, Some(_)) => MirrorAction::DeleteInternal,
        (Some(_), None) => MirrorAction::Write,
        (Some(user), Some(internal)) if user != internal => MirrorAction::Write,
        (Some(_), Some(_)) => MirrorAction::Noop,
    }
}

fn secret(name: &str, namespace: &str, labels: &BTreeMap<String, String>, data: BTreeMap<String, ByteString>) -> Secret {
    let mut labels = labels.clone();
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Internal Secret carrying `key` and its rotation
pub fn internal_secret(
    form: EncryptionForm,
    names: &EncryptionNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    key: &[u8],
    last_rotation: i64,
) -> Secret {
    let mut data = BTreeMap::from([(form.key_field().to_string(), ByteString(key.to_vec()))]);
    data.extend(secret_data([(LAST_ROTATION, last_rotation.to_string())]));
    secret(&names.internal_secret, namespace, labels, data)
}

/// `<variable>` element exposing the key to Liberty
pub fn encryption_server_xml(form: EncryptionForm, key: &str) -> String {
    format!(
        "<server>\n  <variable name=\"{}\" value=\"{}\"/>\n</server>\n",
        form.variable(),
        xml::escape_attr(key)
    )
}

/// Server XML and mount XML Secrets of one form
pub fn xml_secrets(
    form: EncryptionForm,
    names: &EncryptionNames,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    key: &str,
) -> (Secret, Secret) {
    let mut mount_labels = labels.clone();
    mount_labels.remove(LABEL_RESOURCE_PATH_INDEX);
    let mount = xml::include_xml(&xml::output_dir_location(
        ENCRYPTION_SERVER_XML_MOUNT_PATH,
        ENCRYPTION_SERVER_XML_FILE,
    ));
    (
        secret(
            &names.server_xml_secret,
            namespace,
            labels,
            secret_data([(ENCRYPTION_SERVER_XML_FILE, encryption_server_xml(form, key))]),
        ),
        secret(
            &names.mount_xml_secret,
            namespace,
            &mount_labels,
            secret_data([(ENCRYPTION_MOUNT_XML_FILE, mount)]),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ErrorKind;

    fn user(form: EncryptionForm, key: &str) -> Secret {
        Secret {
            data: Some(secret_data([(form.key_field(), key.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_user_secret_state() {
        assert_eq!(UserSecretState::of(None, EncryptionForm::Aes), UserSecretState::Absent);
        assert_eq!(
            UserSecretState::of(Some(&user(EncryptionForm::Aes, "k")), EncryptionForm::Aes),
            UserSecretState::Valid
        );
        assert_eq!(
            UserSecretState::of(Some(&user(EncryptionForm::Aes, "")), EncryptionForm::Aes),
            UserSecretState::Misconfigured
        );
        // key stored under the other form's field
        assert_eq!(
            UserSecretState::of(Some(&user(EncryptionForm::Legacy, "k")), EncryptionForm::Aes),
            UserSecretState::Misconfigured
        );
    }

    #[test]
    fn test_precedence() {
        use UserSecretState::{Absent, Misconfigured, Valid};

        let both = select_form(Valid, Valid).unwrap();
        assert_eq!(both.form, EncryptionForm::Aes);
        assert!(both.warning.unwrap().contains("wlp-password-encryption-key"));

        assert_eq!(select_form(Valid, Absent).unwrap().form, EncryptionForm::Aes);
        assert_eq!(select_form(Misconfigured, Valid).unwrap().form, EncryptionForm::Legacy);
        assert_eq!(select_form(Absent, Valid).unwrap().warning, None);

        assert_eq!(select_form(Misconfigured, Absent).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(select_form(Absent, Absent).unwrap_err().kind(), ErrorKind::SecretMissing);
    }

    #[test]
    fn test_mirror_transitions() {
        assert_eq!(mirror_action(None, None), MirrorAction::Noop);
        assert_eq!(mirror_action(None, Some(b"k")), MirrorAction::DeleteInternal);
        assert_eq!(mirror_action(Some(b"k"), None), MirrorAction::Write);
        assert_eq!(mirror_action(Some(b"k2"), Some(b"k")), MirrorAction::Write);
        assert_eq!(mirror_action(Some(b"k"), Some(b"k")), MirrorAction::Noop);
    }

    #[test]
    fn test_internal_secret() {
        let names = EncryptionNames::new(EncryptionForm::Aes, "-abcde");
        let secret = internal_secret(EncryptionForm::Aes, &names, "ns", &BTreeMap::new(), b"key", 42);
        assert_eq!(secret_bytes(&secret, "aesEncryptionKey"), Some(b"key".as_slice()));
        assert_eq!(secret_bytes(&secret, LAST_ROTATION), Some(b"42".as_slice()));
    }

    #[test]
    fn test_xml_secrets() {
        let names = EncryptionNames::new(EncryptionForm::Legacy, "-abcde");
        let labels = BTreeMap::from([(LABEL_RESOURCE_PATH_INDEX.to_string(), "v1_4_0.0".to_string())]);
        let (server, mount) = xml_secrets(EncryptionForm::Legacy, &names, "ns", &labels, "s\"cret");
        let server_xml = secret_bytes(&server, ENCRYPTION_SERVER_XML_FILE).unwrap();
        assert_eq!(
            std::str::from_utf8(server_xml).unwrap(),
            "<server>\n  <variable name=\"wlp.password.encryption.key\" value=\"s&quot;cret\"/>\n</server>\n"
        );
        let mount_xml = std::str::from_utf8(secret_bytes(&mount, ENCRYPTION_MOUNT_XML_FILE).unwrap()).unwrap();
        assert!(mount_xml.contains("${server.output.dir}/liberty-operator/encryption/encryptionKeyMount.xml"));
        assert!(!mount
            .metadata
            .labels
            .unwrap()
            .contains_key(LABEL_RESOURCE_PATH_INDEX));
    }
}
