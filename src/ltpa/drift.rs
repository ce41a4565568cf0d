//! Drift between the LTPA keys Secret and the password-encryption key it was encoded with.

/// What the keys leader does with an existing keys Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysDrift {
    Keep,
    /// The keys were encoded with another (or no) encryption key; regenerate them
    DeleteKeys,
}

/// Compare the rotation recorded on the keys Secret with the internal encryption key
///
/// `internal_rotation` is the `lastRotation` of the internal encryption-key Secret, `None`
/// when that Secret is absent. `keys_rotation` is the `encryptionSecretLastRotation` stored
/// on the keys Secret.
pub fn check_keys_drift(
    manage_encryption: bool,
    internal_rotation: Option<&str>,
    keys_rotation: Option<&str>,
) -> KeysDrift {
    match (manage_encryption, internal_rotation, keys_rotation) {
        (true, Some(internal), Some(keys)) if internal == keys => KeysDrift::Keep,
        (true, Some(_), _) => KeysDrift::DeleteKeys,
        (_, None, Some(_)) | (false, Some(_), Some(_)) => KeysDrift::DeleteKeys,
        (_, _, None) => KeysDrift::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_table() {
        // encryption managed, internal key present
        assert_eq!(check_keys_drift(true, Some("100"), Some("100")), KeysDrift::Keep);
        assert_eq!(check_keys_drift(true, Some("200"), Some("100")), KeysDrift::DeleteKeys);
        assert_eq!(check_keys_drift(true, Some("200"), None), KeysDrift::DeleteKeys);
        // encryption managed, internal key absent
        assert_eq!(check_keys_drift(true, None, Some("100")), KeysDrift::DeleteKeys);
        assert_eq!(check_keys_drift(true, None, None), KeysDrift::Keep);
        // encryption not managed
        assert_eq!(check_keys_drift(false, None, Some("100")), KeysDrift::DeleteKeys);
        assert_eq!(check_keys_drift(false, Some("100"), Some("100")), KeysDrift::DeleteKeys);
        assert_eq!(check_keys_drift(false, Some("100"), None), KeysDrift::Keep);
        assert_eq!(check_keys_drift(false, None, None), KeysDrift::Keep);
    }
}
