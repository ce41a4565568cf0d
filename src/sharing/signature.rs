//! # Resource Signatures
//!
//! A signature declares how to recognise the in-cluster objects of a shared-resource family:
//!
//! ```yaml
//! - apiVersion: v1
//!   kind: Secret
//!   name: olo-managed-ltpa{0}
//!   labelSelector: app.kubernetes.io/managed-by=open-liberty-operator
//! ```
//!
//! Placeholders `{0}`, `{1}`, ... stand for name segments. The last placeholder is the
//! shared-resource suffix and matches an optional `-` followed by five lowercase
//! alphanumerics; earlier placeholders match `[a-z0-9]+`. A signature without a name
//! template matches every object of its kind.

use kube::core::{ApiResource, GroupVersionKind};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(\d+)\}").expect("placeholder pattern is valid")
});

const SEGMENT_PATTERN: &str = "[a-z0-9]+";
const SUFFIX_PATTERN: &str = "(?:-[a-z0-9]{5})?";

/// One recognisable resource shape
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub api_version: String,
    pub kind: String,
    /// Name template with positional placeholders
    #[serde(default)]
    pub name: Option<String>,
    /// Label selector applied when listing candidates
    #[serde(default)]
    pub label_selector: Option<String>,
}

impl Signature {
    /// Parse a signature file (a YAML sequence of signatures)
    ///
    /// # Errors
    ///
    /// Returns the YAML error for malformed documents.
    pub fn parse_list(document: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        serde_yaml::from_str(document)
    }

    /// API resource for listing objects of this signature
    pub fn api_resource(&self) -> ApiResource {
        let (group, version) = self
            .api_version
            .split_once('/')
            .unwrap_or(("", self.api_version.as_str()));
        ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &self.kind))
    }

    /// Anchored regex for the name template; the suffix is capture group 1
    pub fn name_regex(&self) -> Option<Regex> {
        let template = self.name.as_deref()?;
        let placeholders: Vec<_> = PLACEHOLDER.find_iter(template).collect();
        let mut pattern = String::from("^");
        let mut last_end = 0;
        for (i, placeholder) in placeholders.iter().enumerate() {
            pattern.push_str(&regex::escape(&template[last_end..placeholder.start()]));
            if i + 1 == placeholders.len() {
                pattern.push('(');
                pattern.push_str(SUFFIX_PATTERN);
                pattern.push(')');
            } else {
                pattern.push_str(SEGMENT_PATTERN);
            }
            last_end = placeholder.end();
        }
        pattern.push_str(&regex::escape(&template[last_end..]));
        pattern.push('$');
        Regex::new(&pattern).ok()
    }

    /// Suffix captured from `name`, or `None` when `name` does not match the template
    ///
    /// Templates without placeholders yield an empty suffix on an exact match.
    pub fn suffix_of(&self, name: &str) -> Option<String> {
        let regex = self.name_regex()?;
        let captures = regex.captures(name)?;
        Some(
            captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        )
    }

    /// Whether an object named `name` belongs to this signature
    pub fn matches(&self, name: &str) -> bool {
        self.name.is_none() || self.suffix_of(name).is_some()
    }

    /// Substitute `args` into the name template
    pub fn format_name(&self, args: &[&str]) -> Option<String> {
        let template = self.name.as_deref()?;
        let mut out = template.to_string();
        for (i, arg) in args.iter().enumerate() {
            out = out.replace(&format!("{{{i}}}"), arg);
        }
        (!PLACEHOLDER.is_match(&out)).then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str) -> Signature {
        Signature {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            name: Some(name.to_string()),
            label_selector: None,
        }
    }

    #[test]
    fn test_parse_list() {
        let signatures = Signature::parse_list(
            "- apiVersion: v1\n  kind: Secret\n  name: olo-managed-ltpa{0}\n- apiVersion: apps.openliberty.io/v1\n  kind: OpenLibertyTrace\n",
        )
        .unwrap();
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[1].name, None);
        assert_eq!(signatures[1].api_resource().group, "apps.openliberty.io");
        assert_eq!(signatures[1].api_resource().plural, "openlibertytraces");
        assert_eq!(signatures[0].api_resource().plural, "secrets");
    }

    #[test]
    fn test_suffix_of() {
        let signature = secret("olo-managed-ltpa{0}");
        assert_eq!(signature.suffix_of("olo-managed-ltpa-ab12c").as_deref(), Some("-ab12c"));
        assert_eq!(signature.suffix_of("olo-managed-ltpa").as_deref(), Some(""));
        assert_eq!(signature.suffix_of("olo-managed-ltpa-server-xml-ab12c"), None);
        assert_eq!(signature.suffix_of("olo-managed-ltpa-AB12C"), None);
    }

    #[test]
    fn test_leading_placeholders_match_segments() {
        let signature = secret("wlp-{0}-encryption-key-internal{1}");
        assert_eq!(
            signature.suffix_of("wlp-aes-encryption-key-internal-zzzzz").as_deref(),
            Some("-zzzzz")
        );
        assert_eq!(
            signature.suffix_of("wlp-password-encryption-key-internal").as_deref(),
            Some("")
        );
        assert_eq!(signature.suffix_of("wlp--encryption-key-internal"), None);
    }

    #[test]
    fn test_template_literals_are_escaped() {
        let signature = secret("a.b{0}");
        assert!(signature.matches("a.b-12345"));
        assert!(!signature.matches("axb-12345"));
    }

    #[test]
    fn test_format_name() {
        let signature = secret("wlp-{0}-encryption-key-internal{1}");
        assert_eq!(
            signature.format_name(&["aes", "-abcde"]).as_deref(),
            Some("wlp-aes-encryption-key-internal-abcde")
        );
        assert_eq!(signature.format_name(&["aes"]), None);
    }

    #[test]
    fn test_signature_without_name_matches_everything() {
        let signature = Signature {
            name: None,
            ..secret("")
        };
        assert!(signature.matches("anything"));
    }
}
