//! # Reconcile Errors
//!
//! Errors returned by the application and trace reconcilers, with the classification
//! that drives the `Reconciled` condition reason and the requeue policy.

use crate::leader::TrackerError;
use crate::tree::TreeError;
use thiserror::Error;

/// Reconcile error
#[derive(Debug, Error)]
pub enum Error {
    /// The custom resource spec is invalid
    #[error("{0}")]
    Validation(String),

    /// A shared resource is being rebuilt or generated
    #[error("{0}")]
    SharedResourceUnavailable(String),

    /// Another instance leads the shared resource
    #[error("waiting for {leader} to finish generating {family} resource {name:?}")]
    LeaderPending {
        family: String,
        name: String,
        leader: String,
    },

    /// The bundled LTPA script differs from the deployed ConfigMap
    #[error("LTPA script ConfigMap {name} is out of sync and has been deleted")]
    ScriptOutOfSync { name: String },

    /// The LTPA generation Job failed
    #[error("LTPA keys generation Job {job} failed; inspect its pods, then delete the Job through instance {leader} to retry")]
    JobFailed { job: String, leader: String },

    /// Password encryption is enabled without a usable user Secret
    #[error("{0}")]
    SecretMissing(String),

    /// Generated keys no longer match the encryption configuration
    #[error("{0}")]
    ConfigurationMismatch(String),

    /// Remote command in a pod failed
    #[error("exec in pod {pod} failed: {message}")]
    Exec { pod: String, message: String },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Tree(_) => ErrorKind::Validation,
            Error::SharedResourceUnavailable(_)
            | Error::Tracker(TrackerError::NotFound { .. } | TrackerError::OutOfSync { .. } | TrackerError::Outdated { .. }) => {
                ErrorKind::SharedResourceUnavailable
            }
            Error::LeaderPending { .. } => ErrorKind::LeaderPending,
            Error::ScriptOutOfSync { .. } => ErrorKind::ScriptOutOfSync,
            Error::JobFailed { .. } => ErrorKind::JobFailed,
            Error::SecretMissing(_) => ErrorKind::SecretMissing,
            Error::ConfigurationMismatch(_) => ErrorKind::ConfigurationMismatch,
            Error::Exec { .. }
            | Error::Tracker(TrackerError::Conflict { .. } | TrackerError::Kube(_))
            | Error::Kube(_)
            | Error::Serialization(_) => ErrorKind::Transient,
        }
    }

    /// Whether the error policy should requeue
    pub fn is_requeueable(&self) -> bool {
        self.kind().is_requeueable()
    }
}

/// Error classes surfaced as the `Reconciled` condition reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad custom resource spec; the user must edit it
    Validation,
    /// Leader tracker or generated artifacts are in flux
    SharedResourceUnavailable,
    /// This instance follows another leader
    LeaderPending,
    /// Script ConfigMap deleted for rebuild
    ScriptOutOfSync,
    /// LTPA Job failed terminally
    JobFailed,
    /// Encryption enabled without a user Secret
    SecretMissing,
    /// Encryption and LTPA drift detected; keys are being regenerated
    ConfigurationMismatch,
    /// API conflict, timeout or network failure
    Transient,
}

impl ErrorKind {
    /// Errors that need a spec change (or operator action) are not requeued
    pub fn is_requeueable(self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::JobFailed)
    }

    /// Condition reason and metrics label
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::SharedResourceUnavailable => "SharedResourceUnavailable",
            ErrorKind::LeaderPending => "LeaderPending",
            ErrorKind::ScriptOutOfSync => "ScriptOutOfSync",
            ErrorKind::JobFailed => "JobFailed",
            ErrorKind::SecretMissing => "SecretMissing",
            ErrorKind::ConfigurationMismatch => "ConfigurationMismatch",
            ErrorKind::Transient => "Transient",
        }
    }

    /// Remediation guidance logged alongside the error
    pub fn remediation(self) -> &'static str {
        match self {
            ErrorKind::Validation => {
                "Fix the custom resource spec; the operator will not retry until it changes."
            }
            ErrorKind::SharedResourceUnavailable => {
                "Shared resources are being rebuilt or generated. This is usually transient - will retry."
            }
            ErrorKind::LeaderPending => {
                "Another application in the namespace leads this shared resource. Will retry once it publishes."
            }
            ErrorKind::ScriptOutOfSync => {
                "The LTPA script ConfigMap was outdated and has been deleted. It is recreated on the next pass."
            }
            ErrorKind::JobFailed => {
                "Inspect the logs of the LTPA keys generation Job pods, then delete the Job to retry."
            }
            ErrorKind::SecretMissing => {
                "Create the 'wlp-aes-encryption-key' Secret (key 'aesEncryptionKey') or the legacy 'wlp-password-encryption-key' Secret (key 'passwordEncryptionKey')."
            }
            ErrorKind::ConfigurationMismatch => {
                "LTPA keys no longer match the encryption key and are being regenerated. Will retry."
            }
            ErrorKind::Transient => {
                "Kubernetes API error or conflict. This is usually transient - will retry."
            }
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds_are_not_requeued() {
        assert!(!Error::Validation("bad".into()).is_requeueable());
        assert!(!Error::JobFailed {
            job: "olo-managed-ltpa-keys-generation-abcde".into(),
            leader: "app-a".into()
        }
        .is_requeueable());
        assert!(Error::SecretMissing("missing".into()).is_requeueable());
        assert!(Error::Tracker(TrackerError::Conflict { name: "t".into() }).is_requeueable());
    }

    #[test]
    fn test_tracker_errors_are_classified() {
        let outdated = Error::Tracker(TrackerError::Outdated {
            name: "t".into(),
            found: "v1_4_0".into(),
            expected: "v1_4_2".into(),
        });
        assert_eq!(outdated.kind(), ErrorKind::SharedResourceUnavailable);
        let conflict = Error::Tracker(TrackerError::Conflict { name: "t".into() });
        assert_eq!(conflict.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_leader_pending_names_the_leader() {
        let err = Error::LeaderPending {
            family: "ltpa".into(),
            name: "-abcde".into(),
            leader: "app-a".into(),
        };
        assert_eq!(err.kind().as_str(), "LeaderPending");
        assert!(err.to_string().contains("app-a"));
    }

    #[test]
    fn test_tree_errors_are_validation() {
        let err = Error::Tree(TreeError::NoVersion(None));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
