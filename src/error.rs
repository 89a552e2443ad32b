//! Error types for the StreamCluster operator
//!
//! Provides structured error types for all operator components including
//! the generic resource reconciler, the desired-state model builder and
//! the reconciliation coordinator.

use std::time::Duration;
use thiserror::Error;

/// A single failed object within a reconciliation pass.
///
/// Per-object failures are always attributed: callers must be able to tell
/// which object failed and why, never just "the pass failed".
#[derive(Debug)]
pub struct ObjectFailure {
    /// Kubernetes kind of the failed object
    pub kind: String,
    /// Name of the failed object
    pub name: String,
    /// What went wrong
    pub reason: String,
}

impl std::fmt::Display for ObjectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.kind, self.name, self.reason)
    }
}

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Reconciler Errors
    // =========================================================================
    #[error("Given name {requested} incompatible with desired name {desired}")]
    NameMismatch { requested: String, desired: String },

    #[error("Create failed for {kind}/{name}: {reason}")]
    CreateFailed {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Patch failed for {kind}/{name}: {reason}")]
    PatchFailed {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Delete failed for {kind}/{name}: {reason}")]
    DeleteFailed {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Watch for {kind}/{name} closed before the expected event was observed")]
    WatchClosed { kind: String, name: String },

    #[error("Timed out after {timeout:?} waiting for deletion of {kind}/{name}")]
    DeletionTimeout {
        kind: String,
        name: String,
        timeout: Duration,
    },

    // =========================================================================
    // Coordinator Errors
    // =========================================================================
    #[error("Reconciliation already in progress for {instance}")]
    PassInProgress { instance: String },

    #[error("Reconciliation pass for {instance} failed: [{}]",
        .failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; "))]
    PassFailed {
        instance: String,
        failures: Vec<ObjectFailure>,
    },

    // =========================================================================
    // Model Errors
    // =========================================================================
    #[error("No image available for version {version}")]
    NoImageForVersion { version: String },

    #[error("Certificate issuance failed: {0}")]
    CertificateIssuance(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Storage state annotation is not valid JSON: {0}")]
    StorageAnnotationParse(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::ResourceNotFound { .. }
            | Error::CreateFailed { .. }
            | Error::PatchFailed { .. }
            | Error::DeleteFailed { .. }
            | Error::WatchClosed { .. }
            | Error::PassFailed { .. }
            | Error::CertificateIssuance(_) => ErrorAction::RequeueWithBackoff,

            // A pass is already running - wait for it to finish
            Error::PassInProgress { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // The object may already be gone; the next get will observe that
            Error::DeletionTimeout { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::NameMismatch { .. }
            | Error::NoImageForVersion { .. }
            | Error::CapacityParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::PassInProgress {
            instance: "ns/my-cluster".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(10))
        );

        let err = Error::NameMismatch {
            requested: "foo".into(),
            desired: "bar".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::WatchClosed {
            kind: "Service".into(),
            name: "foo".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);

        // A missing collaborator resource may appear later; requeue
        let err = Error::ResourceNotFound {
            kind: "Secret".into(),
            name: "data/quorum-ca-issued".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::DeleteFailed {
            kind: "Service".into(),
            name: "foo".into(),
            reason: "conflict".into(),
        };
        assert!(transient.is_retryable());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
    }

    #[test]
    fn test_pass_failed_attribution() {
        let err = Error::PassFailed {
            instance: "ns/my-cluster".into(),
            failures: vec![
                ObjectFailure {
                    kind: "Service".into(),
                    name: "my-cluster-quorum-client".into(),
                    reason: "conflict".into(),
                },
                ObjectFailure {
                    kind: "ConfigMap".into(),
                    name: "my-cluster-quorum-config".into(),
                    reason: "forbidden".into(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("Service/my-cluster-quorum-client: conflict"));
        assert!(msg.contains("ConfigMap/my-cluster-quorum-config: forbidden"));
    }
}
