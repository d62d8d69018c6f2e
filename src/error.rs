//! Error types for the Longhorn uninstaller

use thiserror::Error;

use crate::crd::ResourceKind;

/// Result type alias using the uninstaller's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Uninstaller error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency update lost a race
    #[error("conflict: {0}")]
    Conflict(String),

    /// Uninstallation must not proceed
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A kind that only an external controller can clean up is still present
    #[error("found {count} {kind} remaining")]
    Stuck { kind: ResourceKind, count: usize },

    /// Looking up the backup volume of a backup failed for a reason other
    /// than the backup volume being absent
    #[error("failed to look up backup volume of backup {backup}: {source}")]
    BackupVolumeLookup {
        backup: String,
        #[source]
        source: Box<Error>,
    },

    /// Store error annotated with the kind and operation that produced it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Change feed never reached its initial sync
    #[error("failed to sync informers: {0}")]
    Sync(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Wrap this error with the operation that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the target object was already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::NotFound(_) => true,
            Error::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether an update was rejected because the object changed underneath it
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            Error::Conflict(_) => true,
            Error::Context { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Short label used for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Error::Precondition(_) => "precondition",
            Error::Stuck { .. } => "stuck",
            Error::BackupVolumeLookup { .. } => "backup_volume_lookup",
            Error::Sync(_) => "sync",
            Error::Config(_) => "config",
            _ => "store",
        }
    }
}

/// Extension for absorbing not-found results of idempotent operations
pub trait ResultExt {
    /// Treat a not-found error as success; returns whether the object existed
    fn found(self) -> Result<bool>;
}

impl ResultExt for Result<()> {
    fn found(self) -> Result<bool> {
        match self {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        }))
    }

    #[test]
    fn test_not_found_is_detected_through_context() {
        let err = api_error(404).context("failed to delete volumes");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(err.to_string().starts_with("failed to delete volumes: "));
    }

    #[test]
    fn test_conflict_is_detected() {
        assert!(api_error(409).is_conflict());
        assert!(Error::Conflict("bt".to_string()).is_conflict());
        assert!(!api_error(500).is_conflict());
    }

    #[test]
    fn test_found_absorbs_only_not_found() {
        assert!(!Err::<(), _>(Error::not_found("pod")).found().unwrap());
        assert!(Ok::<(), Error>(()).found().unwrap());
        assert!(Err::<(), _>(api_error(500)).found().is_err());
    }

    #[test]
    fn test_stuck_message_names_the_kind() {
        let err = Error::Stuck {
            kind: ResourceKind::SystemBackup,
            count: 2,
        };
        assert_eq!(err.to_string(), "found 2 systembackups remaining");
        assert_eq!(err.category(), "stuck");
    }
}
