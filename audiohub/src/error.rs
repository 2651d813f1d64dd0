//! Error taxonomy for hub operations
//!
//! Every failure maps onto one [`ErrorKind`], which is what the API layer and
//! the `*_error` events expose. [`Outcome`] is the serializable
//! `{ok}` / `{error_kind, message}` form of an operation result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use config_store::StoreError;
use plugin_api::{PluginError, SourceId};

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown source or value; rejected before any side effect
    ValidationError,
    /// Another operation holds the lock; rejected before any side effect
    ConcurrencyError,
    /// A bounded wait ran past its deadline
    TimeoutError,
    /// A plugin or service call failed after exhausting retries
    ExternalServiceError,
    /// A document could not be written or verified
    PersistenceError,
    /// Restoring the previous state failed; the hub is halted until reset
    RollbackFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ConcurrencyError => "ConcurrencyError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::ExternalServiceError => "ExternalServiceError",
            ErrorKind::PersistenceError => "PersistenceError",
            ErrorKind::RollbackFailure => "RollbackFailure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`AudioHub`](crate::AudioHub) operations
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Unknown source: {0:?}")]
    UnknownSource(String),

    #[error("No plugin registered for source {0}")]
    UnregisteredSource(SourceId),

    #[error("Invalid routing mode: {0:?}")]
    InvalidRoutingMode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Another operation is already in progress")]
    Busy,

    #[error("{operation} did not complete within {budget:?}")]
    Timeout { operation: String, budget: Duration },

    #[error("Plugin {source_id} failed: {source}")]
    Plugin {
        source_id: SourceId,
        #[source]
        source: PluginError,
    },

    #[error("Plugin {0} reported an error while connecting")]
    PluginReportedError(SourceId),

    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    Service {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Persistence task failed: {0}")]
    PersistenceTask(String),

    #[error("Operation task failed: {0}")]
    OperationTask(String),

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Hub is halted after a failed rollback; reset required")]
    Halted,
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::UnknownSource(_)
            | CoordinatorError::UnregisteredSource(_)
            | CoordinatorError::InvalidRoutingMode(_)
            | CoordinatorError::InvalidConfig(_) => ErrorKind::ValidationError,
            CoordinatorError::Busy => ErrorKind::ConcurrencyError,
            CoordinatorError::Timeout { .. } => ErrorKind::TimeoutError,
            CoordinatorError::Plugin { .. }
            | CoordinatorError::PluginReportedError(_)
            | CoordinatorError::Service { .. }
            | CoordinatorError::OperationTask(_) => ErrorKind::ExternalServiceError,
            CoordinatorError::Persistence(_) | CoordinatorError::PersistenceTask(_) => {
                ErrorKind::PersistenceError
            }
            CoordinatorError::RollbackFailed(_) | CoordinatorError::Halted => {
                ErrorKind::RollbackFailure
            }
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Persistence(StoreError::Serialization(err))
    }
}

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// The most recent failure, kept in [`SystemState`](crate::SystemState)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&CoordinatorError> for LastError {
    fn from(err: &CoordinatorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Wire form of an operation result
///
/// Serializes as `{"ok": true}` or `{"error_kind": "...", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Ok { ok: bool },
    Failed { error_kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn ok() -> Self {
        Outcome::Ok { ok: true }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Ok { .. } => None,
            Outcome::Failed { error_kind, .. } => Some(*error_kind),
        }
    }
}

impl From<&CoordinatorError> for Outcome {
    fn from(err: &CoordinatorError) -> Self {
        Outcome::Failed {
            error_kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::ok(),
            Err(err) => Outcome::from(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CoordinatorError::UnknownSource("x".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(CoordinatorError::Busy.kind(), ErrorKind::ConcurrencyError);
        assert_eq!(
            CoordinatorError::Timeout {
                operation: "activating radio".into(),
                budget: Duration::from_secs(10),
            }
            .kind(),
            ErrorKind::TimeoutError
        );
        assert_eq!(
            CoordinatorError::Service {
                operation: "start snapserver.service".into(),
                attempts: 3,
                message: "exit 1".into(),
            }
            .kind(),
            ErrorKind::ExternalServiceError
        );
        assert_eq!(
            CoordinatorError::PersistenceTask("panicked".into()).kind(),
            ErrorKind::PersistenceError
        );
        assert_eq!(CoordinatorError::Halted.kind(), ErrorKind::RollbackFailure);
    }

    #[test]
    fn test_error_display() {
        let error = CoordinatorError::Timeout {
            operation: "activating radio".to_string(),
            budget: Duration::from_secs(10),
        };
        assert_eq!(error.to_string(), "activating radio did not complete within 10s");

        let error = CoordinatorError::Plugin {
            source_id: SourceId::Bluetooth,
            source: PluginError::StartFailed("adapter missing".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "Plugin bluetooth failed: Plugin failed to start: adapter missing"
        );
    }

    #[test]
    fn test_outcome_wire_shape() {
        assert_eq!(serde_json::to_value(Outcome::ok()).unwrap(), json!({ "ok": true }));

        let outcome = Outcome::from(Err(CoordinatorError::UnknownSource(
            "not-a-real-source".to_string(),
        )));
        assert!(!outcome.is_ok());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "error_kind": "ValidationError",
                "message": "Unknown source: \"not-a-real-source\""
            })
        );
    }
}
