//! Error types for the config-store crate.

use std::path::PathBuf;

/// Errors that can occur while reading or writing configuration documents.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document could not be serialized or parsed as JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The document parsed but does not have the `{data, checksum}` shape
    #[error("Malformed document {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// The stored checksum does not match the recomputed one
    #[error("Checksum mismatch in {path}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        computed: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the file exists but failed verification
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::Malformed { .. }
                | StoreError::ChecksumMismatch { .. }
                | StoreError::Serialization(_)
        )
    }
}

/// Convenience type alias for Results using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let error = StoreError::ChecksumMismatch {
            path: PathBuf::from("/tmp/config.json"),
            expected: "aa".to_string(),
            computed: "bb".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Checksum mismatch in /tmp/config.json: expected aa, computed bb"
        );
        assert!(error.is_corruption());

        let error = StoreError::io(
            "/tmp/config.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().starts_with("I/O error on /tmp/config.json"));
        assert!(!error.is_corruption());
    }
}
