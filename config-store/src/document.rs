//! Persisted document envelope and canonical checksums
//!
//! The checksum covers only the `data` tree. Canonical form is compact JSON with
//! object keys sorted recursively, so the digest does not depend on the order in
//! which keys were inserted or on how the file was pretty-printed.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// A `{data, checksum}` envelope as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub data: Value,
    pub checksum: String,
}

impl PersistedDocument {
    /// Wrap `data` and compute its checksum
    pub fn seal(data: Value) -> Result<Self> {
        let checksum = checksum_of(&data)?;
        Ok(Self { data, checksum })
    }

    /// Recompute the checksum and compare it with the stored one
    pub fn verify(&self, path: &Path) -> Result<()> {
        let computed = checksum_of(&self.data)?;
        if computed != self.checksum {
            return Err(StoreError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Parse raw file contents and verify the checksum
    pub fn from_slice(bytes: &[u8], path: &Path) -> Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut fields) = raw else {
            return Err(StoreError::Malformed {
                path: path.to_path_buf(),
                reason: "top level is not an object".to_string(),
            });
        };

        let data = fields.remove("data").ok_or_else(|| StoreError::Malformed {
            path: path.to_path_buf(),
            reason: "missing `data`".to_string(),
        })?;
        let checksum = match fields.remove("checksum") {
            Some(Value::String(checksum)) => checksum,
            _ => {
                return Err(StoreError::Malformed {
                    path: path.to_path_buf(),
                    reason: "missing or non-string `checksum`".to_string(),
                })
            }
        };

        let document = Self { data, checksum };
        document.verify(path)?;
        Ok(document)
    }

    /// Pretty-printed file contents
    pub fn to_vec_pretty(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Compact JSON with object keys sorted at every level
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&canonicalize(value))?)
}

/// Lowercase hex SHA-256 of the canonical form of `value`
pub fn checksum_of(value: &Value) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// Rebuilding maps in sorted order keeps the output stable even if serde_json's
// `preserve_order` feature gets unified in by another crate.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
