//! Checksum-Verified Configuration Storage
//!
//! A small, synchronous storage layer for a single JSON configuration document
//! that must survive crashes and disk corruption.
//!
//! # Features
//!
//! - **Atomic Replacement**: Every save is written to a temporary file, flushed,
//!   and renamed over the live file, so readers only ever see a complete document
//! - **Integrity Checks**: Documents carry a SHA-256 checksum of the canonical
//!   serialization of their `data` tree, verified on every load
//! - **Backup Rotation**: The previous good document is kept in a bounded rotation
//!   (`config.json.bak.1` is the newest)
//! - **Snapshots**: Reads hand out `Arc<Value>` snapshots that never change under
//!   the caller
//!
//! # On-disk Format
//!
//! ```json
//! {
//!   "data": { "routing": { "mode": "direct", "equalizer_enabled": false } },
//!   "checksum": "<hex sha-256 of the canonical form of data>"
//! }
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use config_store::{ConfigStore, LoadOrigin};
//! use serde_json::json;
//!
//! let store = ConfigStore::new("/var/lib/audiohub/config.json", 3, json!({ "volume": 40 }));
//!
//! let report = store.load();
//! if report.origin != LoadOrigin::Live {
//!     for warning in &report.warnings {
//!         eprintln!("config recovery: {warning}");
//!     }
//! }
//!
//! let mut data = (*store.snapshot()).clone();
//! data["volume"] = json!(55);
//! store.save(data)?;
//! # Ok::<(), config_store::StoreError>(())
//! ```

pub mod document;
pub mod error;
pub mod store;

pub use document::{canonical_bytes, checksum_of, PersistedDocument};
pub use error::{Result, StoreError};
pub use store::{ConfigStore, LoadOrigin, LoadReport};
