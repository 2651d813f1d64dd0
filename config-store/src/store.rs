//! Live document, backup rotation, and recovery
//!
//! # Layout
//!
//! ```text
//! <dir>/config.json          live document
//! <dir>/config.json.tmp      in-flight write, never read back
//! <dir>/config.json.bak.1    previous good document (newest backup)
//! <dir>/config.json.bak.N    oldest retained backup
//! ```
//!
//! # Save sequence
//!
//! 1. Seal `data` into a `{data, checksum}` document
//! 2. Write it to `config.json.tmp`, flush, `fsync`
//! 3. `rename` over `config.json` (atomic on POSIX filesystems)
//! 4. Shift the rotation by one and store the previous live document as `bak.1`
//!
//! A crash at any point leaves `config.json` holding either the complete old
//! or the complete new document.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::document::PersistedDocument;
use crate::error::{Result, StoreError};

/// Where the currently loaded data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// The live document verified
    Live,
    /// The live document failed verification; backup `index` (1 = newest) was used
    Backup { index: usize },
    /// Nothing verified; built-in defaults are in effect
    Defaults,
    /// No document existed yet; defaults were written as the first live document
    FirstBoot,
}

/// Outcome of [`ConfigStore::load`]
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub origin: LoadOrigin,
    /// Human-readable descriptions of every file that failed verification
    pub warnings: Vec<String>,
}

impl LoadReport {
    /// Whether the caller should surface a recovery warning
    pub fn recovered(&self) -> bool {
        matches!(self.origin, LoadOrigin::Backup { .. } | LoadOrigin::Defaults)
    }
}

/// Checksum-verified JSON document with a bounded backup rotation
///
/// All file I/O is blocking. Async callers should run `load` and `save` on a
/// blocking thread.
pub struct ConfigStore {
    path: PathBuf,
    backup_depth: usize,
    defaults: Value,
    current: RwLock<Arc<Value>>,
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Create a store for `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>, backup_depth: usize, defaults: Value) -> Self {
        Self {
            path: path.into(),
            backup_depth,
            current: RwLock::new(Arc::new(defaults.clone())),
            defaults,
            writer: Mutex::new(()),
        }
    }

    /// Path of the live document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of backups retained
    pub fn backup_depth(&self) -> usize {
        self.backup_depth
    }

    /// Path of backup `index` (1 = newest)
    pub fn backup_path(&self, index: usize) -> PathBuf {
        self.sibling(&format!("bak.{index}"))
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling("tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Immutable snapshot of the current data
    pub fn snapshot(&self) -> Arc<Value> {
        Arc::clone(&self.current.read())
    }

    /// Deserialize one top-level section of the current data
    ///
    /// Returns `None` if the key is absent or does not match `T`.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let snapshot = self.snapshot();
        let value = snapshot.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(section) => Some(section),
            Err(e) => {
                tracing::warn!("Config section `{}` has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Read the live document, falling back through the backups and finally to
    /// the defaults
    ///
    /// On first boot (no live document and no backups) the defaults are written
    /// out as the initial live document. A verified backup is written back as
    /// the live document.
    pub fn load(&self) -> LoadReport {
        let _guard = self.writer.lock();
        let mut warnings = Vec::new();

        let live_exists = self.path.exists();
        match read_verified(&self.path) {
            Ok(document) => {
                tracing::debug!("Loaded live config from {}", self.path.display());
                self.install(document.data);
                return LoadReport {
                    origin: LoadOrigin::Live,
                    warnings,
                };
            }
            Err(e) if live_exists => {
                tracing::warn!("Live config failed verification: {}", e);
                warnings.push(e.to_string());
            }
            Err(_) => {}
        }

        let mut any_backup = false;
        for index in 1..=self.backup_depth {
            let path = self.backup_path(index);
            if !path.exists() {
                continue;
            }
            any_backup = true;
            match read_verified(&path) {
                Ok(document) => {
                    tracing::warn!(
                        "Recovered config from backup {} ({})",
                        index,
                        path.display()
                    );
                    // A corrupt live file is not rotated, so the backups stay as they are.
                    if let Err(e) = self.write_locked(document.data.clone()) {
                        tracing::warn!("Failed to restore live config from backup: {}", e);
                        warnings.push(e.to_string());
                        self.install(document.data);
                    }
                    return LoadReport {
                        origin: LoadOrigin::Backup { index },
                        warnings,
                    };
                }
                Err(e) => {
                    tracing::warn!("Backup {} failed verification: {}", index, e);
                    warnings.push(e.to_string());
                }
            }
        }

        self.install(self.defaults.clone());

        if !live_exists && !any_backup {
            tracing::info!(
                "No config at {}, writing defaults",
                self.path.display()
            );
            if let Err(e) = self.write_locked(self.defaults.clone()) {
                tracing::warn!("Failed to write initial config: {}", e);
                warnings.push(e.to_string());
            }
            return LoadReport {
                origin: LoadOrigin::FirstBoot,
                warnings,
            };
        }

        tracing::warn!("No valid config document found, using defaults");
        warnings.push("no valid document or backup found, using defaults".to_string());
        LoadReport {
            origin: LoadOrigin::Defaults,
            warnings,
        }
    }

    /// Atomically replace the live document with `data`
    ///
    /// The in-memory snapshot only changes once the rename has succeeded.
    pub fn save(&self, data: Value) -> Result<()> {
        let _guard = self.writer.lock();
        self.write_locked(data)
    }

    fn install(&self, data: Value) {
        *self.current.write() = Arc::new(data);
    }

    fn write_locked(&self, data: Value) -> Result<()> {
        let document = PersistedDocument::seal(data)?;
        let bytes = document.to_vec_pretty()?;

        // Only documents that still verify are worth keeping as backups.
        let previous = fs::read(&self.path)
            .ok()
            .filter(|raw| PersistedDocument::from_slice(raw, &self.path).is_ok());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let temp = self.temp_path();
        write_synced(&temp, &bytes)?;
        fs::rename(&temp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        sync_parent(&self.path);

        self.install(document.data);
        tracing::debug!(
            "Saved config to {} (checksum {})",
            self.path.display(),
            document.checksum
        );

        if let Some(previous) = previous {
            // The new document is already committed; a failed rotation only
            // costs recovery depth.
            if let Err(e) = self.rotate_backups(&previous) {
                tracing::warn!("Failed to rotate config backups: {}", e);
            }
        }

        Ok(())
    }

    fn rotate_backups(&self, previous: &[u8]) -> Result<()> {
        if self.backup_depth == 0 {
            return Ok(());
        }

        let oldest = self.backup_path(self.backup_depth);
        match fs::remove_file(&oldest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&oldest, e)),
        }

        for index in (1..self.backup_depth).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                let to = self.backup_path(index + 1);
                fs::rename(&from, &to).map_err(|e| StoreError::io(&from, e))?;
            }
        }

        let newest = self.backup_path(1);
        let temp = self.sibling("bak.tmp");
        write_synced(&temp, previous)?;
        fs::rename(&temp, &newest).map_err(|e| StoreError::io(&newest, e))?;
        Ok(())
    }
}

fn read_verified(path: &Path) -> Result<PersistedDocument> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    PersistedDocument::from_slice(&bytes, path)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
    file.flush().map_err(|e| StoreError::io(path, e))?;
    file.sync_all().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!("Failed to fsync {}: {}", parent.display(), e);
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
