//! Durable JSON store for the catalog
//!
//! Writes are atomic: the new content lands in a temporary file in the same
//! directory, and a single rename commits it. Any reader of the store path
//! sees either the previous complete document or the new one, never a partial
//! write. Each write first snapshots the old file into a rotating `backups/`
//! directory next to the store.
//!
//! The store assumes a single writer per run; concurrent writers from
//! different processes are not coordinated and the last rename wins. Callers
//! serialize runs externally (see `sync::RefreshGate`).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};

use crate::catalog::{normalize_collection, normalize_items, InventoryItem};
use crate::error::Result;

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Number of backup snapshots retained next to the store file
pub const MAX_BACKUPS: usize = 30;

/// Catalog contents as read from disk
#[derive(Debug)]
pub struct StoredCatalog {
    /// 0 for legacy bare-array files, `SCHEMA_VERSION` otherwise
    pub schema_version: u32,
    pub updated_at: Option<String>,
    pub items: Vec<InventoryItem>,
}

impl StoredCatalog {
    fn empty() -> Self {
        Self {
            schema_version: 0,
            updated_at: None,
            items: Vec::new(),
        }
    }
}

/// File-backed catalog store with rotating backups
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
    max_backups: usize,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_backups: MAX_BACKUPS,
        }
    }

    /// Override the retention bound (used by tests and one-off tooling)
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the catalog from disk
    ///
    /// A missing file is an empty catalog, not an error - first run has no
    /// store yet. A malformed file is logged and also treated as empty; the
    /// next successful write replaces it (its bytes survive in `backups/`).
    /// Accepts both the current envelope and the legacy bare-array shape.
    pub fn read(&self) -> StoredCatalog {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Store file {} does not exist yet", self.path.display());
                return StoredCatalog::empty();
            }
            Err(e) => {
                log::warn!("Failed to read store file {}: {}", self.path.display(), e);
                return StoredCatalog::empty();
            }
        };

        let raw: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "Store file {} is not valid JSON, treating as empty: {}",
                    self.path.display(),
                    e
                );
                return StoredCatalog::empty();
            }
        };

        let (schema_version, updated_at, list) = match raw {
            Value::Object(mut obj) => {
                let version = obj
                    .get("schemaVersion")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                let updated = obj
                    .get("updatedAt")
                    .and_then(Value::as_str)
                    .map(String::from);
                let items = obj.remove("items").unwrap_or_else(|| Value::Array(Vec::new()));
                (version, updated, items)
            }
            list @ Value::Array(_) => (0, None, list),
            _ => {
                log::warn!(
                    "Store file {} holds neither a list nor an envelope, treating as empty",
                    self.path.display()
                );
                return StoredCatalog::empty();
            }
        };

        match normalize_collection(&list) {
            Ok(items) => StoredCatalog {
                schema_version,
                updated_at,
                items,
            },
            Err(e) => {
                log::warn!("Store file {} failed normalization: {}", self.path.display(), e);
                StoredCatalog::empty()
            }
        }
    }

    /// Persist the catalog atomically, rotating backups first
    ///
    /// A failed backup or prune is logged and swallowed - a missed snapshot
    /// must never block the write. A failed serialize, temp-file write, or
    /// rename propagates to the caller: continuing would present a stale
    /// store as current.
    pub fn write(&self, items: &[InventoryItem]) -> Result<usize> {
        if let Err(e) = self.backup_existing() {
            log::warn!(
                "Backup of {} failed, continuing with write: {}",
                self.path.display(),
                e
            );
        }
        if let Err(e) = self.prune_backups() {
            log::warn!("Backup pruning failed: {}", e);
        }

        let items = normalize_items(items.to_vec());
        let envelope = json!({
            "schemaVersion": SCHEMA_VERSION,
            "updatedAt": Utc::now().to_rfc3339(),
            "totalItems": items.len(),
            "items": items,
        });
        let body = serde_json::to_string_pretty(&envelope)?;

        let tmp = self.temp_path();
        if let Err(e) = fs::write(&tmp, body) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        log::info!("Wrote {} items to {}", items.len(), self.path.display());
        Ok(items.len())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn backups_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) => parent.join("backups"),
            None => PathBuf::from("backups"),
        }
    }

    /// Copy the current store file into `backups/` under a sortable stamp
    fn backup_existing(&self) -> std::io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let dir = self.backups_dir();
        fs::create_dir_all(&dir)?;

        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog".to_string());
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");

        // Writes inside one second would collide on the stamp alone
        let mut backup = dir.join(format!("{}-{}", stamp, name));
        let mut n = 1;
        while backup.exists() {
            backup = dir.join(format!("{}-{}-{}", stamp, n, name));
            n += 1;
        }

        fs::copy(&self.path, &backup)?;
        log::debug!("Backed up store to {}", backup.display());
        Ok(())
    }

    /// Delete all but the `max_backups` most recently modified snapshots
    fn prune_backups(&self) -> std::io::Result<()> {
        let dir = self.backups_dir();
        if !dir.exists() {
            return Ok(());
        }

        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        if entries.len() <= self.max_backups {
            return Ok(());
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in entries.split_off(self.max_backups) {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("Failed to remove old backup {}: {}", path.display(), e);
            } else {
                log::debug!("Pruned old backup {}", path.display());
            }
        }
        Ok(())
    }
}
