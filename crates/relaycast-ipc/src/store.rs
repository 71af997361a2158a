//! Persistence seam for broadcast configurations.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::BroadcastConfig;

/// Errors returned by a broadcast store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record matched the lookup.
    #[error("Broadcast not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for the distinguished not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Reads and writes single broadcast records. Updates to one record are
/// last-writer-wins.
pub trait BroadcastStore: Send + Sync {
    /// Loads a broadcast by its identifier.
    fn get(&self, id: &str) -> StoreResult<BroadcastConfig>;

    /// Loads a broadcast by site and name.
    fn get_by_name(&self, site_key: i64, name: &str) -> StoreResult<BroadcastConfig>;

    /// Inserts or replaces a broadcast.
    fn put(&self, config: &BroadcastConfig) -> StoreResult<()>;

    /// Lists every broadcast.
    fn list(&self) -> StoreResult<Vec<BroadcastConfig>>;

    /// Returns true if a broadcast with this site and name exists.
    fn exists(&self, site_key: i64, name: &str) -> StoreResult<bool> {
        match self.get_by_name(site_key, name) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// In-memory store, optionally mirrored to a JSON file on every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, BroadcastConfig>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty store that is not persisted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing records if the file exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records = HashMap::new();

        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if !raw.trim().is_empty() {
                let configs: Vec<BroadcastConfig> = serde_json::from_str(&raw)?;
                for config in configs {
                    records.insert(config.id.clone(), config);
                }
            }
            info!(path = %path.display(), count = records.len(), "Loaded broadcast store");
        }

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    /// Create a store holding the given records.
    pub fn with_records(configs: impl IntoIterator<Item = BroadcastConfig>) -> Self {
        let records = configs
            .into_iter()
            .map(|config| (config.id.clone(), config))
            .collect();
        Self {
            records: RwLock::new(records),
            path: None,
        }
    }

    fn flush(&self, records: &HashMap<String, BroadcastConfig>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut configs: Vec<&BroadcastConfig> = records.values().collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&configs)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Flushed broadcast store");
        Ok(())
    }
}

impl BroadcastStore for MemoryStore {
    fn get(&self, id: &str) -> StoreResult<BroadcastConfig> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn get_by_name(&self, site_key: i64, name: &str) -> StoreResult<BroadcastConfig> {
        self.records
            .read()
            .values()
            .find(|config| config.site_key == site_key && config.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{site_key}/{name}")))
    }

    fn put(&self, config: &BroadcastConfig) -> StoreResult<()> {
        let mut records = self.records.write();
        records.insert(config.id.clone(), config.clone());
        self.flush(&records)
    }

    fn list(&self) -> StoreResult<Vec<BroadcastConfig>> {
        let mut configs: Vec<BroadcastConfig> = self.records.read().values().cloned().collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(configs)
    }
}
