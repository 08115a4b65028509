//! Preset store.
//!
//! Named parameter sets persisted one JSON document per preset under
//! `/presets/<name>.json` (the layout deployed firmware expects), with
//! an in-memory index for lookups. The index is reloaded from disk
//! after every mutating operation so no partial state is ever visible.

mod storage;

pub use storage::{DirStorage, MemStorage, Storage, StorageError};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Directory presets persist under.
pub const PRESET_DIR: &str = "/presets";

/// Longest accepted preset name.
pub const MAX_PRESET_NAME_LEN: usize = 63;

/// Errors surfaced to the control plane by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("preset not found: {0}")]
    NotFound(String),

    #[error("preset already exists: {0}")]
    Duplicate(String),

    #[error("invalid preset name: {0:?}")]
    InvalidName(String),

    #[error("storage unavailable")]
    Unavailable,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("bad preset document: {0}")]
    Json(#[from] serde_json::Error),
}

/// One persisted preset document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetRecord {
    pub name: String,
    pub base_type: String,
    pub params: Value,
}

/// File-backed preset records with an in-memory index.
pub struct PresetStore {
    storage: Option<Arc<dyn Storage>>,
    index: HashMap<String, PresetRecord>,
}

impl PresetStore {
    /// Mount the store: ensure the preset directory exists and load the
    /// index.
    pub fn mount(storage: Arc<dyn Storage>) -> Result<Self, StoreError> {
        storage.mkdir(PRESET_DIR)?;
        let mut store = Self {
            storage: Some(storage),
            index: HashMap::new(),
        };
        store.reload()?;
        info!(presets = store.index.len(), "preset store mounted");
        Ok(store)
    }

    /// A store with no persistence at all: every lookup is empty and
    /// every mutation fails with [`StoreError::Unavailable`]. Used when
    /// the flash filesystem is broken at boot; base animations keep
    /// working.
    pub fn disabled() -> Self {
        Self {
            storage: None,
            index: HashMap::new(),
        }
    }

    fn storage(&self) -> Result<&Arc<dyn Storage>, StoreError> {
        self.storage.as_ref().ok_or(StoreError::Unavailable)
    }

    fn path_for(name: &str) -> String {
        format!("{}/{}.json", PRESET_DIR, name)
    }

    fn validate_name(name: &str) -> Result<(), StoreError> {
        let ok = !name.is_empty()
            && name.len() <= MAX_PRESET_NAME_LEN
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'));
        if ok {
            Ok(())
        } else {
            Err(StoreError::InvalidName(name.to_string()))
        }
    }

    /// Rebuild the index from disk. Unreadable documents are skipped
    /// with a warning rather than poisoning the whole store.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        let storage = self.storage()?;
        let mut index = HashMap::new();
        for entry in storage.list(PRESET_DIR)? {
            let Some(name) = entry.strip_suffix(".json") else {
                continue;
            };
            let path = format!("{}/{}", PRESET_DIR, entry);
            let record: PresetRecord = match storage
                .read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping unreadable preset");
                    continue;
                }
            };
            index.insert(name.to_string(), record);
        }
        self.index = index;
        Ok(())
    }

    /// Write (or overwrite) a preset from raw replicated data.
    pub fn save_from_data(
        &mut self,
        name: &str,
        base_type: &str,
        params: Value,
    ) -> Result<(), StoreError> {
        Self::validate_name(name)?;
        let record = PresetRecord {
            name: name.to_string(),
            base_type: base_type.to_string(),
            params,
        };
        let bytes = serde_json::to_vec(&record)?;
        self.storage()?.write(&Self::path_for(name), &bytes)?;
        self.reload()
    }

    pub fn delete(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.exists(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.storage()?.remove(&Self::path_for(name))?;
        self.reload()
    }

    /// Rename a preset. Fails with [`StoreError::Duplicate`] when the
    /// target name is taken, leaving both records untouched.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        Self::validate_name(new)?;
        if !self.exists(old) {
            return Err(StoreError::NotFound(old.to_string()));
        }
        if self.exists(new) {
            return Err(StoreError::Duplicate(new.to_string()));
        }

        let storage = self.storage()?;
        let bytes = storage.read(&Self::path_for(old))?;
        let mut record: PresetRecord = serde_json::from_slice(&bytes)?;
        record.name = new.to_string();
        storage.write(&Self::path_for(new), &serde_json::to_vec(&record)?)?;
        storage.remove(&Self::path_for(old))?;
        self.reload()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All preset names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<&PresetRecord> {
        self.index.get(name)
    }

    pub fn get_data(&self, name: &str) -> Result<(String, Value), StoreError> {
        self.index
            .get(name)
            .map(|r| (r.base_type.clone(), r.params.clone()))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Every record as one JSON array, for UI export.
    pub fn export_all(&self) -> Value {
        let mut records: Vec<&PresetRecord> = self.index.values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        serde_json::to_value(records).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
