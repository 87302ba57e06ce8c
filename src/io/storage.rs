//! Key/value persistence for the monitored state
//!
//! The engine persists `MonitoredState` as one JSON document after each
//! mutation and restores it at construction. Two stores are provided:
//! - `FileStore` - a JSON object on disk, rewritten through a temp file
//! - `MemoryStore` - in-process map for tests and hosts without storage

use crate::domain::state::MonitoredState;
use anyhow::Context;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key under which the monitored state is stored
pub const STATE_KEY: &str = "geo.monitored_state";

/// Minimal key/value store supplied by the host
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<FxHashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// JSON-file backed store
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", self.path.display()))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!(file = %self.path.display(), keys = %entries.len(), "state_file_written");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// Serializes `MonitoredState` into a `KeyValueStore`
#[derive(Clone)]
pub struct StatePersister {
    store: Arc<dyn KeyValueStore>,
}

impl StatePersister {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load persisted state; unreadable or corrupt state yields an empty one
    pub fn load(&self) -> MonitoredState {
        let raw = match self.store.get(STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return MonitoredState::new(),
            Err(e) => {
                warn!(error = %e, "state_load_failed");
                return MonitoredState::new();
            }
        };

        match serde_json::from_str::<MonitoredState>(&raw) {
            Ok(mut state) => {
                let repaired = state.repair();
                if repaired > 0 {
                    warn!(dropped = %repaired, "state_restored_with_dangling_entries");
                }
                state
            }
            Err(e) => {
                warn!(error = %e, "state_decode_failed");
                MonitoredState::new()
            }
        }
    }

    /// Persist state; failures are logged and do not affect the in-memory state
    pub fn save(&self, state: &MonitoredState) {
        let result = serde_json::to_string(state)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.store.put(STATE_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "state_save_failed");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(STATE_KEY) {
            warn!(error = %e, "state_clear_failed");
        }
    }
}
