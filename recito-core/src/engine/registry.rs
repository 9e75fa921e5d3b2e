//! The authoritative record of registered engines.
//!
//! Holds one entry per engine: static descriptor, live parameter values,
//! mutable status, enabled flag, and scheduling priority. Candidate order for
//! fallback selection is enabled + Available engines by descending priority.
//! State persists to `configs/engines/registry.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::descriptor::{EngineDescriptor, EngineState, EngineStatus};
use crate::engine::EngineHandle;
use crate::error::{RecitoError, Result};

/// Persisted per-engine record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEntry {
    pub info: EngineDescriptor,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub status: EngineStatus,
    pub enabled: bool,
    /// 0..=100; higher is preferred.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    config_version: u32,
    last_updated: DateTime<Utc>,
    engines: BTreeMap<String, EngineEntry>,
}

type ChangeListener = Box<dyn Fn(&str) + Send + Sync>;

struct RegistryInner {
    entries: BTreeMap<String, EngineEntry>,
    handles: BTreeMap<String, EngineHandle>,
}

/// Thread-safe engine registry. Readers get value copies; the lock is never
/// held across engine calls or listener callbacks.
pub struct EngineRegistry {
    inner: RwLock<RegistryInner>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                entries: BTreeMap::new(),
                handles: BTreeMap::new(),
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register an engine instance with its descriptor. Re-registering an id
    /// replaces the handle but keeps persisted parameters/priority.
    pub fn register(&self, handle: EngineHandle, priority: u8) {
        let descriptor = handle.0.lock().describe();
        let id = descriptor.id.clone();
        {
            let mut inner = self.inner.write();
            let now = Utc::now();
            inner
                .entries
                .entry(id.clone())
                .and_modify(|entry| {
                    entry.info = descriptor.clone();
                    entry.updated_at = now;
                })
                .or_insert_with(|| EngineEntry {
                    info: descriptor,
                    parameters: BTreeMap::new(),
                    status: EngineStatus::default(),
                    enabled: true,
                    priority: priority.min(100),
                    created_at: now,
                    updated_at: now,
                });
            inner.handles.insert(id.clone(), handle);
        }
        info!(engine = %id, "engine registered");
        self.notify(&id);
    }

    pub fn resolve(&self, engine_id: &str) -> Option<EngineHandle> {
        self.inner.read().handles.get(engine_id).cloned()
    }

    /// Resolve, or fail with the §7 taxonomy error.
    pub fn resolve_required(&self, engine_id: &str) -> Result<EngineHandle> {
        self.resolve(engine_id)
            .ok_or_else(|| RecitoError::EngineUnknown(engine_id.to_string()))
    }

    pub fn entry(&self, engine_id: &str) -> Option<EngineEntry> {
        self.inner.read().entries.get(engine_id).cloned()
    }

    pub fn entries(&self) -> Vec<EngineEntry> {
        self.inner.read().entries.values().cloned().collect()
    }

    /// Enabled + Available engine ids by descending priority (stable by id
    /// for equal priorities).
    pub fn candidates(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: Vec<(&String, u8)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.enabled && e.status.state == EngineState::Available)
            .map(|(id, e)| (id, e.priority))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// First candidate other than `excluding`, if any.
    pub fn fallback_engine(&self, excluding: &str) -> Option<String> {
        self.candidates().into_iter().find(|id| id != excluding)
    }

    pub fn set_status(&self, engine_id: &str, status: EngineStatus) {
        let mut changed = false;
        {
            let mut inner = self.inner.write();
            if let Some(entry) = inner.entries.get_mut(engine_id) {
                entry.status = status;
                entry.updated_at = Utc::now();
                changed = true;
            }
        }
        if changed {
            self.notify(engine_id);
        }
    }

    pub fn set_enabled(&self, engine_id: &str, enabled: bool) {
        {
            let mut inner = self.inner.write();
            if let Some(entry) = inner.entries.get_mut(engine_id) {
                entry.enabled = enabled;
                entry.updated_at = Utc::now();
            }
        }
        self.notify(engine_id);
    }

    pub fn set_priority(&self, engine_id: &str, priority: u8) {
        {
            let mut inner = self.inner.write();
            if let Some(entry) = inner.entries.get_mut(engine_id) {
                entry.priority = priority.min(100);
                entry.updated_at = Utc::now();
            }
        }
        self.notify(engine_id);
    }

    /// Validate against the engine's parameter schema, then store.
    pub fn set_parameters(
        &self,
        engine_id: &str,
        parameters: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let entry = inner
                .entries
                .get_mut(engine_id)
                .ok_or_else(|| RecitoError::EngineUnknown(engine_id.to_string()))?;
            let merged = entry.info.parameter_schema.with_defaults(&parameters);
            let errors = entry.info.parameter_schema.validate(&merged);
            if !errors.is_empty() {
                return Err(RecitoError::Config(errors.join("; ")));
            }
            entry.parameters = merged;
            entry.updated_at = Utc::now();
        }
        self.notify(engine_id);
        Ok(())
    }

    pub fn on_change(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    fn notify(&self, engine_id: &str) {
        // Listeners run outside the entry lock.
        let listeners = self.listeners.read();
        for listener in listeners.iter() {
            listener(engine_id);
        }
    }

    /// Write `registry.json` via temp-file-then-rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = RegistryFile {
            config_version: 2,
            last_updated: Utc::now(),
            engines: self.inner.read().entries.clone(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&file).map_err(|e| {
            RecitoError::Config(format!("serialize engine registry: {e}"))
        })?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Merge persisted entries onto the live registry: parameters, enabled
    /// flag, and priority survive restarts; descriptors and handles always
    /// come from the running code. Malformed files are ignored with a
    /// warning, matching the config-layer recovery policy.
    pub fn load(&self, path: &Path) {
        if !path.exists() {
            return;
        }
        let parsed: Option<RegistryFile> = fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        let Some(file) = parsed else {
            warn!(path = %path.display(), "malformed engine registry, using defaults");
            return;
        };
        let mut inner = self.inner.write();
        for (id, persisted) in file.engines {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.parameters = persisted.parameters;
                entry.enabled = persisted.enabled;
                entry.priority = persisted.priority;
                entry.created_at = persisted.created_at;
            }
        }
    }
}
