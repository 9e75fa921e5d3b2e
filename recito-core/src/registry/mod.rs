//! Persisted application configuration.
//!
//! On-disk layout under the config root:
//!
//! ```text
//! configs/
//! ├── app/{main,ui,files,performance,preferences}.json
//! ├── engines/registry.json
//! ├── voices/<engine_id>_voices.json
//! ├── templates/*.json
//! └── backups/<backup_id>/... + backup_index.json
//! ```
//!
//! Loading is forgiving: a malformed section file reverts to defaults with a
//! warning (the only place in the system where silent fallback is correct).
//! Saving is atomic: serialize to `<name>.json.tmp`, then rename.

pub mod backup;
pub mod migrate;
pub mod sections;
pub mod template;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{RecitoError, Result};
use sections::AppConfig;

type ChangeListener = Box<dyn Fn(&str) + Send + Sync>;

pub struct ConfigRegistry {
    root: PathBuf,
    state: RwLock<AppConfig>,
    listeners: RwLock<Vec<ChangeListener>>,
}

/// Serialize `value` to `path` via temp-file-then-rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| RecitoError::Config(format!("serialize {}: {e}", path.display())))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ConfigRegistry {
    /// Open (and load) the registry rooted at `root` (the `configs/` dir).
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let registry = Self {
            root,
            state: RwLock::new(AppConfig::default()),
            listeners: RwLock::new(Vec::new()),
        };
        registry.reload();
        registry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    pub fn engines_dir(&self) -> PathBuf {
        self.root.join("engines")
    }

    fn section_path(&self, section: &str) -> PathBuf {
        self.app_dir().join(format!("{section}.json"))
    }

    /// Re-read every section from disk. Missing or malformed files leave
    /// that section at its defaults.
    pub fn reload(&self) {
        let mut config = AppConfig::default();
        for &section in AppConfig::SECTIONS {
            let path = self.section_path(section);
            if !path.exists() {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok());
            let Some(value) = parsed else {
                warn!(section, path = %path.display(), "malformed config section, using defaults");
                continue;
            };
            match section {
                "main" => apply_section(&mut config.main, value, section),
                "ui" => apply_section(&mut config.ui, value, section),
                "files" => apply_section(&mut config.files, value, section),
                "performance" => apply_section(&mut config.performance, value, section),
                "preferences" => apply_section(&mut config.preferences, value, section),
                _ => {}
            }
        }
        *self.state.write() = config;
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> AppConfig {
        self.state.read().clone()
    }

    /// Validate, persist, and apply a full configuration.
    pub fn update(&self, config: AppConfig) -> Result<()> {
        let (ok, errors) = config.validate();
        if !ok {
            return Err(RecitoError::Config(errors.join("; ")));
        }
        self.save(&config)?;
        *self.state.write() = config;
        self.notify("app");
        Ok(())
    }

    /// Persist every section, one file each, atomically.
    fn save(&self, config: &AppConfig) -> Result<()> {
        write_json_atomic(&self.section_path("main"), &with_timestamp(&config.main)?)?;
        write_json_atomic(&self.section_path("ui"), &with_timestamp(&config.ui)?)?;
        write_json_atomic(&self.section_path("files"), &with_timestamp(&config.files)?)?;
        write_json_atomic(
            &self.section_path("performance"),
            &with_timestamp(&config.performance)?,
        )?;
        write_json_atomic(
            &self.section_path("preferences"),
            &with_timestamp(&config.preferences)?,
        )?;
        info!(root = %self.root.display(), "app config saved");
        Ok(())
    }

    pub fn on_change(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    fn notify(&self, what: &str) {
        let listeners = self.listeners.read();
        for listener in listeners.iter() {
            listener(what);
        }
    }
}

/// Deserialize a section value over the defaults; on failure keep defaults.
fn apply_section<T: serde::de::DeserializeOwned>(
    slot: &mut T,
    value: serde_json::Value,
    section: &str,
) {
    match serde_json::from_value::<T>(value) {
        Ok(parsed) => *slot = parsed,
        Err(e) => warn!(section, error = %e, "config section rejected, using defaults"),
    }
}

/// Stamp `updatedAt` onto a section's JSON on save.
fn with_timestamp<T: Serialize>(section: &T) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(section)
        .map_err(|e| RecitoError::Config(format!("serialize section: {e}")))?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "updatedAt".into(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_root_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        assert_eq!(registry.config(), AppConfig::default());
    }

    #[test]
    fn update_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("configs");
        {
            let registry = ConfigRegistry::open(&root);
            let mut config = registry.config();
            config.main.theme = "dark".into();
            config.performance.max_concurrent_tasks = 4;
            registry.update(config).expect("update");
        }
        let reopened = ConfigRegistry::open(&root);
        assert_eq!(reopened.config().main.theme, "dark");
        assert_eq!(reopened.config().performance.max_concurrent_tasks, 4);
    }

    #[test]
    fn invalid_update_is_rejected_and_not_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        let mut config = registry.config();
        config.performance.max_concurrent_tasks = 99;
        let err = registry.update(config).unwrap_err();
        assert!(matches!(err, RecitoError::Config(_)));
        assert_eq!(registry.config().performance.max_concurrent_tasks, 1);
    }

    #[test]
    fn malformed_section_file_reverts_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("configs");
        fs::create_dir_all(root.join("app")).expect("mkdir");
        fs::write(root.join("app").join("main.json"), "{not json").expect("write");
        let registry = ConfigRegistry::open(&root);
        assert_eq!(registry.config().main, sections::MainConfig::default());
    }

    #[test]
    fn listeners_fire_on_update() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        registry.on_change(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.update(registry.config()).expect("update");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_stray_tmp_files_after_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("configs");
        let registry = ConfigRegistry::open(&root);
        registry.update(registry.config()).expect("update");
        let stray: Vec<_> = fs::read_dir(root.join("app"))
            .expect("read dir")
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(stray.is_empty());
    }
}
