//! v1 → v2 configuration migration.
//!
//! v1 stored everything in one flat `config.json`. v2 splits sections into
//! separate files with renamed keys. The remap table below is the only
//! migration defined; it is deterministic and idempotent (running it on an
//! already-migrated tree is a no-op because the v1 file is renamed away).

use std::fs;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{RecitoError, Result};
use crate::registry::sections::AppConfig;
use crate::registry::ConfigRegistry;

/// `(v1 key, v2 section, v2 key)`.
const KEY_REMAP: &[(&str, &str, &str)] = &[
    ("app_name", "main", "appName"),
    ("version", "main", "version"),
    ("theme", "main", "theme"),
    ("ui_language", "main", "language"),
    ("auto_save", "main", "autoSave"),
    ("window_width", "ui", "windowWidth"),
    ("window_height", "ui", "windowHeight"),
    ("font_size", "ui", "fontSize"),
    ("minimize_to_tray", "ui", "showTray"),
    ("max_file_size", "files", "maxFileSizeMb"),
    ("output_directory", "files", "defaultOutputDir"),
    ("recent_files", "files", "recentFiles"),
    ("max_tasks", "performance", "maxConcurrentTasks"),
    ("cache_seconds", "performance", "cacheDurationS"),
    ("memory_limit", "performance", "memoryLimitMb"),
    ("default_engine", "preferences", "defaultEngine"),
    ("default_voice", "preferences", "defaultVoice"),
    ("audio_format", "preferences", "defaultFormat"),
    ("subtitles_enabled", "preferences", "generateSubtitle"),
];

/// Apply the remap table to a raw v1 document, yielding a v2 `AppConfig`
/// with defaults for everything the v1 file did not carry.
pub fn migrate_v1_document(v1: &Value) -> Result<AppConfig> {
    let v1_map = v1
        .as_object()
        .ok_or_else(|| RecitoError::Config("v1 config is not a JSON object".into()))?;

    let mut sections = serde_json::to_value(AppConfig::default())
        .map_err(|e| RecitoError::Config(format!("serialize defaults: {e}")))?;

    for (old_key, section, new_key) in KEY_REMAP {
        let Some(value) = v1_map.get(*old_key) else {
            continue;
        };
        if let Some(section_map) = sections
            .get_mut(*section)
            .and_then(|s| s.as_object_mut())
        {
            section_map.insert((*new_key).into(), value.clone());
        }
    }

    serde_json::from_value(sections)
        .map_err(|e| RecitoError::Config(format!("migrated config invalid: {e}")))
}

impl ConfigRegistry {
    /// Migrate a v1 `config.json` at the registry root, if present. The v1
    /// file is kept as `config.json.v1` so the migration never re-runs.
    /// Returns `true` when a migration happened.
    pub fn migrate_v1(&self) -> Result<bool> {
        let v1_path = self.root().join("config.json");
        if !v1_path.exists() {
            return Ok(false);
        }
        let raw = fs::read_to_string(&v1_path)?;
        let v1: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "v1 config unreadable, leaving it in place");
                return Err(RecitoError::Config(format!("v1 config unreadable: {e}")));
            }
        };
        let migrated = migrate_v1_document(&v1)?;
        let (ok, errors) = migrated.validate();
        if !ok {
            return Err(RecitoError::Config(format!(
                "migrated config failed validation: {}",
                errors.join("; ")
            )));
        }
        self.update(migrated)?;
        fs::rename(&v1_path, v1_path.with_extension("json.v1"))?;
        info!("migrated v1 config to v2 layout");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_moves_flat_keys_into_sections() {
        let v1 = serde_json::json!({
            "theme": "dark",
            "ui_language": "en",
            "max_tasks": 3,
            "cache_seconds": 7200,
            "output_directory": "/tmp/audio",
            "default_engine": "local_model",
            "unknown_key": "ignored"
        });
        let migrated = migrate_v1_document(&v1).expect("migrate");
        assert_eq!(migrated.main.theme, "dark");
        assert_eq!(migrated.main.language, "en");
        assert_eq!(migrated.performance.max_concurrent_tasks, 3);
        assert_eq!(migrated.performance.cache_duration_s, 7200);
        assert_eq!(
            migrated.files.default_output_dir,
            std::path::PathBuf::from("/tmp/audio")
        );
        assert_eq!(migrated.preferences.default_engine, "local_model");
        // Untouched sections keep defaults.
        assert_eq!(migrated.ui.window_width, 1280);
    }

    #[test]
    fn migration_is_deterministic() {
        let v1 = serde_json::json!({ "theme": "light", "max_tasks": 2 });
        let a = migrate_v1_document(&v1).expect("migrate");
        let b = migrate_v1_document(&v1).expect("migrate");
        assert_eq!(a, b);
    }

    #[test]
    fn end_to_end_migration_renames_v1_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("configs");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(
            root.join("config.json"),
            r#"{"theme":"dark","max_tasks":2}"#,
        )
        .expect("write v1");

        let registry = ConfigRegistry::open(&root);
        assert!(registry.migrate_v1().expect("migrate"));
        assert_eq!(registry.config().main.theme, "dark");
        assert!(!root.join("config.json").exists());
        assert!(root.join("config.json.v1").exists());

        // Second run is a no-op.
        assert!(!registry.migrate_v1().expect("second run"));
    }

    #[test]
    fn non_object_v1_document_is_rejected() {
        let err = migrate_v1_document(&serde_json::json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, RecitoError::Config(_)));
    }
}
