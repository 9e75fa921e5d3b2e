//! Named configuration templates.
//!
//! A template is a full `AppConfig` snapshot plus metadata, stored under
//! `configs/templates/<name>.json`. Two built-ins always exist: `default`
//! (factory settings) and `performance` (multi-worker, bigger caches).

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RecitoError, Result};
use crate::registry::sections::AppConfig;
use crate::registry::{write_json_atomic, ConfigRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTemplate {
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub config: AppConfig,
}

fn builtin_default() -> ConfigTemplate {
    ConfigTemplate {
        name: "default".into(),
        description: "Factory settings".into(),
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        config: AppConfig::default(),
    }
}

fn builtin_performance() -> ConfigTemplate {
    let mut config = AppConfig::default();
    config.performance.max_concurrent_tasks = 4;
    config.performance.cache_duration_s = 21_600;
    config.performance.memory_limit_mb = 4096;
    ConfigTemplate {
        name: "performance".into(),
        description: "Multi-worker batch conversion".into(),
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        config,
    }
}

impl ConfigRegistry {
    fn templates_dir(&self) -> PathBuf {
        self.root().join("templates")
    }

    /// Built-ins plus on-disk templates; a disk template shadows a built-in
    /// of the same name.
    pub fn list_templates(&self) -> Vec<ConfigTemplate> {
        let mut templates = vec![builtin_default(), builtin_performance()];
        if let Ok(entries) = fs::read_dir(self.templates_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let parsed: Option<ConfigTemplate> = fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| serde_json::from_str(&raw).ok());
                if let Some(template) = parsed {
                    templates.retain(|t| t.name != template.name);
                    templates.push(template);
                }
            }
        }
        templates
    }

    pub fn template(&self, name: &str) -> Option<ConfigTemplate> {
        self.list_templates().into_iter().find(|t| t.name == name)
    }

    /// Save the current configuration as a named template.
    pub fn save_template(&self, name: &str, description: &str) -> Result<ConfigTemplate> {
        if name.trim().is_empty() {
            return Err(RecitoError::Config("template name must not be empty".into()));
        }
        let template = ConfigTemplate {
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
            config: self.config(),
        };
        let path = self.templates_dir().join(format!("{name}.json"));
        write_json_atomic(&path, &template)?;
        info!(template = name, "config template saved");
        Ok(template)
    }

    /// Copy a template's sections over the live config and persist.
    pub fn apply_template(&self, name: &str) -> Result<()> {
        let template = self
            .template(name)
            .ok_or_else(|| RecitoError::Config(format!("unknown template '{name}'")))?;
        self.update(template.config)?;
        info!(template = name, "config template applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_always_listed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        let names: Vec<String> = registry.list_templates().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"default".to_string()));
        assert!(names.contains(&"performance".to_string()));
    }

    #[test]
    fn apply_performance_template_changes_live_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        registry.apply_template("performance").expect("apply");
        assert_eq!(registry.config().performance.max_concurrent_tasks, 4);
    }

    #[test]
    fn saved_template_round_trips_and_shadows_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        let mut config = registry.config();
        config.main.theme = "dark".into();
        registry.update(config).expect("update");
        registry.save_template("default", "my defaults").expect("save");

        let template = registry.template("default").expect("template");
        assert_eq!(template.config.main.theme, "dark");
        assert_eq!(template.description, "my defaults");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        assert!(registry.apply_template("nope").is_err());
    }
}
