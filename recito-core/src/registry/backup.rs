//! Config backups: copy the live tree aside, keep an index, prune by count
//! and age.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RecitoError, Result};
use crate::registry::{write_json_atomic, ConfigRegistry};

/// Most recent backups kept before the oldest is dropped.
pub const DEFAULT_MAX_BACKUPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupScope {
    App,
    Engine,
    All,
}

impl BackupScope {
    fn includes_app(self) -> bool {
        matches!(self, Self::App | Self::All)
    }

    fn includes_engines(self) -> bool {
        matches!(self, Self::Engine | Self::All)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub backup_id: String,
    pub config_type: BackupScope,
    pub description: String,
    pub auto_backup: bool,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub total_size: u64,
}

type BackupIndex = BTreeMap<String, BackupRecord>;

fn copy_tree(from: &Path, to: &Path) -> Result<(usize, u64)> {
    let mut files = 0usize;
    let mut bytes = 0u64;
    if !from.exists() {
        return Ok((0, 0));
    }
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            let (f, b) = copy_tree(&source, &target)?;
            files += f;
            bytes += b;
        } else {
            fs::copy(&source, &target)?;
            files += 1;
            bytes += fs::metadata(&target)?.len();
        }
    }
    Ok((files, bytes))
}

impl ConfigRegistry {
    fn backups_dir(&self) -> PathBuf {
        self.root().join("backups")
    }

    fn index_path(&self) -> PathBuf {
        self.backups_dir().join("backup_index.json")
    }

    fn read_index(&self) -> BackupIndex {
        fs::read_to_string(self.index_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write_index(&self, index: &BackupIndex) -> Result<()> {
        write_json_atomic(&self.index_path(), index)
    }

    /// Copy the live config tree into `backups/<id>/` and index it. The
    /// oldest backups beyond `max_backups` are deleted.
    pub fn create_backup(
        &self,
        scope: BackupScope,
        description: &str,
        auto_backup: bool,
        max_backups: usize,
    ) -> Result<BackupRecord> {
        static BACKUP_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let created_at = Utc::now();
        let seq = BACKUP_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let backup_id = format!("backup_{}_{seq:03}", created_at.format("%Y%m%d_%H%M%S"));
        let target_root = self.backups_dir().join(&backup_id);

        let mut file_count = 0usize;
        let mut total_size = 0u64;
        if scope.includes_app() {
            let (f, b) = copy_tree(&self.app_dir(), &target_root.join("app"))?;
            file_count += f;
            total_size += b;
        }
        if scope.includes_engines() {
            let (f, b) = copy_tree(&self.engines_dir(), &target_root.join("engines"))?;
            file_count += f;
            total_size += b;
        }

        let record = BackupRecord {
            backup_id: backup_id.clone(),
            config_type: scope,
            description: description.into(),
            auto_backup,
            created_at,
            file_count,
            total_size,
        };
        let mut index = self.read_index();
        index.insert(backup_id.clone(), record.clone());
        self.prune_to(&mut index, max_backups)?;
        self.write_index(&index)?;
        info!(backup = %backup_id, files = file_count, "config backup created");
        Ok(record)
    }

    pub fn list_backups(&self) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = self.read_index().into_values().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Overwrite the live config files from a backup and reload.
    pub fn restore_backup(&self, backup_id: &str) -> Result<()> {
        let index = self.read_index();
        let record = index
            .get(backup_id)
            .ok_or_else(|| RecitoError::Config(format!("unknown backup '{backup_id}'")))?;
        let source_root = self.backups_dir().join(backup_id);
        if !source_root.exists() {
            return Err(RecitoError::Config(format!(
                "backup tree missing for '{backup_id}'"
            )));
        }
        if record.config_type.includes_app() {
            copy_tree(&source_root.join("app"), &self.app_dir())?;
        }
        if record.config_type.includes_engines() {
            copy_tree(&source_root.join("engines"), &self.engines_dir())?;
        }
        self.reload();
        info!(backup = %backup_id, "config restored from backup");
        Ok(())
    }

    pub fn delete_backup(&self, backup_id: &str) -> Result<()> {
        let mut index = self.read_index();
        if index.remove(backup_id).is_none() {
            return Err(RecitoError::Config(format!("unknown backup '{backup_id}'")));
        }
        let tree = self.backups_dir().join(backup_id);
        if tree.exists() {
            fs::remove_dir_all(&tree)?;
        }
        self.write_index(&index)?;
        Ok(())
    }

    /// Delete backups older than `days`. Returns how many were removed.
    pub fn cleanup_backups_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut index = self.read_index();
        let stale: Vec<String> = index
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.backup_id.clone())
            .collect();
        for id in &stale {
            index.remove(id);
            let tree = self.backups_dir().join(id);
            if tree.exists() {
                if let Err(e) = fs::remove_dir_all(&tree) {
                    warn!(backup = %id, error = %e, "failed to delete stale backup tree");
                }
            }
        }
        self.write_index(&index)?;
        Ok(stale.len())
    }

    fn prune_to(&self, index: &mut BackupIndex, max_backups: usize) -> Result<()> {
        while index.len() > max_backups.max(1) {
            let oldest = index
                .values()
                .min_by_key(|r| r.created_at)
                .map(|r| r.backup_id.clone());
            let Some(id) = oldest else { break };
            index.remove(&id);
            let tree = self.backups_dir().join(&id);
            if tree.exists() {
                fs::remove_dir_all(&tree)?;
            }
            info!(backup = %id, "oldest backup pruned");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_config() -> (tempfile::TempDir, ConfigRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ConfigRegistry::open(dir.path().join("configs"));
        registry.update(registry.config()).expect("seed config files");
        (dir, registry)
    }

    #[test]
    fn backup_captures_files_and_indexes_them() {
        let (_dir, registry) = registry_with_config();
        let record = registry
            .create_backup(BackupScope::App, "before upgrade", false, DEFAULT_MAX_BACKUPS)
            .expect("backup");
        assert_eq!(record.file_count, 5);
        assert!(record.total_size > 0);
        let listed = registry.list_backups();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].backup_id, record.backup_id);
    }

    #[test]
    fn restore_round_trips_a_config_change() {
        let (_dir, registry) = registry_with_config();
        let record = registry
            .create_backup(BackupScope::App, "", true, DEFAULT_MAX_BACKUPS)
            .expect("backup");

        let mut config = registry.config();
        config.main.theme = "dark".into();
        registry.update(config).expect("update");
        assert_eq!(registry.config().main.theme, "dark");

        registry.restore_backup(&record.backup_id).expect("restore");
        assert_eq!(registry.config().main.theme, "system");
    }

    #[test]
    fn lru_prunes_oldest_backup() {
        let (_dir, registry) = registry_with_config();
        let first = registry
            .create_backup(BackupScope::App, "first", false, 2)
            .expect("backup");
        registry
            .create_backup(BackupScope::App, "second", false, 2)
            .expect("backup");
        registry
            .create_backup(BackupScope::App, "third", false, 2)
            .expect("backup");
        let listed = registry.list_backups();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.backup_id != first.backup_id));
    }

    #[test]
    fn unknown_backup_restore_is_an_error() {
        let (_dir, registry) = registry_with_config();
        assert!(registry.restore_backup("backup_nope").is_err());
    }

    #[test]
    fn age_cleanup_removes_stale_entries() {
        let (_dir, registry) = registry_with_config();
        let record = registry
            .create_backup(BackupScope::App, "", false, DEFAULT_MAX_BACKUPS)
            .expect("backup");
        // Rewrite the index with an ancient timestamp.
        let mut index = registry.read_index();
        index.get_mut(&record.backup_id).unwrap().created_at =
            Utc::now() - Duration::days(400);
        registry.write_index(&index).expect("write index");

        let removed = registry.cleanup_backups_older_than(30).expect("cleanup");
        assert_eq!(removed, 1);
        assert!(registry.list_backups().is_empty());
    }
}
