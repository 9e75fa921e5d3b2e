//! Task-list session files: export the batch, re-import it later.
//!
//! Wire schema (snake_case, matching the GUI's session files):
//!
//! ```json
//! {
//!   "metadata": { "version": "1.0", "created_at": "...", "total_tasks": 2, "description": "..." },
//!   "tasks": [ { "id": "...", "file_path": "...", "status": "pending", ...,
//!                "voice_config": { "engine": "...", "voice_name": "...", ... } } ]
//! }
//! ```
//!
//! Import accepts only tasks whose status is pending, failed, or cancelled;
//! everything else is skipped and reported.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::BatchScheduler;
use crate::config::VoiceConfig;
use crate::error::{RecitoError, Result};
use crate::task::{Task, TaskStatus};

const SESSION_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub total_tasks: usize,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionVoiceConfig {
    pub engine: String,
    pub voice_name: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub language: String,
    pub output_format: String,
    #[serde(default)]
    pub extra_params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionTask {
    pub id: String,
    pub file_path: String,
    pub output_path: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    pub voice_config: SessionVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionFile {
    pub metadata: SessionMetadata,
    pub tasks: Vec<SessionTask>,
}

/// Outcome of an import: ids added, plus skipped entries with reasons.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

fn to_session_task(task: &Task) -> SessionTask {
    SessionTask {
        id: task.id.clone(),
        file_path: task.file_path.display().to_string(),
        output_path: task.output_path.display().to_string(),
        status: task.status,
        progress: task.progress,
        error_message: task.error_message.clone(),
        start_time: task.start_time,
        end_time: task.end_time,
        voice_config: SessionVoiceConfig {
            engine: task.voice_config.engine_id.clone(),
            voice_name: task.voice_config.voice_name.clone(),
            rate: task.voice_config.rate,
            pitch: task.voice_config.pitch,
            volume: task.voice_config.volume,
            language: task.voice_config.language.clone(),
            output_format: task.voice_config.output_format.extension().to_string(),
            extra_params: task
                .voice_config
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        },
    }
}

fn to_voice_config(session: &SessionVoiceConfig) -> VoiceConfig {
    VoiceConfig {
        engine_id: session.engine.clone(),
        voice_name: session.voice_name.clone(),
        rate: session.rate,
        pitch: session.pitch,
        volume: session.volume,
        language: session.language.clone(),
        output_format: crate::audio::AudioFormat::parse(&session.output_format),
        emotion: String::new(),
        extra: session
            .extra_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

impl BatchScheduler {
    /// Write the current task list to `path`.
    pub fn export_tasks(&self, path: &Path, description: &str) -> Result<()> {
        let tasks = self.tasks();
        let file = SessionFile {
            metadata: SessionMetadata {
                version: SESSION_VERSION.into(),
                created_at: Utc::now(),
                total_tasks: tasks.len(),
                description: description.into(),
            },
            tasks: tasks.iter().map(to_session_task).collect(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| RecitoError::Config(format!("serialize session: {e}")))?;
        fs::write(path, json)?;
        info!(path = %path.display(), tasks = file.tasks.len(), "session exported");
        Ok(())
    }

    /// Load a session file, appending its re-runnable tasks as fresh Pending
    /// work. Completed/processing entries are skipped with a reason.
    pub fn import_tasks(&self, path: &Path) -> Result<ImportReport> {
        let raw = fs::read_to_string(path)?;
        let file: SessionFile = serde_json::from_str(&raw)
            .map_err(|e| RecitoError::Config(format!("parse session: {e}")))?;

        let mut report = ImportReport::default();
        for entry in &file.tasks {
            match entry.status {
                TaskStatus::Pending | TaskStatus::Failed | TaskStatus::Cancelled => {
                    let id = self.add_task(
                        entry.file_path.clone(),
                        to_voice_config(&entry.voice_config),
                        entry.output_path.clone(),
                    );
                    report.imported.push(id);
                }
                other => {
                    report
                        .skipped
                        .push((entry.id.clone(), format!("status {other:?} is not re-runnable")));
                }
            }
        }
        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            "session imported"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SchedulerConfig;
    use crate::engine::registry::EngineRegistry;
    use crate::engine::EngineHandle;
    use crate::engines::stub::StubEngine;
    use std::sync::Arc;

    fn scheduler() -> BatchScheduler {
        let registry = Arc::new(EngineRegistry::new());
        registry.register(EngineHandle::new(StubEngine::new()), 50);
        BatchScheduler::new(registry, SchedulerConfig::default())
    }

    fn stub_voice() -> VoiceConfig {
        VoiceConfig {
            engine_id: "stub".into(),
            voice_name: "stub-voice".into(),
            ..VoiceConfig::default()
        }
    }

    #[test]
    fn export_then_import_round_trips_pending_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        let source = scheduler();
        source.add_task("one.txt", stub_voice(), "");
        source.add_task("two.txt", stub_voice(), "");
        source.export_tasks(&path, "smoke batch").expect("export");

        let target = scheduler();
        let report = target.import_tasks(&path).expect("import");
        assert_eq!(report.imported.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(target.tasks().len(), 2);
        assert!(target.tasks().iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn import_skips_completed_and_processing_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        let file = SessionFile {
            metadata: SessionMetadata {
                version: SESSION_VERSION.into(),
                created_at: Utc::now(),
                total_tasks: 3,
                description: String::new(),
            },
            tasks: vec![
                SessionTask {
                    id: "t1".into(),
                    file_path: "a.txt".into(),
                    output_path: "".into(),
                    status: TaskStatus::Completed,
                    progress: 100,
                    error_message: None,
                    start_time: Some(1.0),
                    end_time: Some(2.0),
                    voice_config: SessionVoiceConfig {
                        engine: "stub".into(),
                        voice_name: "stub-voice".into(),
                        rate: 1.0,
                        pitch: 0.0,
                        volume: 1.0,
                        language: "zh-CN".into(),
                        output_format: "wav".into(),
                        extra_params: serde_json::Map::new(),
                    },
                },
                SessionTask {
                    id: "t2".into(),
                    file_path: "b.txt".into(),
                    output_path: "".into(),
                    status: TaskStatus::Failed,
                    progress: 40,
                    error_message: Some("synthesis failed: x".into()),
                    start_time: None,
                    end_time: None,
                    voice_config: SessionVoiceConfig {
                        engine: "stub".into(),
                        voice_name: "stub-voice".into(),
                        rate: 1.2,
                        pitch: 0.0,
                        volume: 1.0,
                        language: "zh-CN".into(),
                        output_format: "mp3".into(),
                        extra_params: serde_json::Map::new(),
                    },
                },
            ],
        };
        fs::write(&path, serde_json::to_string(&file).unwrap()).expect("write session");

        let target = scheduler();
        let report = target.import_tasks(&path).expect("import");
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "t1");

        let imported = target.tasks();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].voice_config.output_format.extension(), "mp3");
        assert!((imported[0].voice_config.rate - 1.2).abs() < 1e-6);
    }
}
