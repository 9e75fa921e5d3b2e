//! Recito command-line host.
//!
//! Wires the SDK together the way the desktop shell would: config registry,
//! engine registry with all four adapter families, health check, scheduler,
//! and an event subscription rendered as console progress lines.

mod cli;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use recito_core::audio::transcode::Transcoder;
use recito_core::batch::{BatchScheduler, SchedulerConfig};
use recito_core::engines::http::{EmotionApiEngine, HttpEngineSettings};
use recito_core::engines::local::LocalModelEngine;
use recito_core::engines::online::OnlineVoiceEngine;
use recito_core::engines::system::SystemSpeechEngine;
use recito_core::{
    AudioFormat, BatchEvent, ConfigRegistry, EngineHandle, EngineRegistry, HealthMonitor,
    OutputConfig, SubtitleFormat, TaskStatus, VoiceConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigAction};

fn default_config_root() -> PathBuf {
    dirs::config_dir()
        .map(|base| base.join("recito").join("configs"))
        .unwrap_or_else(|| PathBuf::from("configs"))
}

fn build_engine_registry(config: &ConfigRegistry) -> Arc<EngineRegistry> {
    let registry = Arc::new(EngineRegistry::new());
    let root = config.root().to_path_buf();

    registry.register(
        EngineHandle::new(OnlineVoiceEngine::new(HttpEngineSettings::default()).with_config_root(&root)),
        80,
    );
    registry.register(
        EngineHandle::new(EmotionApiEngine::new(HttpEngineSettings::default()).with_config_root(&root)),
        60,
    );
    registry.register(
        EngineHandle::new(LocalModelEngine::new(root.join("models"))),
        40,
    );
    registry.register(EngineHandle::new(SystemSpeechEngine::new()), 20);

    registry.load(&config.engines_dir().join("registry.json"));
    registry
}

fn run_convert(config: &ConfigRegistry, args: cli::ConvertArgs) -> anyhow::Result<()> {
    let registry = build_engine_registry(config);
    let monitor = Arc::new(HealthMonitor::new(registry.clone()));
    monitor.run_once();

    let preferences = config.config().preferences;
    let engine_id = args.engine.unwrap_or(preferences.default_engine);
    let voice_name = args.voice.unwrap_or(preferences.default_voice);
    let format = AudioFormat::parse(
        args.format
            .map(|f| f.as_str().to_string())
            .unwrap_or(preferences.default_format)
            .as_str(),
    );

    let voice_config = VoiceConfig {
        engine_id,
        voice_name,
        rate: args.rate,
        output_format: format,
        ..VoiceConfig::default()
    };

    let output_config = OutputConfig {
        output_dir: args.output_dir.clone(),
        format,
        merge_files: args.merge,
        generate_subtitle: args.subtitles || preferences.generate_subtitle,
        subtitle_format: match preferences.subtitle_format.as_str() {
            "lrc" => SubtitleFormat::Lrc,
            "vtt" => SubtitleFormat::Vtt,
            "ass" => SubtitleFormat::Ass,
            "ssa" => SubtitleFormat::Ssa,
            _ => SubtitleFormat::Srt,
        },
        ..OutputConfig::default()
    };

    let scheduler = BatchScheduler::new(
        registry,
        SchedulerConfig {
            worker_count: args.workers,
            output_config,
            transcoder: Transcoder::default(),
        },
    );
    let mut events = scheduler.subscribe();

    let mut ids = Vec::new();
    for input in &args.inputs {
        let id = scheduler.add_task(input, voice_config.clone(), "");
        info!(task = %id, input = %input.display(), "task queued");
        ids.push(id);
    }
    anyhow::ensure!(scheduler.start_processing(), "scheduler refused to start");

    // Render events until every task reaches a terminal state. Polling keeps
    // the loop alive even if the broadcast channel drops progress bursts.
    let mut reported: HashSet<String> = HashSet::new();
    loop {
        loop {
            use tokio::sync::broadcast::error::TryRecvError;
            match events.try_recv() {
                Ok(BatchEvent::TaskProgress {
                    task_id,
                    progress,
                    remaining_s,
                }) => println!("[{task_id}] {progress:>3}%  (~{remaining_s:.0}s left)"),
                Ok(BatchEvent::TaskCompleted { task_id }) => {
                    let output = scheduler
                        .task(&task_id)
                        .and_then(|t| t.produced)
                        .map(|p| p.path.display().to_string())
                        .unwrap_or_default();
                    println!("[{task_id}] done: {output}");
                    reported.insert(task_id);
                }
                Ok(BatchEvent::TaskFailed {
                    task_id,
                    error_message,
                }) => {
                    eprintln!("[{task_id}] FAILED: {error_message}");
                    reported.insert(task_id);
                }
                Ok(BatchEvent::TaskCancelled { task_id }) => {
                    println!("[{task_id}] cancelled");
                    reported.insert(task_id);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        let tasks = scheduler.tasks();
        let all_terminal = ids.iter().all(|id| {
            tasks
                .iter()
                .find(|t| &t.id == id)
                .map(|t| t.status.is_terminal())
                .unwrap_or(true)
        });
        if all_terminal {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(150));
    }
    scheduler.shutdown();

    if args.merge {
        let produced: Vec<PathBuf> = scheduler
            .tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.produced.map(|p| p.path))
            .collect();
        if produced.len() > 1 {
            let merged = scheduler.merge_outputs(&produced)?;
            println!("merged: {}", merged.display());
        } else {
            warn!("merge requested but fewer than two outputs completed");
        }
    }

    let failed = scheduler
        .tasks()
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();
    anyhow::ensure!(failed == 0, "{failed} task(s) failed");
    Ok(())
}

fn run_engines(config: &ConfigRegistry) -> anyhow::Result<()> {
    let registry = build_engine_registry(config);
    let monitor = HealthMonitor::new(registry.clone());
    monitor.run_once();

    for entry in registry.entries() {
        println!(
            "{:<14} {:<24} priority={:<3} enabled={:<5} state={:?} voices={}",
            entry.info.id,
            entry.info.display_name,
            entry.priority,
            entry.enabled,
            entry.status.state,
            entry.status.available_voices.len()
        );
        if let Some(message) = &entry.status.error_message {
            println!("               └─ {message}");
        }
    }
    registry.save(&config.engines_dir().join("registry.json"))?;
    Ok(())
}

fn run_config(config: &ConfigRegistry, args: cli::ConfigArgs) -> anyhow::Result<()> {
    match args.action {
        ConfigAction::Show => {
            let json = serde_json::to_string_pretty(&config.config())?;
            println!("{json}");
        }
        ConfigAction::Validate => {
            let (ok, errors) = config.config().validate();
            if ok {
                println!("configuration is valid");
            } else {
                for error in &errors {
                    eprintln!("invalid: {error}");
                }
                anyhow::bail!("{} validation error(s)", errors.len());
            }
        }
        ConfigAction::Backup => {
            let record = config.create_backup(
                recito_core::registry::backup::BackupScope::All,
                "manual backup",
                false,
                recito_core::registry::backup::DEFAULT_MAX_BACKUPS,
            )?;
            println!("created {}", record.backup_id);
        }
        ConfigAction::Backups => {
            for record in config.list_backups() {
                println!(
                    "{}  {}  files={} size={}B  {}",
                    record.backup_id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.file_count,
                    record.total_size,
                    record.description
                );
            }
        }
        ConfigAction::Restore { backup_id } => {
            config.restore_backup(&backup_id)?;
            println!("restored {backup_id}");
        }
        ConfigAction::Template { name } => {
            config.apply_template(&name)?;
            println!("applied template '{name}'");
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let root = cli.config_root.clone().unwrap_or_else(default_config_root);
    let config = ConfigRegistry::open(&root);
    if config.migrate_v1().context("config migration")? {
        info!("migrated legacy configuration");
    }

    match cli.command {
        Command::Convert(args) => run_convert(&config, args),
        Command::Engines => run_engines(&config),
        Command::Config(args) => run_config(&config, args),
    }
}
