//! Blocking per-task pipeline.
//!
//! ## Stages (progress marks)
//!
//! ```text
//! 1.  5%  read input text
//! 2. 10%  normalize text
//! 3. 15%  preview synthesis (≤20 chars, wav) + duration estimate
//! 4. 20%  full synthesis, 2 s progress ticks up to 90%
//! 5. 90%  format adaptation + persistence (+ subtitle sidecar)
//! 6. 95%  preview cleanup
//! 7. 100% done
//! ```
//!
//! Cancellation is cooperative: a Cancelled status set from outside is
//! observed between stages and between progress ticks. An in-flight engine
//! call is never killed; its result is discarded on return. A Paused status
//! parks the pipeline at the next checkpoint until resumed or cancelled.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::batch::{estimate, SchedulerShared};
use crate::config::naming;
use crate::engine::EngineHandle;
use crate::error::RecitoError;
use crate::events::BatchEvent;
use crate::task::{Task, TaskStatus};

/// Interval between time-based progress updates.
const PROGRESS_TICK: Duration = Duration::from_secs(2);

/// How long a paused pipeline sleeps between status polls.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Fallback preview payload when the source text has no usable characters.
const PREVIEW_FALLBACK: &str = "preview test";

/// Why a pipeline run stopped early.
enum Abort {
    Cancelled,
    Failed(String),
}

impl From<RecitoError> for Abort {
    fn from(err: RecitoError) -> Self {
        Abort::Failed(err.to_string())
    }
}

type StageResult<T> = std::result::Result<T, Abort>;

/// Run one task to a terminal state. The caller (worker loop) has already
/// verified the task is runnable.
pub(crate) fn run_task(shared: &Arc<SchedulerShared>, task: &Arc<Mutex<Task>>) {
    let task_id = {
        let mut guard = task.lock();
        if !guard.transition(TaskStatus::Processing) {
            return;
        }
        guard.progress = 0;
        guard.id.clone()
    };
    shared.emit(BatchEvent::TaskStarted {
        task_id: task_id.clone(),
    });

    match execute(shared, task, &task_id) {
        Ok(()) => {
            task.lock().transition(TaskStatus::Completed);
            info!(task = %task_id, "task completed");
            shared.emit(BatchEvent::TaskCompleted {
                task_id: task_id.clone(),
            });
        }
        Err(Abort::Cancelled) => {
            // Status was already set to Cancelled from outside; make sure the
            // terminal bookkeeping ran even if the transition raced.
            let mut guard = task.lock();
            if guard.status != TaskStatus::Cancelled {
                guard.transition(TaskStatus::Cancelled);
            }
            drop(guard);
            info!(task = %task_id, "task cancelled");
            shared.emit(BatchEvent::TaskCancelled {
                task_id: task_id.clone(),
            });
        }
        Err(Abort::Failed(message)) => {
            {
                let mut guard = task.lock();
                guard.error_message = Some(message.clone());
                guard.transition(TaskStatus::Failed);
            }
            warn!(task = %task_id, error = %message, "task failed");
            shared.emit(BatchEvent::TaskFailed {
                task_id: task_id.clone(),
                error_message: message,
            });
        }
    }
    shared.emit(BatchEvent::OverallProgress {
        percentage: shared.overall_progress(),
    });
}

fn execute(
    shared: &Arc<SchedulerShared>,
    task: &Arc<Mutex<Task>>,
    task_id: &str,
) -> StageResult<()> {
    let output_config = shared.output_config();

    // Stage 1: load input.
    checkpoint(task)?;
    set_progress(shared, task, task_id, 5);
    let (file_path, voice_config) = {
        let guard = task.lock();
        (guard.file_path.clone(), guard.voice_config.clone())
    };
    let raw_text = std::fs::read_to_string(&file_path)
        .map_err(|e| Abort::Failed(format!("import_error: {}: {e}", file_path.display())))?;

    // Stage 2: normalize text. Segmentation lives in the text extractor; here
    // we only collapse line noise and reject empty input.
    checkpoint(task)?;
    set_progress(shared, task, task_id, 10);
    let text = normalize_text(&raw_text);
    if text.is_empty() {
        return Err(Abort::Failed("text_error: no synthesizable text".into()));
    }

    // Resolve the engine, falling back along the priority order when the
    // requested one is gone.
    let (engine, mapped_config) = resolve_engine(shared, &voice_config)?;
    let engine_kind = engine.0.lock().describe().kind;

    // Stage 3: preview synthesis calibrates the estimate.
    checkpoint(task)?;
    set_progress(shared, task, task_id, 15);
    let preview_text: String = {
        let picked: String = text.chars().filter(|c| !c.is_whitespace()).take(20).collect();
        if picked.is_empty() {
            PREVIEW_FALLBACK.into()
        } else {
            picked
        }
    };
    let mut preview_config = mapped_config.clone();
    preview_config.output_format = crate::audio::AudioFormat::Wav;

    let preview_started = Instant::now();
    let preview_result = engine.0.lock().synthesize(&preview_text, &preview_config);
    let t_preview = preview_started.elapsed().as_secs_f64();

    let preview_base = {
        let guard = task.lock();
        guard
            .output_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| task_id.to_string())
    };
    let preview_path = match preview_result {
        Ok(result) => {
            write_preview(&output_config.output_dir, &preview_base, &result.audio).unwrap_or(None)
        }
        Err(e) => {
            // A dead preview almost always means a dead full synthesis, but
            // the original pipeline pushes on and lets stage 4 decide.
            warn!(task = %task_id, error = %e, "preview synthesis failed");
            None
        }
    };

    let estimated = estimate::estimate_duration(engine_kind, &preview_text, t_preview, &text);
    {
        let mut guard = task.lock();
        guard.estimated_duration_s = Some(estimated);
        guard.estimated_remaining_s = Some(estimated);
    }
    debug!(task = %task_id, estimated_s = estimated, "duration estimated");

    // Stage 4: full synthesis under a progress ticker.
    checkpoint(task)?;
    set_progress(shared, task, task_id, 20);
    let synthesis_started = Instant::now();
    let ticker_stop = Arc::new(AtomicBool::new(false));
    let ticker = spawn_progress_ticker(
        shared.clone(),
        task.clone(),
        task_id.to_string(),
        estimated,
        ticker_stop.clone(),
    );

    let synthesis = engine.0.lock().synthesize(&text, &mapped_config);
    ticker_stop.store(true, Ordering::Relaxed);
    let _ = ticker.join();
    debug!(
        task = %task_id,
        elapsed_s = synthesis_started.elapsed().as_secs_f64(),
        "full synthesis returned"
    );

    // A cancellation that arrived mid-call discards the finished result.
    checkpoint(task)?;
    let result = synthesis.map_err(Abort::from)?;

    // Stage 5: format adaptation and persistence.
    set_progress(shared, task, task_id, 90);
    let output_path = resolve_output_path(task, &output_config);
    let mut produced = shared.post.persist(&result, &output_path, &output_config)?;
    if output_config.generate_subtitle {
        if let Some(srt) = result.srt_content.as_deref() {
            match shared.post.write_subtitle(srt, &output_path, &output_config) {
                Ok(sidecar) => produced.subtitle_path = Some(sidecar),
                Err(e) => warn!(task = %task_id, error = %e, "subtitle sidecar not written"),
            }
        }
    }
    {
        let mut guard = task.lock();
        guard.output_path = output_path.clone();
        guard.produced = Some(produced);
    }

    // Stage 6: preview cleanup, best effort.
    set_progress(shared, task, task_id, 95);
    if let Some(path) = preview_path {
        let _ = std::fs::remove_file(path);
    }

    Ok(())
}

/// Park on Paused, abort on Cancelled.
fn checkpoint(task: &Arc<Mutex<Task>>) -> StageResult<()> {
    loop {
        let status = task.lock().status;
        match status {
            TaskStatus::Cancelled => return Err(Abort::Cancelled),
            TaskStatus::Paused => std::thread::sleep(PAUSE_POLL),
            _ => return Ok(()),
        }
    }
}

fn set_progress(shared: &SchedulerShared, task: &Arc<Mutex<Task>>, task_id: &str, progress: u8) {
    let remaining = {
        let mut guard = task.lock();
        guard.progress = progress;
        guard.estimated_remaining_s.unwrap_or(0.0)
    };
    shared.emit(BatchEvent::TaskProgress {
        task_id: task_id.to_string(),
        progress,
        remaining_s: remaining,
    });
    shared.emit(BatchEvent::OverallProgress {
        percentage: shared.overall_progress(),
    });
}

/// Background loop driving the 20→90 % time-based curve.
fn spawn_progress_ticker(
    shared: Arc<SchedulerShared>,
    task: Arc<Mutex<Task>>,
    task_id: String,
    estimated_s: f64,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let started = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            // Tick in small slices so a stop request is observed promptly.
            let slice = Duration::from_millis(100);
            let mut slept = Duration::ZERO;
            while slept < PROGRESS_TICK && !stop.load(Ordering::Relaxed) {
                std::thread::sleep(slice);
                slept += slice;
            }
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let elapsed = started.elapsed().as_secs_f64();
            let progress = estimate::progress_for_elapsed(elapsed, estimated_s);
            let remaining = estimate::remaining_s(elapsed, estimated_s);
            {
                let mut guard = task.lock();
                if guard.status != TaskStatus::Processing {
                    break;
                }
                guard.progress = guard.progress.max(progress);
                guard.estimated_remaining_s = Some(remaining);
            }
            shared.emit(BatchEvent::TaskProgress {
                task_id: task_id.clone(),
                progress,
                remaining_s: remaining,
            });
            shared.emit(BatchEvent::OverallProgress {
                percentage: shared.overall_progress(),
            });
        }
    })
}

/// Resolve the configured engine, or the best fallback candidate when it is
/// unknown/unavailable. Returns the handle plus the validated (possibly
/// voice-rewritten) config.
fn resolve_engine(
    shared: &SchedulerShared,
    voice_config: &crate::config::VoiceConfig,
) -> StageResult<(EngineHandle, crate::config::VoiceConfig)> {
    let registry = &shared.registry;
    // A registered engine is used optimistically unless it was disabled or a
    // health probe marked it broken.
    let primary = registry.resolve(&voice_config.engine_id).filter(|_| {
        registry
            .entry(&voice_config.engine_id)
            .map(|entry| {
                entry.enabled
                    && entry.status.state != crate::engine::descriptor::EngineState::Error
            })
            .unwrap_or(true)
    });

    let (engine, mut config) = match primary {
        Some(handle) => (handle, voice_config.clone()),
        None => {
            let fallback_id = registry.fallback_engine(&voice_config.engine_id).ok_or_else(|| {
                Abort::Failed(format!(
                    "engine '{}' is unavailable and no fallback engine remains",
                    voice_config.engine_id
                ))
            })?;
            warn!(
                requested = %voice_config.engine_id,
                fallback = %fallback_id,
                "engine unavailable, using fallback"
            );
            let mut rewritten = voice_config.clone();
            rewritten.extra.insert(
                "sourceEngine".into(),
                serde_json::Value::String(voice_config.engine_id.clone()),
            );
            rewritten.engine_id = fallback_id.clone();
            (registry.resolve_required(&fallback_id).map_err(Abort::from)?, rewritten)
        }
    };

    config = engine.0.lock().validate(&config).map_err(Abort::from)?;
    Ok((engine, config))
}

/// Derive the final audio path when the task does not pin one.
fn resolve_output_path(task: &Arc<Mutex<Task>>, config: &crate::config::OutputConfig) -> PathBuf {
    let guard = task.lock();
    if guard.output_path.as_os_str().is_empty() || guard.output_path.is_dir() {
        let base = naming::generate_filename(
            &guard.chapter,
            config.naming_mode,
            &config.custom_template,
            config.name_length_limit,
        );
        naming::unique_path(&config.output_dir, &base, config.format.extension())
    } else {
        guard.output_path.clone()
    }
}

/// Stage-3 preview sidecar: `<output_dir>/<base>.tmp.wav`.
fn write_preview(
    output_dir: &std::path::Path,
    base: &str,
    audio: &[u8],
) -> std::io::Result<Option<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{base}.tmp.wav"));
    std::fs::write(&path, audio)?;
    Ok(Some(path))
}

fn normalize_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_normalization_trims_line_noise() {
        assert_eq!(normalize_text("  hello  \r\nworld  \n\n"), "hello\nworld");
        assert_eq!(normalize_text("   \n \n"), "");
    }

    #[test]
    fn preview_text_selection_skips_whitespace() {
        let text = "a b c d e f g h i j k l m n o p q r s t u v w";
        let preview: String = text.chars().filter(|c| !c.is_whitespace()).take(20).collect();
        assert_eq!(preview.chars().count(), 20);
        assert!(!preview.contains(' '));
    }
}
