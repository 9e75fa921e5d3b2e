//! Batch scheduler: task list, FIFO queue, worker threads, lifecycle events.
//!
//! ## Threading
//!
//! Workers are plain blocking threads (default one) popping task ids from a
//! crossbeam channel with a bounded wait, so `stop_processing` is observed
//! within one poll interval. All shared state lives behind atomics and
//! `parking_lot` locks in `SchedulerShared`; events go out over a
//! `tokio::sync::broadcast` channel and are always emitted after internal
//! locks are released.

pub mod estimate;
pub mod pipeline;
pub mod session;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::post::PostProcessor;
use crate::audio::transcode::Transcoder;
use crate::config::{ChapterInfo, OutputConfig, VoiceConfig};
use crate::engine::registry::EngineRegistry;
use crate::error::{RecitoError, Result};
use crate::events::{BatchEvent, EVENT_CHANNEL_CAP};
use crate::task::{epoch_now, Task, TaskStatus};

/// How long a worker blocks on the queue before re-checking the run flag.
const QUEUE_POLL: Duration = Duration::from_millis(200);

/// How long a worker sleeps while the scheduler is paused.
const PAUSE_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub output_config: OutputConfig,
    pub transcoder: Transcoder,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            output_config: OutputConfig::default(),
            transcoder: Transcoder::default(),
        }
    }
}

/// State shared between the scheduler facade, workers, and pipelines.
pub(crate) struct SchedulerShared {
    tasks: Mutex<Vec<Arc<Mutex<Task>>>>,
    queue_tx: Sender<String>,
    queue_rx: Receiver<String>,
    is_running: AtomicBool,
    is_paused: AtomicBool,
    seq: AtomicU64,
    events: broadcast::Sender<BatchEvent>,
    pub(crate) registry: Arc<EngineRegistry>,
    output_config: RwLock<OutputConfig>,
    pub(crate) post: PostProcessor,
}

impl SchedulerShared {
    pub(crate) fn emit(&self, event: BatchEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn output_config(&self) -> OutputConfig {
        self.output_config.read().clone()
    }

    /// Mean progress across all tasks, 0..=100.
    pub(crate) fn overall_progress(&self) -> f64 {
        let tasks = self.tasks.lock();
        if tasks.is_empty() {
            return 0.0;
        }
        let total: u64 = tasks.iter().map(|t| u64::from(t.lock().progress)).sum();
        total as f64 / tasks.len() as f64
    }

    fn find(&self, task_id: &str) -> Option<Arc<Mutex<Task>>> {
        self.tasks
            .lock()
            .iter()
            .find(|t| t.lock().id == task_id)
            .cloned()
    }

    fn drain_queue(&self) {
        while self.queue_rx.try_recv().is_ok() {}
    }
}

/// Owns the task queue and worker threads; the single entry point for batch
/// conversion.
pub struct BatchScheduler {
    shared: Arc<SchedulerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl BatchScheduler {
    pub fn new(registry: Arc<EngineRegistry>, config: SchedulerConfig) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        let mut output_config = config.output_config;
        output_config.normalize_values();
        let shared = Arc::new(SchedulerShared {
            tasks: Mutex::new(Vec::new()),
            queue_tx,
            queue_rx,
            is_running: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            events,
            registry,
            output_config: RwLock::new(output_config),
            post: PostProcessor::new(config.transcoder),
        });
        Self {
            shared,
            workers: Mutex::new(Vec::new()),
            worker_count: config.worker_count.clamp(1, 16),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.shared.events.subscribe()
    }

    pub fn set_output_config(&self, mut config: OutputConfig) {
        config.normalize_values();
        *self.shared.output_config.write() = config;
    }

    pub fn output_config(&self) -> OutputConfig {
        self.shared.output_config()
    }

    /// Append a task and enqueue it. The voice config is deep-copied so later
    /// caller mutations cannot affect queued work.
    pub fn add_task(
        &self,
        file_path: impl Into<PathBuf>,
        voice_config: VoiceConfig,
        output_path: impl Into<PathBuf>,
    ) -> String {
        let file_path = file_path.into();
        let index = self.shared.tasks.lock().len();
        let chapter = ChapterInfo {
            number: (index + 1) as u32,
            title: file_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("segment {}", index + 1)),
            index,
            original_filename: file_path
                .file_name()
                .map(|s| s.to_string_lossy().to_string()),
        };
        self.add_chapter_task(file_path, voice_config, output_path, chapter)
    }

    /// `add_task` with an explicit chapter descriptor from the text extractor.
    pub fn add_chapter_task(
        &self,
        file_path: impl Into<PathBuf>,
        voice_config: VoiceConfig,
        output_path: impl Into<PathBuf>,
        chapter: ChapterInfo,
    ) -> String {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("task_{seq}_{}", epoch_now() as u64);
        let task = Task::new(
            id.clone(),
            file_path.into(),
            output_path.into(),
            voice_config,
            chapter,
        );
        self.shared.tasks.lock().push(Arc::new(Mutex::new(task)));
        let _ = self.shared.queue_tx.send(id.clone());
        debug!(task = %id, "task added");
        self.shared.emit(BatchEvent::TaskAdded { task_id: id.clone() });
        id
    }

    /// Remove a task. A Processing task is cancelled instead and stays in the
    /// list; the pipeline observes the cancellation at its next checkpoint.
    pub fn remove_task(&self, task_id: &str) -> bool {
        let Some(task) = self.shared.find(task_id) else {
            return false;
        };
        let cancelled_only = {
            let mut guard = task.lock();
            if guard.status == TaskStatus::Processing {
                guard.transition(TaskStatus::Cancelled);
                true
            } else {
                false
            }
        };
        if cancelled_only {
            self.shared.emit(BatchEvent::TaskCancelled {
                task_id: task_id.to_string(),
            });
            return true;
        }
        self.shared.tasks.lock().retain(|t| t.lock().id != task_id);
        // A Paused task may have a pipeline parked at a checkpoint; flip the
        // removed task to Cancelled so that worker stops waiting on a task
        // that is no longer listed.
        task.lock().transition(TaskStatus::Cancelled);
        self.shared.emit(BatchEvent::TaskRemoved {
            task_id: task_id.to_string(),
        });
        true
    }

    /// Replace a task's descriptor fields. Rejected while it is Processing.
    pub fn update_task(&self, task_id: &str, updated: Task) -> Result<()> {
        let task = self
            .shared
            .find(task_id)
            .ok_or_else(|| RecitoError::InvalidState(format!("unknown task '{task_id}'")))?;
        {
            let mut guard = task.lock();
            if guard.status == TaskStatus::Processing {
                return Err(RecitoError::InvalidState(
                    "cannot update a task while it is processing".into(),
                ));
            }
            guard.file_path = updated.file_path;
            guard.output_path = updated.output_path;
            guard.voice_config = updated.voice_config;
            guard.chapter = updated.chapter;
        }
        self.shared.emit(BatchEvent::TaskUpdated {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.shared.find(task_id).map(|t| t.lock().clone())
    }

    /// Snapshot of every task in insertion order.
    pub fn tasks(&self) -> Vec<Task> {
        self.shared
            .tasks
            .lock()
            .iter()
            .map(|t| t.lock().clone())
            .collect()
    }

    pub fn overall_progress(&self) -> f64 {
        self.shared.overall_progress()
    }

    /// Merge completed outputs into the configured merge file.
    pub fn merge_outputs(&self, inputs: &[PathBuf]) -> Result<PathBuf> {
        let config = self.shared.output_config();
        self.shared.post.merge(inputs, &config)
    }

    /// Start (or restart) batch processing.
    ///
    /// Returns `false` without side effects when any task is Processing or
    /// Paused. Otherwise clears the queue, re-enqueues every Pending, Failed,
    /// and Cancelled task in insertion order, and launches the workers.
    pub fn start_processing(&self) -> bool {
        {
            let tasks = self.shared.tasks.lock();
            let busy = tasks.iter().any(|t| {
                matches!(
                    t.lock().status,
                    TaskStatus::Processing | TaskStatus::Paused
                )
            });
            if busy {
                warn!("start rejected: a task is processing or paused");
                return false;
            }
        }

        self.shared.drain_queue();
        let requeued: Vec<String> = {
            let tasks = self.shared.tasks.lock();
            tasks
                .iter()
                .filter_map(|t| {
                    let mut guard = t.lock();
                    match guard.status {
                        TaskStatus::Pending => Some(guard.id.clone()),
                        TaskStatus::Failed | TaskStatus::Cancelled => {
                            guard.reset_for_retry();
                            Some(guard.id.clone())
                        }
                        _ => None,
                    }
                })
                .collect()
        };
        for id in &requeued {
            let _ = self.shared.queue_tx.send(id.clone());
        }
        info!(queued = requeued.len(), "batch processing started");

        self.shared.is_paused.store(false, Ordering::SeqCst);
        self.shared.is_running.store(true, Ordering::SeqCst);
        self.spawn_workers();
        true
    }

    /// Run exactly one task, same preconditions as `start_processing`.
    pub fn start_single_task(&self, task_id: &str) -> bool {
        let Some(task) = self.shared.find(task_id) else {
            return false;
        };
        {
            let tasks = self.shared.tasks.lock();
            if tasks.iter().any(|t| {
                matches!(
                    t.lock().status,
                    TaskStatus::Processing | TaskStatus::Paused
                )
            }) {
                return false;
            }
        }
        {
            let mut guard = task.lock();
            match guard.status {
                TaskStatus::Pending => {}
                TaskStatus::Failed | TaskStatus::Cancelled => guard.reset_for_retry(),
                _ => return false,
            }
        }
        self.shared.drain_queue();
        let _ = self.shared.queue_tx.send(task_id.to_string());
        self.shared.is_paused.store(false, Ordering::SeqCst);
        self.shared.is_running.store(true, Ordering::SeqCst);
        self.spawn_workers();
        true
    }

    pub fn pause_processing(&self) {
        self.shared.is_paused.store(true, Ordering::SeqCst);
        let paused: Vec<String> = {
            let tasks = self.shared.tasks.lock();
            tasks
                .iter()
                .filter_map(|task| {
                    let mut guard = task.lock();
                    (guard.status == TaskStatus::Processing
                        && guard.transition(TaskStatus::Paused))
                    .then(|| guard.id.clone())
                })
                .collect()
        };
        for id in paused {
            self.shared.emit(BatchEvent::TaskPaused { task_id: id });
        }
        info!("batch processing paused");
    }

    pub fn resume_processing(&self) {
        let resumed: Vec<String> = {
            let tasks = self.shared.tasks.lock();
            tasks
                .iter()
                .filter_map(|task| {
                    let mut guard = task.lock();
                    (guard.status == TaskStatus::Paused
                        && guard.transition(TaskStatus::Processing))
                    .then(|| guard.id.clone())
                })
                .collect()
        };
        for id in resumed {
            self.shared.emit(BatchEvent::TaskResumed { task_id: id });
        }
        self.shared.is_paused.store(false, Ordering::SeqCst);
        info!("batch processing resumed");
    }

    /// Pause one Processing task at its next pipeline checkpoint.
    pub fn pause_single_task(&self, task_id: &str) -> bool {
        let Some(task) = self.shared.find(task_id) else {
            return false;
        };
        let paused = task.lock().transition(TaskStatus::Paused);
        if paused {
            self.shared.emit(BatchEvent::TaskPaused {
                task_id: task_id.to_string(),
            });
        }
        paused
    }

    pub fn resume_single_task(&self, task_id: &str) -> bool {
        let Some(task) = self.shared.find(task_id) else {
            return false;
        };
        let resumed = {
            let mut guard = task.lock();
            guard.status == TaskStatus::Paused && guard.transition(TaskStatus::Processing)
        };
        if resumed {
            self.shared.emit(BatchEvent::TaskResumed {
                task_id: task_id.to_string(),
            });
        }
        resumed
    }

    /// Cancel one task (Pending, Processing, or Paused).
    pub fn stop_single_task(&self, task_id: &str) -> bool {
        let Some(task) = self.shared.find(task_id) else {
            return false;
        };
        let cancelled = task.lock().transition(TaskStatus::Cancelled);
        if cancelled {
            self.shared.emit(BatchEvent::TaskCancelled {
                task_id: task_id.to_string(),
            });
        }
        cancelled
    }

    /// Stop the batch: pending tasks become Cancelled, the in-flight task
    /// runs to completion or natural cancellation, workers wind down.
    pub fn stop_processing(&self) {
        self.shared.is_running.store(false, Ordering::SeqCst);
        self.shared.is_paused.store(false, Ordering::SeqCst);
        self.shared.drain_queue();
        let cancelled: Vec<String> = {
            let tasks = self.shared.tasks.lock();
            tasks
                .iter()
                .filter_map(|t| {
                    let mut guard = t.lock();
                    if guard.status == TaskStatus::Pending {
                        guard.transition(TaskStatus::Cancelled);
                        Some(guard.id.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        for id in cancelled {
            self.shared.emit(BatchEvent::TaskCancelled { task_id: id });
        }
        info!("batch processing stopped");
    }

    /// Stop and join the worker threads.
    pub fn shutdown(&self) {
        self.stop_processing();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused.load(Ordering::SeqCst)
    }

    fn spawn_workers(&self) {
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        while workers.len() < self.worker_count {
            let shared = self.shared.clone();
            let index = workers.len();
            workers.push(std::thread::spawn(move || worker_loop(shared, index)));
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.shared.is_running.store(false, Ordering::SeqCst);
    }
}

fn worker_loop(shared: Arc<SchedulerShared>, index: usize) {
    debug!(worker = index, "worker started");
    while shared.is_running.load(Ordering::SeqCst) {
        if shared.is_paused.load(Ordering::SeqCst) {
            std::thread::sleep(PAUSE_SLEEP);
            continue;
        }
        let Ok(task_id) = shared.queue_rx.recv_timeout(QUEUE_POLL) else {
            continue;
        };
        let Some(task) = shared.find(&task_id) else {
            continue;
        };
        let status = task.lock().status;
        if status != TaskStatus::Pending {
            debug!(task = %task_id, ?status, "skipping non-pending task");
            continue;
        }
        pipeline::run_task(&shared, &task);
    }
    debug!(worker = index, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::EngineRegistry;
    use crate::engine::EngineHandle;
    use crate::engines::stub::StubEngine;

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
    fn task_ids_are_unique_and_sequenced() {
        let scheduler = scheduler();
        let a = scheduler.add_task("a.txt", stub_voice(), "");
        let b = scheduler.add_task("b.txt", stub_voice(), "");
        assert_ne!(a, b);
        assert!(a.starts_with("task_1_"));
        assert!(b.starts_with("task_2_"));
        assert_eq!(scheduler.tasks().len(), 2);
    }

    #[test]
    fn removing_pending_task_deletes_it() {
        let scheduler = scheduler();
        let id = scheduler.add_task("a.txt", stub_voice(), "");
        assert!(scheduler.remove_task(&id));
        assert!(scheduler.tasks().is_empty());
    }

    #[test]
    fn removing_processing_task_cancels_in_place() {
        let scheduler = scheduler();
        let id = scheduler.add_task("a.txt", stub_voice(), "");
        scheduler
            .shared
            .find(&id)
            .unwrap()
            .lock()
            .transition(TaskStatus::Processing);
        assert!(scheduler.remove_task(&id));
        let task = scheduler.task(&id).expect("still listed");
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn removing_paused_task_deletes_it() {
        let scheduler = scheduler();
        let id = scheduler.add_task("a.txt", stub_voice(), "");
        let arc = scheduler.shared.find(&id).unwrap();
        arc.lock().transition(TaskStatus::Processing);
        arc.lock().transition(TaskStatus::Paused);
        assert!(scheduler.remove_task(&id));
        assert!(scheduler.task(&id).is_none());
        assert!(scheduler.tasks().is_empty());
        // The removed task is cancelled so a parked pipeline lets go of it.
        assert_eq!(arc.lock().status, TaskStatus::Cancelled);
    }

    #[test]
    fn update_rejected_while_processing() {
        let scheduler = scheduler();
        let id = scheduler.add_task("a.txt", stub_voice(), "");
        let arc = scheduler.shared.find(&id).unwrap();
        arc.lock().transition(TaskStatus::Processing);
        let replacement = scheduler.task(&id).unwrap();
        let err = scheduler.update_task(&id, replacement).unwrap_err();
        assert!(matches!(err, RecitoError::InvalidState(_)));
    }

    #[test]
    fn start_rejected_while_any_task_is_paused() {
        let scheduler = scheduler();
        let id = scheduler.add_task("a.txt", stub_voice(), "");
        let arc = scheduler.shared.find(&id).unwrap();
        arc.lock().transition(TaskStatus::Processing);
        arc.lock().transition(TaskStatus::Paused);
        assert!(!scheduler.start_processing());
        assert_eq!(scheduler.task(&id).unwrap().status, TaskStatus::Paused);
    }

    #[test]
    fn stop_cancels_pending_tasks() {
        let scheduler = scheduler();
        let a = scheduler.add_task("a.txt", stub_voice(), "");
        let b = scheduler.add_task("b.txt", stub_voice(), "");
        scheduler.stop_processing();
        assert_eq!(scheduler.task(&a).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(scheduler.task(&b).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn overall_progress_is_mean_of_task_progress() {
        let scheduler = scheduler();
        let a = scheduler.add_task("a.txt", stub_voice(), "");
        let _b = scheduler.add_task("b.txt", stub_voice(), "");
        scheduler.shared.find(&a).unwrap().lock().progress = 50;
        assert!((scheduler.overall_progress() - 25.0).abs() < 1e-9);
    }
}
