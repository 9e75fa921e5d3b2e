//! Engine and host health monitoring.
//!
//! A background thread sweeps every `interval` (default 30 s). The first
//! successful sweep of the engine-availability block latches
//! `engine_health_checked`; later sweeps only sample host resources until
//! `reset_engine_health_check` re-arms the engine block. Threshold crossings
//! produce `DiagnosticResult`s for the diagnostic subsystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::{debug, info, warn};

use crate::engine::descriptor::{EngineKind, EngineState, EngineStatus, PerformanceMetrics};
use crate::engine::registry::EngineRegistry;

/// Default sweep interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    pub affected_components: Vec<String>,
    pub auto_fixable: bool,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
}

pub struct HealthMonitor {
    registry: Arc<EngineRegistry>,
    interval: Duration,
    running: Arc<AtomicBool>,
    engine_health_checked: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    system: Arc<Mutex<System>>,
    last_sample: Arc<Mutex<ResourceSample>>,
    diagnostics: Arc<Mutex<Vec<DiagnosticResult>>>,
    error_count: Arc<Mutex<u32>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self::with_interval(registry, DEFAULT_INTERVAL)
    }

    pub fn with_interval(registry: Arc<EngineRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            engine_health_checked: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            system: Arc::new(Mutex::new(System::new())),
            last_sample: Arc::new(Mutex::new(ResourceSample::default())),
            diagnostics: Arc::new(Mutex::new(Vec::new())),
            error_count: Arc::new(Mutex::new(0)),
        }
    }

    /// One-shot startup check: probe every engine now, then sample the host.
    pub fn run_once(&self) {
        self.sweep_engines();
        self.sample_host();
        self.evaluate_diagnostics();
    }

    /// Start the periodic sweep thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = self.clone();
        let handle = std::thread::spawn(move || {
            info!("health monitor started");
            while monitor.running.load(Ordering::SeqCst) {
                let started = Instant::now();
                if !monitor.engine_health_checked.load(Ordering::SeqCst) {
                    let all_ok = monitor.sweep_engines();
                    if all_ok {
                        monitor.engine_health_checked.store(true, Ordering::SeqCst);
                        debug!("engine health block latched after clean sweep");
                    }
                }
                monitor.sample_host();
                monitor.evaluate_diagnostics();

                // Sleep in slices so stop() is observed quickly.
                while started.elapsed() < monitor.interval
                    && monitor.running.load(Ordering::SeqCst)
                {
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
            info!("health monitor stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Re-arm the engine availability block for the next sweep.
    pub fn reset_engine_health_check(&self) {
        self.engine_health_checked.store(false, Ordering::SeqCst);
    }

    pub fn engine_health_checked(&self) -> bool {
        self.engine_health_checked.load(Ordering::SeqCst)
    }

    pub fn last_sample(&self) -> ResourceSample {
        *self.last_sample.lock()
    }

    /// Diagnostics from the most recent evaluation, newest first.
    pub fn diagnostics(&self) -> Vec<DiagnosticResult> {
        self.diagnostics.lock().clone()
    }

    pub fn record_error(&self) {
        *self.error_count.lock() += 1;
    }

    /// Probe every registered engine; returns whether all probes succeeded.
    fn sweep_engines(&self) -> bool {
        let mut all_ok = true;
        for entry in self.registry.entries() {
            if !entry.enabled {
                continue;
            }
            let probe_started = Instant::now();
            let status = self.probe_engine(&entry.info.id, entry.info.kind);
            let latency = probe_started.elapsed().as_millis() as u64;

            let previous = entry.status.performance_metrics;
            let ok = status.state == EngineState::Available;
            if !ok {
                all_ok = false;
                *self.error_count.lock() += 1;
            }
            let metrics = PerformanceMetrics {
                probe_latency_ms: Some(latency),
                consecutive_failures: if ok { 0 } else { previous.consecutive_failures + 1 },
                error_count: previous.error_count + u32::from(!ok),
            };
            let mut status = status;
            status.performance_metrics = metrics;
            self.registry.set_status(&entry.info.id, status);
        }
        all_ok
    }

    /// Kind-specific reachability probe.
    fn probe_engine(&self, engine_id: &str, kind: EngineKind) -> EngineStatus {
        let Some(handle) = self.registry.resolve(engine_id) else {
            return EngineStatus::errored("no engine instance registered");
        };
        match kind {
            // HTTP engines answer a voice-list request; local and OS engines
            // are probed by instantiating/listing, which checks model files
            // and the speech object respectively.
            EngineKind::OnlineNeural | EngineKind::EmotionApi => {
                let mut engine = handle.0.lock();
                match engine.list_voices(None) {
                    Ok(voices) if !voices.is_empty() => EngineStatus::available(voices),
                    Ok(_) => EngineStatus::errored("service returned an empty voice list"),
                    Err(e) => {
                        warn!(engine = engine_id, error = %e, "engine probe failed");
                        EngineStatus::errored(e.to_string())
                    }
                }
            }
            EngineKind::LocalModel | EngineKind::SystemSpeech => {
                let mut engine = handle.0.lock();
                if let Err(e) = engine.init() {
                    return EngineStatus::errored(e.to_string());
                }
                let status = engine.status();
                if status.state == EngineState::Available {
                    status
                } else {
                    EngineStatus {
                        state: EngineState::Unavailable,
                        ..status
                    }
                }
            }
        }
    }

    fn sample_host(&self) {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu_percent = system.global_cpu_usage();
        let memory_percent = if system.total_memory() > 0 {
            (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
        } else {
            0.0
        };
        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space() - d.available_space();
                (used as f32 / d.total_space() as f32) * 100.0
            })
            .fold(0.0f32, f32::max);
        *self.last_sample.lock() = ResourceSample {
            cpu_percent,
            memory_percent,
            disk_percent,
        };
    }

    fn evaluate_diagnostics(&self) {
        let sample = self.last_sample();
        let entries = self.registry.entries();
        let total = entries.len();
        let available = entries
            .iter()
            .filter(|e| e.status.state == EngineState::Available)
            .count();
        let error_count = *self.error_count.lock();

        let mut results = Vec::new();
        let mut push = |issue: &str,
                        severity: Severity,
                        description: String,
                        recommendation: &str,
                        components: Vec<String>| {
            results.push(DiagnosticResult {
                issue_type: issue.into(),
                severity,
                description,
                recommendation: recommendation.into(),
                affected_components: components,
                auto_fixable: false,
                detected_at: Utc::now(),
            });
        };

        if sample.cpu_percent > 90.0 {
            push(
                "high_cpu_usage",
                Severity::High,
                format!("CPU usage at {:.0}%", sample.cpu_percent),
                "reduce worker count or pause the batch",
                vec!["scheduler".into()],
            );
        }
        if sample.memory_percent > 85.0 {
            push(
                "high_memory_usage",
                Severity::High,
                format!("memory usage at {:.0}%", sample.memory_percent),
                "lower the memory limit or close other applications",
                vec!["host".into()],
            );
        }
        if sample.disk_percent > 90.0 {
            push(
                "high_disk_usage",
                Severity::Critical,
                format!("disk usage at {:.0}%", sample.disk_percent),
                "free disk space in the output directory",
                vec!["output".into()],
            );
        }
        if total > 0 && available == 0 {
            push(
                "no_engines_available",
                Severity::Critical,
                "no TTS engine is currently available".into(),
                "check engine services and model directories",
                entries.iter().map(|e| e.info.id.clone()).collect(),
            );
        } else if total > 0 && available * 2 < total {
            push(
                "degraded_engine_pool",
                Severity::Medium,
                format!("{available} of {total} engines available"),
                "inspect failing engines in the registry",
                entries
                    .iter()
                    .filter(|e| e.status.state != EngineState::Available)
                    .map(|e| e.info.id.clone())
                    .collect(),
            );
        }
        if error_count > 10 {
            push(
                "excessive_errors",
                Severity::High,
                format!("{error_count} engine errors since startup"),
                "review the log for the failing engine",
                vec!["health".into()],
            );
        }

        *self.diagnostics.lock() = results;
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
