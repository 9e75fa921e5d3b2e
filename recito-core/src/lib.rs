//! # recito-core
//!
//! Reusable batch text-to-speech conversion SDK.
//!
//! ## Architecture
//!
//! ```text
//! add_task ─► FIFO queue ─► worker thread ─► pipeline
//!                                              │
//!                       EngineRegistry ── TtsEngine::synthesize
//!                                              │
//!                        PostProcessor (detect / transcode / subtitle)
//!                                              │
//!                          broadcast::Sender<BatchEvent>
//! ```
//!
//! Engine adapters return raw audio bytes; all file writing happens in the
//! pipeline and post-processor. The scheduler owns the task list and queue,
//! publishes lifecycle events, and honors pause/resume/cancel at cooperative
//! checkpoints.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod batch;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod events;
pub mod health;
pub mod registry;
pub mod task;

// Convenience re-exports for downstream crates
pub use audio::{detect_format, AudioFormat, SynthesisResult};
pub use batch::{BatchScheduler, SchedulerConfig};
pub use config::{ChapterInfo, NamingMode, OutputConfig, SubtitleFormat, VoiceConfig};
pub use engine::descriptor::{EngineDescriptor, EngineKind, EngineState, EngineStatus, VoiceInfo};
pub use engine::mapping::{MappingStrategy, VoiceMapper, VoiceMapping};
pub use engine::registry::EngineRegistry;
pub use engine::{EngineHandle, TtsEngine};
pub use error::{RecitoError, Result};
pub use events::BatchEvent;
pub use health::HealthMonitor;
pub use registry::ConfigRegistry;
pub use task::{Task, TaskStatus};
