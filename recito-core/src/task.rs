//! Task descriptor and lifecycle state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──► Processing ──► Completed
//!    │            │  ▲
//!    │            ▼  │
//!    │          Paused
//!    │            │
//!    ▼            ▼
//! Cancelled    Failed / Cancelled
//! ```
//!
//! Terminal states (Completed, Failed, Cancelled) are never left and never
//! re-dispatched; `start_processing` may re-enqueue Failed/Cancelled tasks as
//! fresh Pending work, which is modeled as an explicit reset rather than a
//! lifecycle transition.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::{ChapterInfo, VoiceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Cancelled),
            Self::Processing => matches!(
                next,
                Self::Paused | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Paused => matches!(next, Self::Processing | Self::Cancelled | Self::Failed),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// Metadata about the audio a completed task produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducedAudio {
    pub path: PathBuf,
    pub format: crate::audio::AudioFormat,
    pub size_bytes: u64,
    pub duration_s: Option<f64>,
    pub subtitle_path: Option<PathBuf>,
}

/// One scheduled conversion job.
///
/// The descriptor half (`id`, paths, `voice_config`, `chapter`) is set at
/// enqueue time and never mutated; the rest is the live status/progress
/// record the pipeline and scheduler write through a shared lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub file_path: PathBuf,
    /// Final audio path. May be empty at enqueue time, in which case the
    /// pipeline derives it from the output config's naming rules.
    pub output_path: PathBuf,
    pub voice_config: VoiceConfig,
    pub chapter: ChapterInfo,
    pub status: TaskStatus,
    /// 0..=100.
    pub progress: u8,
    pub estimated_duration_s: Option<f64>,
    pub estimated_remaining_s: Option<f64>,
    /// Epoch seconds; set on the transition into Processing.
    pub start_time: Option<f64>,
    /// Epoch seconds; set on any transition into a terminal state.
    pub end_time: Option<f64>,
    pub error_message: Option<String>,
    pub produced: Option<ProducedAudio>,
}

pub(crate) fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Task {
    pub fn new(
        id: String,
        file_path: PathBuf,
        output_path: PathBuf,
        voice_config: VoiceConfig,
        chapter: ChapterInfo,
    ) -> Self {
        Self {
            id,
            file_path,
            output_path,
            voice_config,
            chapter,
            status: TaskStatus::Pending,
            progress: 0,
            estimated_duration_s: None,
            estimated_remaining_s: None,
            start_time: None,
            end_time: None,
            error_message: None,
            produced: None,
        }
    }

    /// Apply a lifecycle transition, maintaining the timing invariants:
    /// entering Processing stamps `start_time`; entering any terminal state
    /// stamps `end_time` and clamps `estimated_remaining_s` to 0.
    ///
    /// Returns `false` (and leaves the task untouched) for illegal
    /// transitions.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if next == TaskStatus::Processing && self.start_time.is_none() {
            self.start_time = Some(epoch_now());
        }
        if next.is_terminal() {
            self.end_time = Some(epoch_now());
            self.estimated_remaining_s = Some(0.0);
            if next == TaskStatus::Completed {
                self.progress = 100;
            }
        }
        self.status = next;
        true
    }

    /// Reset a Failed/Cancelled task so `start_processing` can re-enqueue it.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress = 0;
        self.estimated_duration_s = None;
        self.estimated_remaining_s = None;
        self.start_time = None;
        self.end_time = None;
        self.error_message = None;
        self.produced = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            "task_1_0".into(),
            PathBuf::from("in.txt"),
            PathBuf::from("out.wav"),
            VoiceConfig::default(),
            ChapterInfo::default(),
        )
    }

    #[test]
    fn happy_path_transitions_stamp_times() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Processing));
        assert!(t.start_time.is_some());
        assert!(t.transition(TaskStatus::Completed));
        assert_eq!(t.progress, 100);
        assert_eq!(t.estimated_remaining_s, Some(0.0));
        let start = t.start_time.unwrap();
        let end = t.end_time.unwrap();
        assert!(end >= start);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut t = task();
        t.transition(TaskStatus::Processing);
        t.transition(TaskStatus::Failed);
        assert!(!t.transition(TaskStatus::Processing));
        assert!(!t.transition(TaskStatus::Pending));
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut t = task();
        t.transition(TaskStatus::Processing);
        assert!(t.transition(TaskStatus::Paused));
        assert!(t.transition(TaskStatus::Processing));
        assert_eq!(t.status, TaskStatus::Processing);
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let mut t = task();
        assert!(!t.transition(TaskStatus::Completed));
        assert_eq!(t.status, TaskStatus::Pending);
    }

    #[test]
    fn cancel_from_any_non_terminal_state() {
        let mut pending = task();
        assert!(pending.transition(TaskStatus::Cancelled));

        let mut processing = task();
        processing.transition(TaskStatus::Processing);
        assert!(processing.transition(TaskStatus::Cancelled));
        assert_eq!(processing.estimated_remaining_s, Some(0.0));

        let mut paused = task();
        paused.transition(TaskStatus::Processing);
        paused.transition(TaskStatus::Paused);
        assert!(paused.transition(TaskStatus::Cancelled));
    }
}
