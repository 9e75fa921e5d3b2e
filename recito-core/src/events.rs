//! Batch lifecycle events published to external observers.
//!
//! The scheduler owns a `tokio::sync::broadcast` sender; the GUI (or CLI
//! host) subscribes and renders. Events are emitted outside all scheduler
//! locks, and for a single task arrive in causal order:
//! `Started` < `Progress*` < one of `Completed`/`Failed`/`Cancelled`.
//!
//! | Variant | Emitted when |
//! |---------|--------------|
//! | `TaskAdded` / `TaskRemoved` / `TaskUpdated` | task list mutation |
//! | `TaskStarted` | worker picks the task up |
//! | `TaskProgress` | pipeline stage mark or 2 s progress tick |
//! | `TaskCompleted` / `TaskFailed` / `TaskCancelled` | terminal transition |
//! | `TaskPaused` / `TaskResumed` | pause flag changes |
//! | `OverallProgress` | any task progress change |

use serde::{Deserialize, Serialize};

/// Broadcast capacity: enough to absorb a burst of progress ticks from a full
/// queue without lagging a slow subscriber.
pub const EVENT_CHANNEL_CAP: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    TaskAdded {
        task_id: String,
    },
    TaskRemoved {
        task_id: String,
    },
    TaskUpdated {
        task_id: String,
    },
    TaskStarted {
        task_id: String,
    },
    TaskProgress {
        task_id: String,
        progress: u8,
        remaining_s: f64,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        error_message: String,
    },
    TaskPaused {
        task_id: String,
    },
    TaskResumed {
        task_id: String,
    },
    TaskCancelled {
        task_id: String,
    },
    OverallProgress {
        percentage: f64,
    },
}

impl BatchEvent {
    /// Task the event refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskAdded { task_id }
            | Self::TaskRemoved { task_id }
            | Self::TaskUpdated { task_id }
            | Self::TaskStarted { task_id }
            | Self::TaskProgress { task_id, .. }
            | Self::TaskCompleted { task_id }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskPaused { task_id }
            | Self::TaskResumed { task_id }
            | Self::TaskCancelled { task_id } => Some(task_id),
            Self::OverallProgress { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = BatchEvent::TaskProgress {
            task_id: "task_3_1700000000".into(),
            progress: 54,
            remaining_s: 10.2,
        };
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["event"], "task_progress");
        assert_eq!(json["task_id"], "task_3_1700000000");
        assert_eq!(json["progress"], 54);

        let back: BatchEvent = serde_json::from_value(json).expect("deserialize event");
        assert_eq!(back, event);
    }

    #[test]
    fn failure_event_carries_message() {
        let event = BatchEvent::TaskFailed {
            task_id: "task_1_0".into(),
            error_message: "synthesis failed: boom".into(),
        };
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["event"], "task_failed");
        assert_eq!(json["error_message"], "synthesis failed: boom");
    }
}
