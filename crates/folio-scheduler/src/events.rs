//! Task lifecycle notifications.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::task::{truncate_message, QueueName, Task, TaskType};

/// Lifecycle transition kinds announced to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// The task was claimed and began executing.
    TaskStarted,
    /// The task completed successfully.
    TaskCompleted,
    /// The task failed (handler error, timeout, cancellation, or configuration).
    TaskFailed,
}

/// Fire-and-forget lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Transition kind.
    pub kind: TaskEventKind,
    /// Task this event describes.
    pub task_id: Uuid,
    /// Owning queue.
    pub queue: QueueName,
    /// Dispatched task type.
    pub task_type: TaskType,
    /// Truncated error message on failure events.
    pub message: Option<String>,
    /// Items produced, when the handler result reports a count.
    pub items: Option<u64>,
}

impl TaskEvent {
    /// Build a `task_started` event.
    pub fn started(task: &Task) -> Self {
        Self {
            kind: TaskEventKind::TaskStarted,
            task_id: task.id,
            queue: task.queue,
            task_type: task.task_type,
            message: None,
            items: None,
        }
    }

    /// Build a `task_completed` event, lifting an `"items"` count out of the
    /// handler result when present.
    pub fn completed(task: &Task, result: &serde_json::Value) -> Self {
        Self {
            kind: TaskEventKind::TaskCompleted,
            task_id: task.id,
            queue: task.queue,
            task_type: task.task_type,
            message: None,
            items: result.get("items").and_then(|v| v.as_u64()),
        }
    }

    /// Build a `task_failed` event with a truncated message.
    ///
    /// Uses the same truncation as the stored [`TaskFailure`](crate::task::TaskFailure),
    /// so the event and the persisted record render identically.
    pub fn failed(task: &Task, message: &str) -> Self {
        let message = truncate_message(message.to_string());
        Self {
            kind: TaskEventKind::TaskFailed,
            task_id: task.id,
            queue: task.queue,
            task_type: task.task_type,
            message: Some(message),
            items: None,
        }
    }
}

/// Event notification sink.
///
/// `notify` is fire-and-forget: the scheduler never waits on listeners and
/// never treats a delivery failure as a task failure.
pub trait EventSink: Send + Sync {
    /// Announce a lifecycle transition.
    fn notify(&self, event: TaskEvent);
}

/// Sink that drops all events.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn notify(&self, _event: TaskEvent) {}
}

/// Sink backed by a broadcast channel.
///
/// Lagging or absent receivers are ignored.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    /// Create a sink with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn notify(&self, event: TaskEvent) {
        debug!(
            "Event {:?} for task {} ({}/{})",
            event.kind, event.task_id, event.queue, event.task_type
        );
        // Err means no receivers; events are best-effort.
        let _ = self.sender.send(event);
    }
}
