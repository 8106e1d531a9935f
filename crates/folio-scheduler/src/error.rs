//! Scheduler errors.

use thiserror::Error;

use crate::task::{TaskStatus, TaskType};

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    /// Unknown queue name at task creation.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Unknown task type name from a producer.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// A handler is already registered for this task type.
    #[error("Handler already registered for task type: {0}")]
    DuplicateHandler(TaskType),

    /// No handler registered for this task type.
    #[error("No handler registered for task type: {0}")]
    UnregisteredTaskType(TaskType),

    /// A logically identical task is already in flight or recently completed.
    #[error("Duplicate task for dedup key: {0}")]
    DuplicateTask(String),

    /// Attempted transition out of a terminal status.
    #[error("Invalid transition from terminal status {from:?}")]
    InvalidTransition {
        /// Status the task was in.
        from: TaskStatus,
    },

    /// Execution budget expired.
    #[error("Task execution timed out")]
    Timeout,

    /// The handler returned an error.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Persistence layer failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
