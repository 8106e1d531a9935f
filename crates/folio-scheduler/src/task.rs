//! Task definition, queues, and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a stored failure message.
pub const MAX_ERROR_LEN: usize = 500;

/// The fixed set of scheduler queues.
///
/// Queues run concurrently with each other; tasks within one queue run
/// strictly one at a time, in priority-then-FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Portfolio synchronization against brokerage data.
    PortfolioSync,
    /// External market-data refresh.
    DataFetcher,
    /// AI-driven analysis (turn-budgeted reasoning sessions).
    AiAnalysis,
}

impl QueueName {
    /// All configured queues, in startup order.
    pub const ALL: [QueueName; 3] = [
        QueueName::PortfolioSync,
        QueueName::DataFetcher,
        QueueName::AiAnalysis,
    ];

    /// Stable string form used in logs and file paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::PortfolioSync => "portfolio_sync",
            QueueName::DataFetcher => "data_fetcher",
            QueueName::AiAnalysis => "ai_analysis",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of task types the scheduler can dispatch.
///
/// Each type is bound to a handler in the [`HandlerRegistry`](crate::HandlerRegistry)
/// and carries its own execution budget (see [`TimeoutPolicy`](crate::config::TimeoutPolicy)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Reconcile portfolio positions.
    SyncPortfolio,
    /// Fetch quotes/fundamentals for a symbol batch.
    RefreshMarketData,
    /// Run an analysis session over a portfolio or symbol batch.
    RunAnalysis,
}

impl TaskType {
    /// Stable string form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SyncPortfolio => "sync_portfolio",
            TaskType::RefreshMarketData => "refresh_market_data",
            TaskType::RunAnalysis => "run_analysis",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in queue.
    Pending,
    /// Currently being executed.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed (handler error, timeout, or configuration error).
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The handler returned an error.
    Handler,
    /// The execution budget expired.
    Timeout,
    /// Cancelled while running and did not yield within the grace period.
    Cancelled,
    /// No handler registered for the task type at dispatch time.
    Configuration,
}

/// Structured failure description stored on a `Failed` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Truncated error message.
    pub message: String,
    /// Failure classification.
    pub reason: FailureReason,
    /// Retry count consumed at the time of failure.
    pub retry_count: u32,
}

impl TaskFailure {
    /// Build a failure record, truncating the message.
    pub fn new(message: impl Into<String>, reason: FailureReason, retry_count: u32) -> Self {
        Self {
            message: truncate_message(message.into()),
            reason,
            retry_count,
        }
    }
}

/// Truncate a message to [`MAX_ERROR_LEN`] on a char boundary, marking the cut.
pub(crate) fn truncate_message(mut message: String) -> String {
    if message.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("…");
    }
    message
}

/// One unit of work owned by a single queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID, assigned at creation.
    pub id: Uuid,
    /// Owning queue. Immutable after creation.
    pub queue: QueueName,
    /// Which handler to invoke. Immutable.
    pub task_type: TaskType,
    /// Opaque payload passed to the handler verbatim.
    pub payload: serde_json::Value,
    /// Higher values dequeue first; ties break FIFO by `created_at`.
    pub priority: i32,
    /// Caller-supplied duplicate-submission key.
    pub dedup_key: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set when the task is claimed.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on any terminal transition reached through execution.
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler return value once `Completed`.
    pub result: Option<serde_json::Value>,
    /// Failure description once `Failed`.
    pub failure: Option<TaskFailure>,
    /// Number of times this task has been re-attempted.
    pub retry_count: u32,
}

impl Task {
    /// Create a new pending task.
    pub fn new(queue: QueueName, task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            task_type,
            payload,
            priority: 0,
            dedup_key: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            failure: None,
            retry_count: 0,
        }
    }

    /// Set task priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dedup key.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Whether this task is still live (not in a terminal status).
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let task = Task::new(
            QueueName::DataFetcher,
            TaskType::RefreshMarketData,
            serde_json::json!({"symbols": ["AAPL"]}),
        );
        assert_eq!(task.queue, QueueName::DataFetcher);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 0);
        assert!(task.started_at.is_none());
        assert!(task.is_live());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_failure_message_truncated() {
        let long = "x".repeat(MAX_ERROR_LEN * 2);
        let failure = TaskFailure::new(long, FailureReason::Handler, 0);
        assert!(failure.message.len() <= MAX_ERROR_LEN + "…".len());
    }

    #[test]
    fn test_queue_name_round_trip() {
        for queue in QueueName::ALL {
            let json = serde_json::to_string(&queue).unwrap();
            let back: QueueName = serde_json::from_str(&json).unwrap();
            assert_eq!(queue, back);
        }
    }
}
