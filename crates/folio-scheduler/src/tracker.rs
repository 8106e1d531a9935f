//! Execution history and duplicate-submission tracking.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::task::{QueueName, TaskStatus, TaskType};

/// Key identifying a logical unit of work for dedup purposes.
pub type DedupKey = (QueueName, TaskType, String);

/// One completed execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Executed task.
    pub task_id: Uuid,
    /// Owning queue.
    pub queue: QueueName,
    /// Dispatched task type.
    pub task_type: TaskType,
    /// Dedup key, when the producer supplied one.
    pub dedup_key: Option<String>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: DateTime<Utc>,
    /// Terminal status.
    pub status: TaskStatus,
    /// Short human-readable outcome summary.
    pub summary: Option<String>,
}

impl ExecutionRecord {
    /// Wall-clock execution duration, when both timestamps are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.started_at.map(|s| self.completed_at - s)
    }
}

/// Records execution outcomes and guards against duplicate submissions.
///
/// Holds a bounded ring of recent executions plus the set of live
/// (pending or running) dedup keys. Read access goes through snapshot
/// methods; only the task service mutates it.
pub struct ExecutionTracker {
    history: RwLock<VecDeque<ExecutionRecord>>,
    live: RwLock<HashMap<DedupKey, Uuid>>,
    history_limit: usize,
}

impl ExecutionTracker {
    /// Create a tracker keeping at most `history_limit` records.
    pub fn new(history_limit: usize) -> Self {
        Self {
            history: RwLock::new(VecDeque::new()),
            live: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Register a live dedup key for a new task.
    ///
    /// Returns the already-registered task id when the key is taken, in
    /// which case the caller must not create a second task.
    pub async fn register_live(&self, key: DedupKey, task_id: Uuid) -> Option<Uuid> {
        let mut live = self.live.write().await;
        if let Some(existing) = live.get(&key) {
            return Some(*existing);
        }
        live.insert(key, task_id);
        None
    }

    /// Release a live dedup key once its task reaches a terminal status.
    pub async fn release_live(&self, key: &DedupKey) {
        self.live.write().await.remove(key);
    }

    /// Append an execution record, evicting the oldest past the limit.
    pub async fn record(&self, record: ExecutionRecord) {
        let mut history = self.history.write().await;
        history.push_back(record);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// Whether a task with this key completed successfully inside `window`.
    pub async fn recent_duplicate(
        &self,
        queue: QueueName,
        task_type: TaskType,
        dedup_key: &str,
        window: Duration,
    ) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let history = self.history.read().await;
        history.iter().rev().any(|r| {
            r.queue == queue
                && r.task_type == task_type
                && r.dedup_key.as_deref() == Some(dedup_key)
                && r.status == TaskStatus::Completed
                && r.completed_at >= cutoff
        })
    }

    /// Most recent execution records, newest first.
    pub async fn history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }
}
