//! Task persistence store.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::task::{QueueName, Task, TaskStatus};

/// Task store trait for persistence.
///
/// The store serializes writes to a single task record internally; the
/// scheduler relies on `claim_next` and `cancel_if_pending` being atomic
/// with respect to each other.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: &Task) -> Result<(), SchedulerError>;

    /// Update an existing task record.
    async fn update(&self, task: &Task) -> Result<(), SchedulerError>;

    /// Load a task by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Task>, SchedulerError>;

    /// Pending tasks for a queue, highest priority first, FIFO within a priority.
    async fn list_pending(&self, queue: QueueName) -> Result<Vec<Task>, SchedulerError>;

    /// Atomically claim the next pending task for a queue.
    ///
    /// Flips the head pending task to `Running` before returning it, so a
    /// second concurrent claimer can never observe the same task as pending.
    async fn claim_next(&self, queue: QueueName) -> Result<Option<Task>, SchedulerError>;

    /// Atomically transition a task to `Cancelled` if it is still pending.
    ///
    /// Returns `false` when the task was already claimed or terminal.
    async fn cancel_if_pending(&self, id: Uuid) -> Result<bool, SchedulerError>;
}

/// Order pending tasks by priority (desc), then creation time (asc).
fn pending_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// In-memory task store.
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(SchedulerError::TaskNotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, SchedulerError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id).cloned())
    }

    async fn list_pending(&self, queue: QueueName) -> Result<Vec<Task>, SchedulerError> {
        let tasks = self.tasks.read().await;
        let mut pending: Vec<Task> = tasks
            .values()
            .filter(|t| t.queue == queue && t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(pending_order);
        Ok(pending)
    }

    async fn claim_next(&self, queue: QueueName) -> Result<Option<Task>, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let next = tasks
            .values()
            .filter(|t| t.queue == queue && t.status == TaskStatus::Pending)
            .min_by(|a, b| pending_order(*a, *b))
            .map(|t| t.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let task = tasks.get_mut(&id).ok_or(SchedulerError::TaskNotFound(id))?;
        task.status = TaskStatus::Running;
        Ok(Some(task.clone()))
    }

    async fn cancel_if_pending(&self, id: Uuid) -> Result<bool, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Err(SchedulerError::TaskNotFound(id));
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        Ok(true)
    }
}

/// File system based task store.
///
/// Tasks are stored as individual JSON files organized by status:
/// ```text
/// {storage_path}/
/// └── tasks/
///     ├── pending/
///     │   └── {uuid}.json
///     ├── running/
///     │   └── {uuid}.json
///     ├── completed/
///     │   └── {uuid}.json
///     ├── failed/
///     │   └── {uuid}.json
///     └── cancelled/
///         └── {uuid}.json
/// ```
pub struct FileTaskStore {
    storage_path: PathBuf,
    /// Serializes claim/cancel against concurrent writers within this process.
    claim_lock: Mutex<()>,
}

impl FileTaskStore {
    /// Create a new file-based task store rooted at `storage_path`.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, SchedulerError> {
        let storage_path = storage_path.into();
        let tasks_dir = storage_path.join("tasks");

        for status_dir in &["pending", "running", "completed", "failed", "cancelled"] {
            let dir = tasks_dir.join(status_dir);
            fs::create_dir_all(&dir).await.map_err(|e| {
                SchedulerError::Store(format!("Failed to create {} directory: {}", status_dir, e))
            })?;
        }

        debug!("FileTaskStore initialized at {:?}", storage_path);

        Ok(Self {
            storage_path,
            claim_lock: Mutex::new(()),
        })
    }

    fn tasks_dir(&self) -> PathBuf {
        self.storage_path.join("tasks")
    }

    fn status_dir(&self, status: TaskStatus) -> PathBuf {
        let status_name = match status {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        self.tasks_dir().join(status_name)
    }

    fn task_path(&self, id: Uuid, status: TaskStatus) -> PathBuf {
        self.status_dir(status).join(format!("{}.json", id))
    }

    /// Find the current location of a task file.
    async fn find_task_file(&self, id: Uuid) -> Option<(PathBuf, TaskStatus)> {
        let statuses = [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];

        for status in statuses {
            let path = self.task_path(id, status);
            if path.exists() {
                return Some((path, status));
            }
        }
        None
    }

    async fn write_task(&self, task: &Task) -> Result<(), SchedulerError> {
        // Move the file out of the old status directory on transitions.
        if let Some((old_path, old_status)) = self.find_task_file(task.id).await {
            if old_status != task.status {
                fs::remove_file(&old_path).await.ok();
            }
        }

        let path = self.task_path(task.id, task.status);
        let content = serde_json::to_string_pretty(task)?;

        fs::write(&path, content)
            .await
            .map_err(|e| SchedulerError::Store(format!("Failed to write task file: {}", e)))?;

        debug!("Saved task '{}' to {:?}", task.id, path);
        Ok(())
    }

    async fn read_pending(&self, queue: QueueName) -> Result<Vec<Task>, SchedulerError> {
        let pending_dir = self.status_dir(TaskStatus::Pending);
        let mut tasks = Vec::new();

        let mut entries = fs::read_dir(&pending_dir)
            .await
            .map_err(|e| SchedulerError::Store(format!("Failed to read pending directory: {}", e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SchedulerError::Store(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            if !path.extension().map_or(false, |ext| ext == "json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Task>(&content) {
                    Ok(task) if task.queue == queue => tasks.push(task),
                    Ok(_) => {}
                    Err(e) => warn!("Failed to deserialize task from {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read task file {:?}: {}", path, e),
            }
        }

        tasks.sort_by(pending_order);
        Ok(tasks)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), SchedulerError> {
        self.write_task(task).await
    }

    async fn update(&self, task: &Task) -> Result<(), SchedulerError> {
        self.write_task(task).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, SchedulerError> {
        let Some((path, _)) = self.find_task_file(id).await else {
            return Ok(None);
        };

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| SchedulerError::Store(format!("Failed to read task file: {}", e)))?;

        let task: Task = serde_json::from_str(&content)?;
        Ok(Some(task))
    }

    async fn list_pending(&self, queue: QueueName) -> Result<Vec<Task>, SchedulerError> {
        self.read_pending(queue).await
    }

    async fn claim_next(&self, queue: QueueName) -> Result<Option<Task>, SchedulerError> {
        let _guard = self.claim_lock.lock().await;

        let pending = self.read_pending(queue).await?;
        let Some(mut task) = pending.into_iter().next() else {
            return Ok(None);
        };

        task.status = TaskStatus::Running;
        self.write_task(&task).await?;
        Ok(Some(task))
    }

    async fn cancel_if_pending(&self, id: Uuid) -> Result<bool, SchedulerError> {
        let _guard = self.claim_lock.lock().await;

        let Some((_, status)) = self.find_task_file(id).await else {
            return Err(SchedulerError::TaskNotFound(id));
        };
        if status != TaskStatus::Pending {
            return Ok(false);
        }

        let Some(mut task) = self.get(id).await? else {
            return Err(SchedulerError::TaskNotFound(id));
        };
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.write_task(&task).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;
    use tempfile::TempDir;

    fn fetch_task(priority: i32) -> Task {
        Task::new(
            QueueName::DataFetcher,
            TaskType::RefreshMarketData,
            serde_json::json!({"symbols": ["AAPL", "MSFT"]}),
        )
        .with_priority(priority)
    }

    #[tokio::test]
    async fn test_memory_store_claim_order() {
        let store = MemoryTaskStore::new();

        let low = fetch_task(0);
        let high = fetch_task(5);
        store.insert(&low).await.unwrap();
        store.insert(&high).await.unwrap();

        let claimed = store.claim_next(QueueName::DataFetcher).await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, TaskStatus::Running);

        let claimed = store.claim_next(QueueName::DataFetcher).await.unwrap().unwrap();
        assert_eq!(claimed.id, low.id);

        assert!(store.claim_next(QueueName::DataFetcher).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_claim_is_queue_scoped() {
        let store = MemoryTaskStore::new();
        store.insert(&fetch_task(0)).await.unwrap();

        assert!(store.claim_next(QueueName::AiAnalysis).await.unwrap().is_none());
        assert!(store.claim_next(QueueName::DataFetcher).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store_cancel_if_pending() {
        let store = MemoryTaskStore::new();
        let task = fetch_task(0);
        store.insert(&task).await.unwrap();

        assert!(store.cancel_if_pending(task.id).await.unwrap());
        // Already cancelled.
        assert!(!store.cancel_if_pending(task.id).await.unwrap());

        let stored = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert!(store.claim_next(QueueName::DataFetcher).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_update_missing_task() {
        let store = MemoryTaskStore::new();
        let task = fetch_task(0);
        let result = store.update(&task).await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp_dir.path()).await.unwrap();

        let task = fetch_task(1);
        store.insert(&task).await.unwrap();

        let loaded = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.queue, QueueName::DataFetcher);
        assert_eq!(loaded.priority, 1);
    }

    #[tokio::test]
    async fn test_file_store_status_change_moves_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp_dir.path()).await.unwrap();

        let mut task = fetch_task(0);
        store.insert(&task).await.unwrap();
        assert!(store.task_path(task.id, TaskStatus::Pending).exists());

        task.status = TaskStatus::Running;
        store.update(&task).await.unwrap();
        assert!(!store.task_path(task.id, TaskStatus::Pending).exists());
        assert!(store.task_path(task.id, TaskStatus::Running).exists());

        task.status = TaskStatus::Completed;
        store.update(&task).await.unwrap();
        assert!(!store.task_path(task.id, TaskStatus::Running).exists());
        assert!(store.task_path(task.id, TaskStatus::Completed).exists());
    }

    #[tokio::test]
    async fn test_file_store_list_pending_ordered() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp_dir.path()).await.unwrap();

        let low = fetch_task(0);
        let high = fetch_task(9);
        let analysis = Task::new(
            QueueName::AiAnalysis,
            TaskType::RunAnalysis,
            serde_json::Value::Null,
        );

        store.insert(&low).await.unwrap();
        store.insert(&high).await.unwrap();
        store.insert(&analysis).await.unwrap();

        let pending = store.list_pending(QueueName::DataFetcher).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, high.id);
        assert_eq!(pending[1].id, low.id);
    }

    #[tokio::test]
    async fn test_file_store_claim_next() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp_dir.path()).await.unwrap();

        let task = fetch_task(0);
        store.insert(&task).await.unwrap();

        let claimed = store.claim_next(QueueName::DataFetcher).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(store.task_path(task.id, TaskStatus::Running).exists());
        assert!(store.claim_next(QueueName::DataFetcher).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_get_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp_dir.path()).await.unwrap();

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
