//! Task lifecycle orchestration.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::{EventSink, TaskEvent};
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;
use crate::task::{FailureReason, QueueName, Task, TaskFailure, TaskStatus, TaskType};
use crate::tracker::{DedupKey, ExecutionRecord, ExecutionTracker};

/// How one execution attempt ended.
enum Outcome {
    Completed(serde_json::Value),
    Failed(String, FailureReason),
}

/// Orchestrates the lifecycle of individual tasks: creation with duplicate
/// guarding, atomic claiming, dispatch under a per-type budget, and
/// cancellation.
pub struct TaskService {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<ExecutionTracker>,
    events: Arc<dyn EventSink>,
    /// Cancellation tokens for tasks currently executing, keyed by task id.
    in_flight: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl TaskService {
    /// Create a new task service.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        tracker: Arc<ExecutionTracker>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            tracker,
            events,
            in_flight: RwLock::new(HashMap::new()),
        }
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handler registry, for startup-time registration.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Execution tracker, for history queries.
    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    /// Look up a task by id.
    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, SchedulerError> {
        self.store.get(id).await
    }

    /// Number of pending tasks in a queue.
    pub async fn pending_count(&self, queue: QueueName) -> Result<usize, SchedulerError> {
        Ok(self.store.list_pending(queue).await?.len())
    }

    /// Create a new pending task.
    ///
    /// When `dedup_key` is supplied, a live task with the same
    /// (queue, type, key) is returned instead of creating a second entry,
    /// and a successful completion inside the dedup window rejects the
    /// submission with [`SchedulerError::DuplicateTask`].
    pub async fn create_task(
        &self,
        queue: QueueName,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: i32,
        dedup_key: Option<String>,
    ) -> Result<Task, SchedulerError> {
        let mut task = Task::new(queue, task_type, payload).with_priority(priority);

        if let Some(key) = dedup_key {
            if self
                .tracker
                .recent_duplicate(queue, task_type, &key, self.config.dedup_window())
                .await
            {
                debug!("Rejecting duplicate {}/{} key={}", queue, task_type, key);
                return Err(SchedulerError::DuplicateTask(key));
            }

            task = task.with_dedup_key(key.clone());
            let dedup: DedupKey = (queue, task_type, key);
            if let Some(existing_id) = self.tracker.register_live(dedup.clone(), task.id).await {
                match self.store.get(existing_id).await? {
                    Some(existing) if existing.is_live() => {
                        debug!("Merged duplicate submission into task {}", existing_id);
                        return Ok(existing);
                    }
                    _ => {
                        // Stale live entry; replace it with the new task.
                        self.tracker.release_live(&dedup).await;
                        self.tracker.register_live(dedup, task.id).await;
                    }
                }
            }
        }

        self.store.insert(&task).await?;
        info!(
            "Created task {} ({}/{}, priority {})",
            task.id, task.queue, task.task_type, task.priority
        );
        Ok(task)
    }

    /// Claim the next pending task for a queue.
    ///
    /// The store flips the task to `Running` atomically; the service stamps
    /// `started_at`, persists it, and announces `task_started`.
    pub async fn next_task(&self, queue: QueueName) -> Result<Option<Task>, SchedulerError> {
        let Some(mut task) = self.store.claim_next(queue).await? else {
            return Ok(None);
        };

        // Register the cancellation token at claim time, before the task is
        // externally observable as running; a cancel arriving before dispatch
        // finds the token (or pre-cancels one) instead of being lost.
        self.in_flight
            .write()
            .await
            .entry(task.id)
            .or_insert_with(CancellationToken::new);

        task.started_at = Some(Utc::now());
        self.store.update(&task).await?;
        self.events.notify(TaskEvent::started(&task));
        debug!("Claimed task {} for queue {}", task.id, queue);
        Ok(Some(task))
    }

    /// Execute a claimed task to a terminal status.
    ///
    /// Returns only after the terminal transition has been persisted,
    /// recorded, and announced; the queue loop must not claim again before
    /// this returns. An `Err` here means the store failed, not the handler.
    pub async fn execute_task(&self, task: Task) -> Result<Task, SchedulerError> {
        let handler = match self.registry.resolve(task.task_type).await {
            Ok(handler) => handler,
            Err(e) => {
                // Fatal configuration error for this task; no timeout applies.
                error!("Task {} has no handler: {}", task.id, e);
                return self
                    .finalize(task, Outcome::Failed(e.to_string(), FailureReason::Configuration))
                    .await;
            }
        };

        let budget = self.config.timeouts.budget_for(task.task_type);
        // Reuse the token registered at claim time; it may already be
        // cancelled if a cancel arrived between claim and dispatch.
        let cancel = self
            .in_flight
            .write()
            .await
            .entry(task.id)
            .or_insert_with(CancellationToken::new)
            .clone();

        debug!(
            "Executing task {} ({}/{}) with budget {:?}",
            task.id, task.queue, task.task_type, budget
        );

        let fut = handler.handle(task.payload.clone(), cancel.child_token());
        tokio::pin!(fut);

        enum Attempt {
            Finished(Result<serde_json::Value, SchedulerError>),
            TimedOut,
            CancelRequested,
        }

        let attempt = tokio::select! {
            res = tokio::time::timeout(budget, &mut fut) => match res {
                Ok(result) => Attempt::Finished(result),
                Err(_) => Attempt::TimedOut,
            },
            _ = cancel.cancelled() => Attempt::CancelRequested,
        };

        let outcome = match attempt {
            Attempt::Finished(Ok(value)) => Outcome::Completed(value),
            Attempt::Finished(Err(e)) => Outcome::Failed(e.to_string(), FailureReason::Handler),
            // Dropping the future is the hard cancel; nothing of the handler
            // survives past this point.
            Attempt::TimedOut => Outcome::Failed(
                format!("timed out after {:?}", budget),
                FailureReason::Timeout,
            ),
            Attempt::CancelRequested => {
                // Give the handler a grace period to observe the token.
                match tokio::time::timeout(self.config.cancel_grace(), &mut fut).await {
                    Ok(Ok(value)) => Outcome::Completed(value),
                    Ok(Err(e)) => Outcome::Failed(e.to_string(), FailureReason::Handler),
                    Err(_) => Outcome::Failed("cancelled".to_string(), FailureReason::Cancelled),
                }
            }
        };

        self.in_flight.write().await.remove(&task.id);
        self.finalize(task, outcome).await
    }

    /// Cancel a task.
    ///
    /// Pending tasks transition directly to `Cancelled`; running tasks get a
    /// cooperative cancellation request (the grace period is enforced inside
    /// [`execute_task`](Self::execute_task)); terminal tasks are rejected.
    pub async fn cancel_task(&self, id: Uuid) -> Result<(), SchedulerError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))?;

        match task.status {
            TaskStatus::Pending => {
                if self.store.cancel_if_pending(id).await? {
                    if let Some(key) = &task.dedup_key {
                        self.tracker
                            .release_live(&(task.queue, task.task_type, key.clone()))
                            .await;
                    }
                    info!("Cancelled pending task {}", id);
                    return Ok(());
                }
                // Claimed between the read and the cancel; treat as running.
                self.request_cancel(id).await
            }
            TaskStatus::Running => self.request_cancel(id).await,
            status => Err(SchedulerError::InvalidTransition { from: status }),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> Result<(), SchedulerError> {
        {
            let mut in_flight = self.in_flight.write().await;
            // Inserting a pre-cancelled token covers the window where the
            // store already shows the task running but dispatch has not
            // picked it up yet.
            in_flight.entry(id).or_insert_with(CancellationToken::new).cancel();
        }
        info!("Requested cooperative cancellation of task {}", id);

        // The task may have reached a terminal status concurrently; drop the
        // entry so the map does not accumulate tokens for finished tasks.
        if let Some(task) = self.store.get(id).await? {
            if task.status.is_terminal() {
                self.in_flight.write().await.remove(&id);
            }
        }
        Ok(())
    }

    /// Persist a terminal transition, record it, and notify listeners.
    async fn finalize(&self, mut task: Task, outcome: Outcome) -> Result<Task, SchedulerError> {
        task.completed_at = Some(Utc::now());

        let (event, summary) = match outcome {
            Outcome::Completed(value) => {
                task.status = TaskStatus::Completed;
                let event = TaskEvent::completed(&task, &value);
                let summary = event.items.map(|n| format!("{} items", n));
                task.result = Some(value);
                info!("Task {} completed ({}/{})", task.id, task.queue, task.task_type);
                (event, summary)
            }
            Outcome::Failed(message, reason) => {
                task.status = TaskStatus::Failed;
                task.failure = Some(TaskFailure::new(&*message, reason, task.retry_count));
                warn!(
                    "Task {} failed ({}/{}): {:?}: {}",
                    task.id, task.queue, task.task_type, reason, message
                );
                let event = TaskEvent::failed(&task, &message);
                (event, Some(message))
            }
        };

        // Record, release, and notify even when the terminal write fails, so
        // the in-memory view stays consistent; the error still propagates and
        // the stuck task id is logged for operator recovery.
        let update_result = self.store.update(&task).await;
        if let Err(e) = &update_result {
            error!(
                "Failed to persist terminal status {:?} for task {}: {}",
                task.status, task.id, e
            );
        }

        self.tracker
            .record(ExecutionRecord {
                task_id: task.id,
                queue: task.queue,
                task_type: task.task_type,
                dedup_key: task.dedup_key.clone(),
                started_at: task.started_at,
                completed_at: task.completed_at.unwrap_or_else(Utc::now),
                status: task.status,
                summary,
            })
            .await;

        if let Some(key) = &task.dedup_key {
            self.tracker
                .release_live(&(task.queue, task.task_type, key.clone()))
                .await;
        }

        self.events.notify(event);
        update_result?;
        Ok(task)
    }
}

/// Validate a producer-supplied queue name string.
pub fn parse_queue_name(name: &str) -> Result<QueueName, SchedulerError> {
    QueueName::ALL
        .into_iter()
        .find(|q| q.as_str() == name)
        .ok_or_else(|| SchedulerError::UnknownQueue(name.to_string()))
}

/// Validate a producer-supplied task type string.
pub fn parse_task_type(name: &str) -> Result<TaskType, SchedulerError> {
    [
        TaskType::SyncPortfolio,
        TaskType::RefreshMarketData,
        TaskType::RunAnalysis,
    ]
    .into_iter()
    .find(|t| t.as_str() == name)
    .ok_or_else(|| SchedulerError::UnknownTaskType(name.to_string()))
}
