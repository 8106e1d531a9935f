//! Queue supervision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::service::TaskService;
use crate::task::QueueName;

/// Read-only snapshot of one queue.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    /// Task currently executing, if any.
    pub running_task_id: Option<Uuid>,
    /// Number of pending tasks.
    pub pending_count: usize,
    /// Whether new claims are suspended.
    pub paused: bool,
}

/// Per-queue state owned by that queue's loop.
struct QueueState {
    paused: AtomicBool,
    running_task: RwLock<Option<Uuid>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            running_task: RwLock::new(None),
        }
    }
}

/// Owns the fixed set of queues and runs one sequential loop per queue.
///
/// Queues execute concurrently with each other; within a queue the loop
/// never claims again until the current task reaches a terminal status.
/// A fault in one loop (e.g. a store outage) is logged and backed off,
/// never propagated to sibling queues.
pub struct QueueManager {
    service: Arc<TaskService>,
    queues: HashMap<QueueName, Arc<QueueState>>,
    shutdown: broadcast::Sender<()>,
}

impl QueueManager {
    /// Create a manager over the statically configured queue set.
    pub fn new(service: Arc<TaskService>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let queues = QueueName::ALL
            .into_iter()
            .map(|q| (q, Arc::new(QueueState::new())))
            .collect();
        Self {
            service,
            queues,
            shutdown,
        }
    }

    /// The task service, for producers and operators.
    pub fn service(&self) -> &Arc<TaskService> {
        &self.service
    }

    /// Spawn one loop per queue; the loops run until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        QueueName::ALL
            .into_iter()
            .map(|queue| {
                let manager = Arc::clone(self);
                let shutdown_rx = self.shutdown.subscribe();
                tokio::spawn(async move {
                    manager.queue_loop(queue, shutdown_rx).await;
                })
            })
            .collect()
    }

    /// Start all queue loops and wait for them to stop.
    pub async fn run(self: Arc<Self>) {
        let handles = self.start();
        futures::future::join_all(handles).await;
        info!("All queue loops stopped");
    }

    /// Stop all queue loops after their current task finishes.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Suspend new claims for a queue; the in-flight task keeps running.
    pub fn pause_queue(&self, queue: QueueName) {
        if let Some(state) = self.queues.get(&queue) {
            info!("Queue {} paused", queue);
            state.paused.store(true, Ordering::SeqCst);
        }
    }

    /// Resume claims for a paused queue.
    pub fn resume_queue(&self, queue: QueueName) {
        if let Some(state) = self.queues.get(&queue) {
            info!("Queue {} resumed", queue);
            state.paused.store(false, Ordering::SeqCst);
        }
    }

    /// Cancel a task by id (pending or running).
    pub async fn cancel_task(&self, id: Uuid) -> Result<(), SchedulerError> {
        self.service.cancel_task(id).await
    }

    /// Read-only status snapshot for a queue.
    pub async fn queue_status(&self, queue: QueueName) -> Result<QueueStatus, SchedulerError> {
        let state = self
            .queues
            .get(&queue)
            .ok_or_else(|| SchedulerError::UnknownQueue(queue.to_string()))?;
        Ok(QueueStatus {
            running_task_id: *state.running_task.read().await,
            pending_count: self.service.pending_count(queue).await?,
            paused: state.paused.load(Ordering::SeqCst),
        })
    }

    /// One queue's sequential loop: claim, execute to a terminal status,
    /// repeat; idle-poll when empty or paused.
    ///
    /// Shutdown only interrupts idle waits; an in-flight task always runs
    /// to its terminal status first.
    async fn queue_loop(&self, queue: QueueName, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Queue loop started: {}", queue);
        let state = Arc::clone(&self.queues[&queue]);

        loop {
            match self.tick(queue, &state).await {
                Some(wait) => {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => {
                    if !matches!(
                        shutdown_rx.try_recv(),
                        Err(broadcast::error::TryRecvError::Empty)
                    ) {
                        break;
                    }
                }
            }
        }

        info!("Queue loop stopping: {}", queue);
    }

    /// One loop iteration. Returns how long to idle before the next claim,
    /// or `None` when a task was executed. Faults degrade to a logged
    /// backoff so the loop never exits and never disturbs sibling queues.
    async fn tick(&self, queue: QueueName, state: &QueueState) -> Option<std::time::Duration> {
        if state.paused.load(Ordering::SeqCst) {
            return Some(self.service.config().poll_interval());
        }

        let task = match self.service.next_task(queue).await {
            Ok(Some(task)) => task,
            Ok(None) => return Some(self.service.config().poll_interval()),
            Err(e) => {
                error!("Queue {} failed to claim: {}", queue, e);
                return Some(self.service.config().error_backoff());
            }
        };

        *state.running_task.write().await = Some(task.id);
        let task_id = task.id;
        debug!("Queue {} executing task {}", queue, task_id);

        let result = self.service.execute_task(task).await;
        *state.running_task.write().await = None;

        if let Err(e) = result {
            error!("Queue {} failed to finalize task {}: {}", queue, task_id, e);
            return Some(self.service.config().error_backoff());
        }

        None
    }
}
