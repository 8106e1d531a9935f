//! Handler registration and lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SchedulerError;
use crate::task::TaskType;

/// Task handler trait.
///
/// Handlers receive the task payload verbatim and a cancellation token they
/// must poll at suspension points; when the token fires they should abandon
/// work and return promptly. They must not spawn background work that
/// outlives the call.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the work for one task.
    async fn handle(
        &self,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, SchedulerError>;
}

/// Mapping from task type to handler.
///
/// Registration normally completes during startup, before queue loops begin
/// claiming; late registration is allowed because resolution happens at
/// dispatch time.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a handler to a task type.
    ///
    /// Rebinding is rejected; re-registration must be explicit, never a
    /// silent overwrite.
    pub async fn register(
        &self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), SchedulerError> {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateHandler(task_type));
        }
        debug!("Registered handler for task type: {}", task_type);
        handlers.insert(task_type, handler);
        Ok(())
    }

    /// Look up the handler for a task type.
    pub async fn resolve(&self, task_type: TaskType) -> Result<Arc<dyn TaskHandler>, SchedulerError> {
        let handlers = self.handlers.read().await;
        handlers
            .get(&task_type)
            .cloned()
            .ok_or(SchedulerError::UnregisteredTaskType(task_type))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
