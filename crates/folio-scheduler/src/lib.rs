//! # Folio Scheduler
//!
//! Multi-queue task scheduler for the Folio portfolio assistant.
//!
//! Heterogeneous work (portfolio sync, market-data refresh, AI analysis) is
//! grouped into named queues. Queues execute concurrently with each other;
//! tasks within a queue execute strictly one at a time, in priority-then-FIFO
//! order. Analysis work is rate-limited and stateful, so it must never run
//! twice concurrently, while independent work must never block it.
//!
//! ## Features
//!
//! - One sequential execution loop per queue, all supervised concurrently
//! - Handler registration by task type, with explicit duplicate rejection
//! - Per-task-type execution budgets with cooperative cancellation
//! - Duplicate-submission guard over in-flight and recently-completed work
//! - Task persistence behind a store trait (memory and JSON-file impls)
//! - Fire-and-forget lifecycle notifications

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod registry;
pub mod service;
pub mod store;
pub mod task;
pub mod tracker;

pub use config::{SchedulerConfig, TimeoutPolicy};
pub use error::SchedulerError;
pub use events::{BroadcastEventSink, EventSink, NullEventSink, TaskEvent, TaskEventKind};
pub use manager::{QueueManager, QueueStatus};
pub use registry::{HandlerRegistry, TaskHandler};
pub use service::{parse_queue_name, parse_task_type, TaskService};
pub use store::{FileTaskStore, MemoryTaskStore, TaskStore};
pub use task::{FailureReason, QueueName, Task, TaskFailure, TaskStatus, TaskType};
pub use tracker::{ExecutionRecord, ExecutionTracker};
