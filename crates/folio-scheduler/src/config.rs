//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::TaskType;

/// Per-task-type execution budgets, in seconds.
///
/// Analysis work runs stateful reasoning sessions that legitimately take
/// many minutes, so it gets a far more generous budget than sync/fetch work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    /// Budget for portfolio synchronization.
    #[serde(default = "default_sync_timeout")]
    pub sync_portfolio_secs: u64,

    /// Budget for market-data refresh.
    #[serde(default = "default_fetch_timeout")]
    pub refresh_market_data_secs: u64,

    /// Budget for analysis sessions.
    #[serde(default = "default_analysis_timeout")]
    pub run_analysis_secs: u64,
}

fn default_sync_timeout() -> u64 {
    120
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_analysis_timeout() -> u64 {
    1800
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            sync_portfolio_secs: default_sync_timeout(),
            refresh_market_data_secs: default_fetch_timeout(),
            run_analysis_secs: default_analysis_timeout(),
        }
    }
}

impl TimeoutPolicy {
    /// Execution budget for a task type.
    pub fn budget_for(&self, task_type: TaskType) -> Duration {
        let secs = match task_type {
            TaskType::SyncPortfolio => self.sync_portfolio_secs,
            TaskType::RefreshMarketData => self.refresh_market_data_secs,
            TaskType::RunAnalysis => self.run_analysis_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Idle poll interval when a queue has no pending tasks, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pause after an unexpected loop fault before retrying, in milliseconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,

    /// Grace period for cooperative cancellation, in milliseconds.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    /// Window within which a completed task blocks duplicate submissions, in seconds.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    /// Maximum execution records kept by the tracker.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Per-task-type execution budgets.
    #[serde(default)]
    pub timeouts: TimeoutPolicy,
}

fn default_poll_interval() -> u64 {
    250
}

fn default_error_backoff() -> u64 {
    1000
}

fn default_cancel_grace() -> u64 {
    2000
}

fn default_dedup_window() -> u64 {
    300
}

fn default_history_limit() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            error_backoff_ms: default_error_backoff(),
            cancel_grace_ms: default_cancel_grace(),
            dedup_window_secs: default_dedup_window(),
            history_limit: default_history_limit(),
            timeouts: TimeoutPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Idle poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fault backoff as a `Duration`.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Cancellation grace period as a `Duration`.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Dedup window as a `Duration`.
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}
