// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task executor.
//!
//! Runs one module's task list against the registered backends, strictly in
//! declared order. The executor persists nothing; it reports lifecycle
//! notifications to an [`ExecutionListener`] and returns one [`TaskResult`]
//! per task that ran.

use std::sync::Arc;
use std::time::Instant;

use katana_core::{BackendKey, Config, Error, LifecycleAction, Task, TaskAction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BackendRegistry, LogSink, TaskContext};
use crate::events::LogLevel;

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Position in the batch.
    pub index: usize,
    /// Task display name.
    pub name: String,
    /// Backend the task was dispatched to.
    pub backend: BackendKey,
    /// Whether the task reached its desired state.
    pub success: bool,
    /// Whether the task changed anything.
    pub changed: bool,
    /// Backend message or failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall time spent in the backend.
    pub duration_ms: u64,
}

/// Lifecycle notifications emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// A batch is about to run.
    BatchStarted {
        /// Action the batch belongs to.
        action: LifecycleAction,
        /// Display names of every task in the batch, in order.
        tasks: Vec<String>,
    },
    /// A task is about to be dispatched.
    TaskStarted {
        /// Position in the batch.
        index: usize,
        /// Task display name.
        name: String,
        /// Target backend.
        backend: BackendKey,
    },
    /// A task succeeded.
    TaskCompleted(TaskResult),
    /// A task failed.
    TaskErrored(TaskResult),
    /// The batch finished (fully or aborted).
    BatchCompleted {
        /// Tasks that succeeded.
        succeeded: usize,
        /// Tasks that failed.
        failed: usize,
        /// Tasks never run because the batch aborted.
        skipped: usize,
    },
    /// A backend wrote to its log sink.
    Log {
        /// Position of the emitting task.
        index: usize,
        /// Severity.
        level: LogLevel,
        /// Log text.
        message: String,
    },
}

/// Observer of executor notifications.
pub trait ExecutionListener: Send + Sync {
    /// Called synchronously for every notification.
    fn on_event(&self, event: &ExecutorEvent);
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ExecutionListener for NoopListener {
    fn on_event(&self, _event: &ExecutorEvent) {}
}

/// Executor policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Abort the remaining tasks on the first failure.
    pub stop_on_error: bool,
    /// Passed through to every [`TaskContext`].
    pub dry_run: bool,
    /// Passed through to every [`TaskContext`].
    pub mock: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            stop_on_error: true,
            dry_run: false,
            mock: false,
        }
    }
}

impl From<&Config> for ExecutorOptions {
    fn from(config: &Config) -> Self {
        Self {
            stop_on_error: config.stop_on_error,
            dry_run: config.dry_run,
            mock: config.mock,
        }
    }
}

/// Runs task lists against registered backends.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    backends: Arc<BackendRegistry>,
    options: ExecutorOptions,
}

impl TaskExecutor {
    /// Create an executor over `backends`.
    pub fn new(backends: Arc<BackendRegistry>, options: ExecutorOptions) -> Self {
        Self { backends, options }
    }

    /// Executor policy.
    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Registered backends.
    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Run `tasks` in order for `action`.
    ///
    /// With `stop_on_error`, the first failing task ends the batch and the
    /// returned results stop there. Otherwise every task runs and every
    /// result is returned.
    pub async fn execute(
        &self,
        tasks: &[Task],
        action: LifecycleAction,
        listener: Arc<dyn ExecutionListener>,
    ) -> Vec<TaskResult> {
        info!(action = %action, tasks = tasks.len(), "Executing task batch");
        listener.on_event(&ExecutorEvent::BatchStarted {
            action,
            tasks: tasks.iter().map(Task::display_name).collect(),
        });

        let mut results = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            let result = self.run_task(index, task, action, &listener).await;
            let failed = !result.success;

            if failed {
                listener.on_event(&ExecutorEvent::TaskErrored(result.clone()));
            } else {
                listener.on_event(&ExecutorEvent::TaskCompleted(result.clone()));
            }
            results.push(result);

            if failed && self.options.stop_on_error {
                warn!(
                    action = %action,
                    task = %task.display_name(),
                    remaining = tasks.len() - index - 1,
                    "Task failed, aborting batch"
                );
                break;
            }
        }

        let failed = results.iter().filter(|r| !r.success).count();
        listener.on_event(&ExecutorEvent::BatchCompleted {
            succeeded: results.len() - failed,
            failed,
            skipped: tasks.len() - results.len(),
        });
        results
    }

    async fn run_task(
        &self,
        index: usize,
        task: &Task,
        action: LifecycleAction,
        listener: &Arc<dyn ExecutionListener>,
    ) -> TaskResult {
        let name = task.display_name();
        let key = task.action.key();
        listener.on_event(&ExecutorEvent::TaskStarted {
            index,
            name: name.clone(),
            backend: key,
        });

        let start = Instant::now();
        let mut result = TaskResult {
            index,
            name,
            backend: key,
            success: false,
            changed: false,
            message: None,
            duration_ms: 0,
        };

        let Some(backend) = self.backends.get(key) else {
            result.message = Some(format!("No backend registered for '{}'", key));
            return result;
        };

        let ctx = TaskContext {
            action,
            dry_run: self.options.dry_run,
            mock: self.options.mock,
            log: LogSink::forwarding(index, listener.clone()),
        };

        match backend.execute(task.action.params(), &ctx).await {
            Ok(outcome) => {
                result.success = outcome.success;
                result.changed = outcome.changed;
                result.message = outcome.message;
                if result.success && result.message.is_none() && !result.changed {
                    result.message = Some("already in desired state".to_string());
                }
            }
            Err(e) => {
                result.message = Some(e.to_string());
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            task = %result.name,
            backend = %key,
            success = result.success,
            changed = result.changed,
            duration_ms = result.duration_ms,
            "Task finished"
        );
        result
    }

    /// Run a status probe through its backend's `exists` check.
    pub async fn probe_exists(&self, probe: &TaskAction) -> Result<bool, BackendError> {
        let backend = self.probe_backend(probe)?;
        backend.exists(probe.params()).await
    }

    /// Run a status probe through its backend's `started` check.
    pub async fn probe_started(&self, probe: &TaskAction) -> Result<bool, BackendError> {
        let backend = self.probe_backend(probe)?;
        backend.started(probe.params()).await
    }

    fn probe_backend(
        &self,
        probe: &TaskAction,
    ) -> Result<Arc<dyn crate::backend::Backend>, BackendError> {
        self.backends.get(probe.key()).ok_or_else(|| {
            BackendError::Unsupported(format!("No backend registered for '{}'", probe.key()))
        })
    }
}

/// The first failed task as an error naming the module and task.
pub fn first_failure(module: &str, results: &[TaskResult]) -> Option<Error> {
    results.iter().find(|r| !r.success).map(|r| Error::Backend {
        module: module.to_string(),
        task: r.name.clone(),
        message: r
            .message
            .clone()
            .unwrap_or_else(|| "backend reported failure".to_string()),
    })
}
