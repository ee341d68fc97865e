// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation tracker.
//!
//! Wraps one lifecycle action against one module in an asynchronous,
//! observable unit of work.
//!
//! ```text
//!   create() ──► QUEUED ──► RUNNING ──┬──► COMPLETED
//!                                    ├──► FAILED
//!                                    └──► FAILED (timed_out)
//! ```
//!
//! Subscribers receive progress events over an unbounded channel. Reaching a
//! terminal state broadcasts exactly one `complete` event and drops every
//! sender under the same lock, so each stream ends right after it. A
//! subscriber attaching later gets a synthetic `complete` and a closed stream.
//!
//! The tracker does not enforce single-flight per module; callers check
//! [`OperationTracker::has_in_progress`] first (see the orchestrator).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use katana_core::{
    Config, DependencyGraph, Error, LifecycleAction, ModuleRegistry, ModuleSpec, Result,
    StateStore, normalize_name,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{LogLevel, ProgressEvent, TaskState};
use crate::executor::{ExecutionListener, ExecutorEvent, TaskExecutor, first_failure};

/// Operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Created, not yet picked up.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error or timed out.
    Failed,
}

impl OperationStatus {
    /// Whether the operation has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Serializable snapshot of an operation, for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation id (UUID v4).
    pub id: String,
    /// Normalized module name.
    pub module: String,
    /// Requested action.
    pub action: LifecycleAction,
    /// Current status.
    pub status: OperationStatus,
    /// When the operation was created.
    pub started_at: DateTime<Utc>,
    /// When the operation reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure message.
    pub error: Option<String>,
    /// Time from creation to terminal state.
    pub duration_ms: Option<u64>,
    /// Whether the failure was the timeout firing.
    #[serde(default)]
    pub timed_out: bool,
}

/// A live progress subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber id, for [`OperationTracker::unsubscribe`].
    pub id: u64,
    /// Ordered event stream; closes after the `complete` event.
    pub receiver: UnboundedReceiver<ProgressEvent>,
}

/// Tracker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Bound on the time an operation may stay non-terminal.
    pub timeout: Duration,
    /// Run dependency start tasks during install.
    pub start_dependencies: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            start_dependencies: true,
        }
    }
}

impl From<&Config> for TrackerConfig {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.operation_timeout,
            start_dependencies: config.start_dependencies,
        }
    }
}

struct Operation {
    info: OperationInfo,
    created: Instant,
    finished: Option<Instant>,
    subscribers: Vec<(u64, UnboundedSender<ProgressEvent>)>,
}

impl Operation {
    fn completion_event(&self) -> ProgressEvent {
        ProgressEvent::Complete {
            success: self.info.status == OperationStatus::Completed,
            error: self.info.error.clone(),
            duration_ms: self.info.duration_ms.unwrap_or(0),
        }
    }
}

struct TrackerInner {
    operations: Mutex<HashMap<String, Operation>>,
    next_subscriber: AtomicU64,
    registry: Arc<ModuleRegistry>,
    executor: Arc<TaskExecutor>,
    store: Arc<dyn StateStore>,
    config: TrackerConfig,
}

/// Tracks lifecycle operations and fans out their progress.
///
/// Cheap to clone; clones share the operation table.
#[derive(Clone)]
pub struct OperationTracker {
    inner: Arc<TrackerInner>,
}

impl OperationTracker {
    /// Create a tracker.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        executor: Arc<TaskExecutor>,
        store: Arc<dyn StateStore>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                operations: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                registry,
                executor,
                store,
                config,
            }),
        }
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<String, Operation>> {
        self.inner
            .operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate an operation and start executing it in the background.
    ///
    /// Returns the operation id immediately. Must be called from within a
    /// tokio runtime.
    pub fn create(&self, module: &str, action: LifecycleAction) -> String {
        let id = Uuid::new_v4().to_string();
        let module = normalize_name(module);

        let operation = Operation {
            info: OperationInfo {
                id: id.clone(),
                module: module.clone(),
                action,
                status: OperationStatus::Queued,
                started_at: Utc::now(),
                completed_at: None,
                error: None,
                duration_ms: None,
                timed_out: false,
            },
            created: Instant::now(),
            finished: None,
            subscribers: Vec::new(),
        };
        self.operations().insert(id.clone(), operation);

        info!(operation_id = %id, module = %module, action = %action, "Operation created");

        let tracker = self.clone();
        let operation_id = id.clone();
        tokio::spawn(async move {
            tracker.run(operation_id, module, action).await;
        });

        id
    }

    /// Whether `module` has a queued or running operation.
    pub fn has_in_progress(&self, module: &str) -> bool {
        let module = normalize_name(module);
        self.operations()
            .values()
            .any(|op| op.info.module == module && !op.info.status.is_terminal())
    }

    /// Attach a progress subscriber.
    ///
    /// If the operation is already terminal, the subscription receives one
    /// synthetic `complete` event and is closed.
    pub fn subscribe(&self, operation_id: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let mut operations = self.operations();
        let operation = operations
            .get_mut(operation_id)
            .ok_or_else(|| Error::OperationNotFound(operation_id.to_string()))?;

        if operation.info.status.is_terminal() {
            let _ = tx.send(operation.completion_event());
            debug!(operation_id = %operation_id, subscriber = id, "Late subscriber, sent completion");
        } else {
            operation.subscribers.push((id, tx));
            debug!(operation_id = %operation_id, subscriber = id, "Subscriber attached");
        }

        Ok(Subscription { id, receiver: rx })
    }

    /// Detach a subscriber. Returns whether it was attached.
    pub fn unsubscribe(&self, operation_id: &str, subscriber_id: u64) -> bool {
        let mut operations = self.operations();
        let Some(operation) = operations.get_mut(operation_id) else {
            return false;
        };
        let before = operation.subscribers.len();
        operation.subscribers.retain(|(id, _)| *id != subscriber_id);
        before != operation.subscribers.len()
    }

    /// Send `event` to every live subscriber of an operation.
    ///
    /// Subscribers whose receiver has been dropped are pruned. Returns the
    /// number of subscribers the event reached. The terminal `complete` event
    /// is emitted by the tracker itself.
    pub fn broadcast(&self, operation_id: &str, event: ProgressEvent) -> usize {
        let mut operations = self.operations();
        let Some(operation) = operations.get_mut(operation_id) else {
            return 0;
        };
        operation
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
        operation.subscribers.len()
    }

    /// Snapshot of one operation.
    pub fn get(&self, operation_id: &str) -> Option<OperationInfo> {
        self.operations()
            .get(operation_id)
            .map(|op| op.info.clone())
    }

    /// Snapshots of every retained operation, oldest first.
    pub fn list(&self) -> Vec<OperationInfo> {
        let mut infos: Vec<OperationInfo> =
            self.operations().values().map(|op| op.info.clone()).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        infos
    }

    /// Drop terminal operations that finished at least `retention` ago.
    pub fn purge_expired(&self, retention: Duration) -> usize {
        let mut operations = self.operations();
        let before = operations.len();
        operations.retain(|_, op| match op.finished {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });
        before - operations.len()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn run(&self, id: String, module: String, action: LifecycleAction) {
        self.set_running(&id);

        let timeout = self.inner.config.timeout;
        let body_tracker = self.clone();
        let body_id = id.clone();
        let body_module = module.clone();
        let mut body = tokio::spawn(async move {
            body_tracker
                .execute_action(&body_id, &body_module, action)
                .await
        });

        let outcome = match tokio::time::timeout(timeout, &mut body).await {
            Ok(Ok(result)) => result.map_err(|e| e.to_string()),
            Ok(Err(join_error)) => Err(format!("Operation task failed: {}", join_error)),
            Err(_) => {
                let err = Error::Timeout {
                    operation_id: id.clone(),
                    timeout,
                };
                error!(
                    operation_id = %id,
                    module = %module,
                    timeout_secs = timeout.as_secs(),
                    "Operation timed out; backend work may still be running"
                );
                self.finish(&id, Err(err.to_string()), true);
                self.watch_detached(id, module, body);
                return;
            }
        };

        self.finish(&id, outcome, false);
    }

    /// Log the late outcome of a body that outlived its timeout.
    fn watch_detached(
        &self,
        id: String,
        module: String,
        body: tokio::task::JoinHandle<Result<()>>,
    ) {
        tokio::spawn(async move {
            match body.await {
                Ok(Ok(())) => warn!(
                    operation_id = %id,
                    module = %module,
                    "Timed-out operation finished successfully after its deadline"
                ),
                Ok(Err(e)) => warn!(
                    operation_id = %id,
                    module = %module,
                    error = %e,
                    "Timed-out operation failed after its deadline"
                ),
                Err(e) => warn!(operation_id = %id, error = %e, "Timed-out operation task aborted"),
            }
        });
    }

    fn set_running(&self, id: &str) {
        if let Some(op) = self.operations().get_mut(id)
            && op.info.status == OperationStatus::Queued
        {
            op.info.status = OperationStatus::Running;
        }
    }

    /// Move an operation to its terminal state, emit the completion event and
    /// release every subscriber, all under one lock.
    fn finish(&self, id: &str, outcome: std::result::Result<(), String>, timed_out: bool) {
        let mut operations = self.operations();
        let Some(op) = operations.get_mut(id) else {
            return;
        };
        if op.info.status.is_terminal() {
            return;
        }

        let duration_ms = op.created.elapsed().as_millis() as u64;
        op.info.completed_at = Some(Utc::now());
        op.info.duration_ms = Some(duration_ms);
        op.info.timed_out = timed_out;
        match outcome {
            Ok(()) => op.info.status = OperationStatus::Completed,
            Err(message) => {
                op.info.status = OperationStatus::Failed;
                op.info.error = Some(message);
            }
        }
        op.finished = Some(Instant::now());

        let event = op.completion_event();
        for (_, tx) in op.subscribers.drain(..) {
            let _ = tx.send(event.clone());
        }

        match &op.info.error {
            None => info!(
                operation_id = %id,
                module = %op.info.module,
                action = %op.info.action,
                duration_ms,
                "Operation completed"
            ),
            Some(e) => warn!(
                operation_id = %id,
                module = %op.info.module,
                action = %op.info.action,
                duration_ms,
                error = %e,
                "Operation failed"
            ),
        }
    }

    async fn execute_action(&self, id: &str, module: &str, action: LifecycleAction) -> Result<()> {
        let spec = self.inner.registry.require(module)?;

        match action {
            LifecycleAction::Install => self.install(id, spec).await,
            LifecycleAction::Remove => {
                self.warn_dependents(id, spec).await?;
                let progress = Progress::new(spec.remove.len());
                self.run_module(id, spec, action, &progress).await?;
                self.inner.store.mark_removed(&spec.name).await?;
                self.progress(id, &progress, format!("Removed {}", spec.normalized_name()));
                Ok(())
            }
            LifecycleAction::Start | LifecycleAction::Stop => {
                let progress = Progress::new(spec.tasks(action).len());
                self.run_module(id, spec, action, &progress).await?;
                self.progress(id, &progress, format!("{} {} done", action, spec.normalized_name()));
                Ok(())
            }
        }
    }

    /// Install dependencies first (fail-fast), then the target.
    async fn install(&self, id: &str, target: &ModuleSpec) -> Result<()> {
        let graph = DependencyGraph::from_registry(&self.inner.registry);
        let order = graph.install_order(&target.name).into_result()?;
        let installed = self.inner.store.get_installed().await?;
        let target_name = target.normalized_name();

        let mut steps: Vec<(&ModuleSpec, LifecycleAction)> = Vec::new();
        for name in order.iter().filter(|name| **name != target_name) {
            let dependency = self.inner.registry.require(name)?;
            if installed.contains_key(name) {
                debug!(operation_id = %id, dependency = %name, "Dependency already installed");
            } else {
                steps.push((dependency, LifecycleAction::Install));
            }
            if self.inner.config.start_dependencies && !dependency.start.is_empty() {
                steps.push((dependency, LifecycleAction::Start));
            }
        }
        steps.push((target, LifecycleAction::Install));

        let total = steps.iter().map(|(spec, action)| spec.tasks(*action).len()).sum();
        let progress = Progress::new(total);

        for (spec, action) in steps {
            let name = spec.normalized_name();
            if name != target_name {
                self.progress(id, &progress, format!("Preparing dependency {}", name));
            }
            self.run_module(id, spec, action, &progress).await?;
            if action == LifecycleAction::Install {
                self.inner
                    .store
                    .mark_installed(&name, spec.version.as_deref())
                    .await?;
                self.progress(id, &progress, format!("Installed {}", name));
            }
        }

        Ok(())
    }

    async fn warn_dependents(&self, id: &str, spec: &ModuleSpec) -> Result<()> {
        let graph = DependencyGraph::from_registry(&self.inner.registry);
        let installed = self.inner.store.get_installed().await?;
        let dependents: Vec<String> = graph
            .dependents(&spec.name)
            .into_iter()
            .filter(|name| installed.contains_key(name))
            .collect();

        if !dependents.is_empty() {
            let message = format!(
                "{} is required by installed modules: {}",
                spec.normalized_name(),
                dependents.join(", ")
            );
            warn!(operation_id = %id, module = %spec.normalized_name(), dependents = ?dependents, "Removing a module others depend on");
            self.broadcast(
                id,
                ProgressEvent::Log {
                    level: LogLevel::Warn,
                    message,
                },
            );
        }
        Ok(())
    }

    async fn run_module(
        &self,
        id: &str,
        spec: &ModuleSpec,
        action: LifecycleAction,
        progress: &Arc<Progress>,
    ) -> Result<()> {
        let module = spec.normalized_name();
        let tasks = spec.tasks(action);
        self.progress(id, progress, format!("Running {} for {}", action, module));

        let listener = Arc::new(ProgressListener {
            tracker: self.clone(),
            operation_id: id.to_string(),
            module: module.clone(),
            progress: progress.clone(),
        });
        let results = self.inner.executor.execute(tasks, action, listener).await;

        match first_failure(&module, &results) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn progress(&self, id: &str, progress: &Progress, message: String) {
        self.broadcast(
            id,
            ProgressEvent::Progress {
                percent: progress.percent(),
                message,
            },
        );
    }
}

impl std::fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTracker")
            .field("operations", &self.operations().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Task completion counter across a whole operation plan.
#[derive(Debug)]
struct Progress {
    done: AtomicUsize,
    total: usize,
}

impl Progress {
    fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            done: AtomicUsize::new(0),
            total,
        })
    }

    fn advance(&self) -> u8 {
        self.done.fetch_add(1, Ordering::SeqCst);
        self.percent()
    }

    fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = self.done.load(Ordering::SeqCst).min(self.total);
        (done * 100 / self.total) as u8
    }
}

/// Turns executor notifications into progress events for one operation.
struct ProgressListener {
    tracker: OperationTracker,
    operation_id: String,
    module: String,
    progress: Arc<Progress>,
}

impl ProgressListener {
    fn task(&self, name: &str, status: TaskState) {
        self.tracker.broadcast(
            &self.operation_id,
            ProgressEvent::Task {
                module: self.module.clone(),
                name: name.to_string(),
                status,
            },
        );
    }
}

impl ExecutionListener for ProgressListener {
    fn on_event(&self, event: &ExecutorEvent) {
        match event {
            ExecutorEvent::BatchStarted { tasks, .. } => {
                for name in tasks {
                    self.task(name, TaskState::Pending);
                }
            }
            ExecutorEvent::TaskStarted { name, .. } => self.task(name, TaskState::Running),
            ExecutorEvent::TaskCompleted(result) => {
                self.task(&result.name, TaskState::Completed);
                let percent = self.progress.advance();
                let message = if result.changed {
                    format!("{}: changed", result.name)
                } else {
                    format!("{}: ok", result.name)
                };
                self.tracker.broadcast(
                    &self.operation_id,
                    ProgressEvent::Progress { percent, message },
                );
            }
            ExecutorEvent::TaskErrored(result) => {
                self.task(&result.name, TaskState::Failed);
                self.progress.advance();
                self.tracker.broadcast(
                    &self.operation_id,
                    ProgressEvent::Log {
                        level: LogLevel::Error,
                        message: format!(
                            "{}: {}",
                            result.name,
                            result.message.as_deref().unwrap_or("failed")
                        ),
                    },
                );
            }
            ExecutorEvent::BatchCompleted { .. } => {}
            ExecutorEvent::Log { level, message, .. } => {
                self.tracker.broadcast(
                    &self.operation_id,
                    ProgressEvent::Log {
                        level: *level,
                        message: message.clone(),
                    },
                );
            }
        }
    }
}
