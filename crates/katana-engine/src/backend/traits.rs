// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend trait definitions.
//!
//! Defines the capability contract every provisioning backend satisfies.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use katana_core::{BackendKey, LifecycleAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::events::LogLevel;
use crate::executor::{ExecutionListener, ExecutorEvent};

/// Errors from backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// A required task parameter is absent or has the wrong type.
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// The backend could not reach the desired state.
    #[error("Backend failed: {0}")]
    Failed(String),

    /// The backend does not support this request.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Outcome of one `execute` call.
///
/// Backends are idempotent: when the desired end state already holds they
/// return `success = true, changed = false` instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOutcome {
    /// Whether the desired end state holds.
    pub success: bool,
    /// Whether this call changed anything.
    pub changed: bool,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackendOutcome {
    /// Desired state reached by making a change.
    pub fn changed() -> Self {
        Self {
            success: true,
            changed: true,
            message: None,
        }
    }

    /// Desired state already held.
    pub fn unchanged() -> Self {
        Self {
            success: true,
            changed: false,
            message: None,
        }
    }

    /// Desired state could not be reached.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: false,
            message: Some(message.into()),
        }
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Log sink handed to a backend through its [`TaskContext`].
///
/// Lines are mirrored to `tracing` and forwarded to the executor's listener,
/// which turns them into `log` progress events.
#[derive(Clone)]
pub struct LogSink {
    task_index: usize,
    listener: Option<Arc<dyn ExecutionListener>>,
}

impl LogSink {
    /// A sink that only writes to `tracing`.
    pub fn discard() -> Self {
        Self {
            task_index: 0,
            listener: None,
        }
    }

    /// A sink forwarding to `listener`, tagged with the task's batch index.
    pub fn forwarding(task_index: usize, listener: Arc<dyn ExecutionListener>) -> Self {
        Self {
            task_index,
            listener: Some(listener),
        }
    }

    /// Write one line.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(task_index = self.task_index, "{}", message),
            LogLevel::Info => info!(task_index = self.task_index, "{}", message),
            LogLevel::Warn => warn!(task_index = self.task_index, "{}", message),
            LogLevel::Error => error!(task_index = self.task_index, "{}", message),
        }
        if let Some(listener) = &self.listener {
            listener.on_event(&ExecutorEvent::Log {
                index: self.task_index,
                level,
                message,
            });
        }
    }

    /// Write a debug line.
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    /// Write an info line.
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Write a warning line.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    /// Write an error line.
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("task_index", &self.task_index)
            .field("forwarding", &self.listener.is_some())
            .finish()
    }
}

/// Per-invocation context passed to [`Backend::execute`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Lifecycle action the task list belongs to.
    pub action: LifecycleAction,
    /// Report what would change without changing it.
    pub dry_run: bool,
    /// Pretend to succeed without touching real resources.
    pub mock: bool,
    /// Where backend log lines go.
    pub log: LogSink,
}

impl TaskContext {
    /// Context with both flags off and a discarding log sink.
    pub fn new(action: LifecycleAction) -> Self {
        Self {
            action,
            dry_run: false,
            mock: false,
            log: LogSink::discard(),
        }
    }
}

/// Trait for provisioning backends.
///
/// One backend serves one [`BackendKey`]. Backends own their side effects;
/// the engine only sequences calls and records outcomes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The task key this backend serves.
    fn key(&self) -> BackendKey;

    /// Drive the resource described by `params` toward the state implied by
    /// the context's action. Must be idempotent.
    async fn execute(&self, params: &Value, ctx: &TaskContext) -> Result<BackendOutcome>;

    /// Whether the resource described by `params` exists.
    async fn exists(&self, params: &Value) -> Result<bool>;

    /// Whether the resource described by `params` is running.
    async fn started(&self, params: &Value) -> Result<bool>;
}

/// Read a required string parameter.
pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::MissingParameter(key.to_string()))
}

/// Read an optional string parameter.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}
