// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress event vocabulary.
//!
//! Events are delivered per operation, in order, to every subscriber. The
//! JSON shape is tagged by `type` so any push transport can forward them as-is:
//!
//! ```json
//! {"type": "progress", "percent": 50, "message": "Installing dvwa"}
//! {"type": "task", "module": "dvwa", "name": "Create container", "status": "running"}
//! {"type": "log", "level": "warn", "message": "image pull slow"}
//! {"type": "complete", "success": true, "error": null, "duration_ms": 5310}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Something unexpected that did not fail the task.
    Warn,
    /// A failure.
    Error,
}

impl LogLevel {
    /// Lowercase level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one sub-task as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Scheduled, not started.
    Pending,
    /// Backend call in flight.
    Running,
    /// Backend reported success.
    Completed,
    /// Backend reported failure or errored.
    Failed,
}

/// One event in an operation's progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Percent-complete hint with a human-readable message.
    Progress {
        /// 0..=100 across the whole operation plan.
        percent: u8,
        /// What is happening now.
        message: String,
    },
    /// Sub-task status transition.
    Task {
        /// Module the task belongs to.
        module: String,
        /// Task display name.
        name: String,
        /// New status.
        status: TaskState,
    },
    /// Raw log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// Log text.
        message: String,
    },
    /// Terminal event, delivered exactly once per subscriber.
    Complete {
        /// Whether the operation completed successfully.
        success: bool,
        /// Failure message, if any.
        error: Option<String>,
        /// Wall time from start to terminal state.
        duration_ms: u64,
    },
}

impl ProgressEvent {
    /// Whether this is the terminal completion event.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = ProgressEvent::Task {
            module: "dvwa".into(),
            name: "Create container".into(),
            status: TaskState::Running,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "task", "module": "dvwa", "name": "Create container", "status": "running"})
        );

        let event = ProgressEvent::Complete {
            success: false,
            error: Some("boom".into()),
            duration_ms: 12,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "complete", "success": false, "error": "boom", "duration_ms": 12})
        );
        assert!(event.is_complete());
    }

    #[test]
    fn test_log_event_parses() {
        let event: ProgressEvent =
            serde_json::from_str(r#"{"type": "log", "level": "warn", "message": "slow"}"#).unwrap();
        assert_eq!(
            event,
            ProgressEvent::Log {
                level: LogLevel::Warn,
                message: "slow".into()
            }
        );
    }
}
