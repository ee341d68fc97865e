// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for katana.
//!
//! A single error enum covers the whole engine so that callers (CLI, HTTP
//! surface) can map any failure to a stable error code.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::module::LifecycleAction;

/// Result type using the katana [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// A problem found while validating the module graph.
///
/// Validation errors are collected rather than returned on first sight, so a
/// whole module set can be diagnosed in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// The requested module is not among the loaded modules.
    MissingModule {
        /// Normalized name that was requested.
        name: String,
    },

    /// A module depends on a module that is not loaded.
    MissingDependency {
        /// The module declaring the dependency.
        dependent: String,
        /// The dependency that could not be found.
        missing: String,
    },

    /// A dependency cycle. The path starts and ends on the same module.
    CircularDependency {
        /// Full cycle path, e.g. `["a", "b", "a"]`.
        path: Vec<String>,
    },

    /// Two loaded modules normalize to the same name.
    DuplicateModule {
        /// The clashing normalized name.
        name: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingModule { name } => write!(f, "Module '{}' not found", name),
            Self::MissingDependency { dependent, missing } => write!(
                f,
                "Module '{}' depends on '{}', which is not a known module",
                dependent, missing
            ),
            Self::CircularDependency { path } => {
                write!(f, "Circular dependency detected: {}", path.join(" → "))
            }
            Self::DuplicateModule { name } => {
                write!(f, "Module '{}' is defined more than once", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Katana errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The module graph is invalid (missing or circular dependencies).
    #[error("Dependency validation failed: {}", join_validation(.0))]
    Validation(Vec<ValidationError>),

    /// A task's backend invocation failed.
    #[error("Task '{task}' of module '{module}' failed: {message}")]
    Backend {
        /// Module whose task list was running.
        module: String,
        /// Display name of the failing task.
        task: String,
        /// Underlying backend message.
        message: String,
    },

    /// Module is not known to the registry.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Operation id is unknown (or already garbage-collected).
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// A mutating action was attempted while lock mode is enabled.
    #[error("Cannot {action} '{module}': the lab is locked")]
    Locked {
        /// The rejected action.
        action: LifecycleAction,
        /// The module it targeted.
        module: String,
    },

    /// An operation exceeded its time bound without reaching a terminal state.
    #[error(
        "Operation {operation_id} timed out after {}s; backend work may still be running",
        .timeout.as_secs()
    )]
    Timeout {
        /// The timed-out operation.
        operation_id: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// A module already has a queued or running operation.
    #[error("Module '{module}' already has an operation in progress")]
    OperationInProgress {
        /// The busy module.
        module: String,
    },

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Backend { .. } => "BACKEND_ERROR",
            Self::ModuleNotFound(_) | Self::OperationNotFound(_) => "NOT_FOUND",
            Self::Locked { .. } => "LOCKED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::OperationInProgress { .. } => "IN_PROGRESS",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) | Self::Json(_) => "STATE_ERROR",
        }
    }

    /// Validation errors carried by this error, if any.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
