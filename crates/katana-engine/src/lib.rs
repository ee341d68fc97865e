// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Katana Engine - Lab Module Lifecycle Orchestration
//!
//! This crate executes lifecycle actions (install, remove, start, stop)
//! against lab modules. It sequences each module's tasks through pluggable
//! backends, installs dependencies first, records results in the state
//! store, and streams progress to any number of observers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Embedding application (CLI, HTTP)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ request(module, action)        ▲ ProgressEvent stream
//!                ▼                                │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ Orchestrator   admission: known module · lock mode · single-flight  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ create()
//!                ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ OperationTracker   queued → running → completed | failed            │
//! │   subscribers · timeout · retention                                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │ install_order()        │ execute(tasks)          │ mark_*()
//!        ▼                        ▼                         ▼
//! ┌───────────────┐   ┌──────────────────────┐   ┌──────────────────────┐
//! │DependencyGraph│   │ TaskExecutor         │   │ StateStore           │
//! │ (katana-core) │   │  → BackendRegistry   │   │ (katana-core)        │
//! └───────────────┘   │    → dyn Backend     │   └──────────────────────┘
//!                     └──────────────────────┘
//! ```
//!
//! # Progress Events
//!
//! | Event | Meaning |
//! |-------|---------|
//! | `progress` | Percent-complete hint across the whole plan plus a message |
//! | `task` | A sub-task moved to pending, running, completed or failed |
//! | `log` | A severity-tagged line written by a backend |
//! | `complete` | Terminal event, exactly once per subscriber |
//!
//! # Known Limitation
//!
//! An operation timeout marks the operation failed but does not cancel the
//! backend call underneath it. The body keeps running detached; if it later
//! succeeds its state store updates still land.
//!
//! # Modules
//!
//! - [`backend`]: Backend capability contract, registry and mock backend
//! - [`events`]: Progress event vocabulary
//! - [`executor`]: Ordered task execution
//! - [`tracker`]: Operation tracking and progress fan-out
//! - [`orchestrator`]: Admission rules and queries
//! - [`retention_worker`]: Garbage collection of finished operations
//! - [`runtime`]: Embeddable runtime and builder

#![deny(missing_docs)]

/// Provisioning backend contract.
pub mod backend;

/// Progress events delivered to subscribers.
pub mod events;

/// Task list execution.
pub mod executor;

/// Asynchronous operation tracking.
pub mod tracker;

/// Lifecycle entry point.
pub mod orchestrator;

/// Background worker for purging finished operations.
pub mod retention_worker;

/// Embeddable runtime.
pub mod runtime;

pub use backend::{Backend, BackendError, BackendOutcome, BackendRegistry, MockBackend, TaskContext};
pub use events::{LogLevel, ProgressEvent, TaskState};
pub use executor::{ExecutionListener, ExecutorEvent, ExecutorOptions, TaskExecutor, TaskResult};
pub use orchestrator::{ModuleStatus, Orchestrator};
pub use runtime::EngineRuntime;
pub use tracker::{OperationInfo, OperationStatus, OperationTracker, Subscription};
