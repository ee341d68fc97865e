// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Katana Core - Module Model, Dependency Resolution and Lab State
//!
//! This crate holds the synchronous building blocks of the katana lab
//! orchestrator: the module spec model, the dependency resolver, and the
//! durable state store. The async engine (`katana-engine`) drives these.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                   katana-engine (Orchestrator)                     │
//! │        operation tracker · task executor · backend registry        │
//! └────────────────────────────────────────────────────────────────────┘
//!           │                       │                        │
//!           ▼                       ▼                        ▼
//! ┌──────────────────┐   ┌────────────────────┐   ┌────────────────────┐
//! │  ModuleRegistry  │──►│  DependencyGraph   │   │    StateStore      │
//! │  (module specs)  │   │ cycles · ordering  │   │ installed · lock   │
//! └──────────────────┘   └────────────────────┘   └─────────┬──────────┘
//!                                                           │
//!                                                           ▼
//!                                               ┌────────────────────────┐
//!                                               │ <state_dir>/           │
//!                                               │   installed.json       │
//!                                               │   lock.json            │
//!                                               └────────────────────────┘
//! ```
//!
//! # Install Ordering
//!
//! [`DependencyGraph::install_order`] only considers the target's transitive
//! dependency closure. Missing references and cycles inside the closure fail
//! the whole resolution; unrelated broken modules elsewhere in the registry do
//! not.
//!
//! ```
//! use katana_core::{DependencyGraph, ModuleSpec};
//!
//! let mut a = ModuleSpec::new("a", "targets");
//! a.depends_on = vec!["b".into()];
//! let mut b = ModuleSpec::new("b", "base");
//! b.depends_on = vec!["c".into()];
//! let c = ModuleSpec::new("c", "base");
//!
//! let graph = DependencyGraph::build([&a, &b, &c]);
//! let order = graph.install_order("a").into_result().unwrap();
//! assert_eq!(order, vec!["c", "b", "a"]);
//! ```
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`error`]: Error types and stable error codes
//! - [`module`]: Module specs, tasks and lifecycle actions
//! - [`registry`]: Read-only module registry
//! - [`resolver`]: Dependency graph, cycle detection and install ordering
//! - [`persistence`]: Installed-module and lock state storage

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Error types for katana operations.
pub mod error;

/// Module spec model.
pub mod module;

/// Read-only registry of loaded module specs.
pub mod registry;

/// Dependency resolution.
pub mod resolver;

/// Durable lab state.
pub mod persistence;

pub use config::{Config, ConfigError};
pub use error::{Error, Result, ValidationError};
pub use module::{
    BackendKey, LifecycleAction, ModuleSpec, StatusProbes, Task, TaskAction, normalize_name,
};
pub use persistence::{FileStateStore, InstalledRecord, LockState, StateStore};
pub use registry::ModuleRegistry;
pub use resolver::{DependencyGraph, InstallPlan};
