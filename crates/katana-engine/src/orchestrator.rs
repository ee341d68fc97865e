// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle orchestrator.
//!
//! The entry point embedding applications (CLI, HTTP) call. It owns the
//! admission rules the tracker leaves to its caller:
//!
//! 1. the module must be known to the registry,
//! 2. install and remove are rejected while lock mode is enabled,
//! 3. at most one queued or running operation per module.
//!
//! Admission is serialized so two concurrent requests for the same module
//! cannot both pass the single-flight check.

use std::collections::BTreeMap;
use std::sync::Arc;

use katana_core::{
    Config, DependencyGraph, Error, InstalledRecord, LifecycleAction, LockState, ModuleRegistry,
    ModuleSpec, Result, StateStore, normalize_name,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::BackendRegistry;
use crate::executor::{ExecutorOptions, TaskExecutor};
use crate::tracker::{OperationInfo, OperationTracker, Subscription, TrackerConfig};

/// Observed state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Not provisioned.
    NotInstalled,
    /// Provisioned; no running probe declared.
    Installed,
    /// Provisioned and running.
    Running,
    /// Provisioned but not running.
    Stopped,
}

/// Lifecycle orchestrator over one module registry and one state store.
pub struct Orchestrator {
    registry: Arc<ModuleRegistry>,
    graph: DependencyGraph,
    store: Arc<dyn StateStore>,
    executor: Arc<TaskExecutor>,
    tracker: OperationTracker,
    admission: Mutex<()>,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        backends: Arc<BackendRegistry>,
        store: Arc<dyn StateStore>,
        config: &Config,
    ) -> Self {
        let executor = Arc::new(TaskExecutor::new(backends, ExecutorOptions::from(config)));
        let tracker = OperationTracker::new(
            registry.clone(),
            executor.clone(),
            store.clone(),
            TrackerConfig::from(config),
        );
        Self {
            graph: DependencyGraph::from_registry(&registry),
            registry,
            store,
            executor,
            tracker,
            admission: Mutex::new(()),
        }
    }

    /// The operation tracker.
    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// The module registry.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    // ========================================================================
    // Lifecycle requests
    // ========================================================================

    /// Start a lifecycle action and return its operation id.
    pub async fn request(&self, module: &str, action: LifecycleAction) -> Result<String> {
        let module = normalize_name(module);
        self.registry.require(&module)?;

        let _admission = self.admission.lock().await;

        if action.is_mutating() {
            let lock = self.store.get_lock().await?;
            if lock.locked {
                warn!(module = %module, action = %action, "Rejected while locked");
                return Err(Error::Locked { action, module });
            }
        }

        if self.tracker.has_in_progress(&module) {
            debug!(module = %module, action = %action, "Rejected, operation in progress");
            return Err(Error::OperationInProgress { module });
        }

        Ok(self.tracker.create(&module, action))
    }

    /// Request an install.
    pub async fn install(&self, module: &str) -> Result<String> {
        self.request(module, LifecycleAction::Install).await
    }

    /// Request a remove.
    pub async fn remove(&self, module: &str) -> Result<String> {
        self.request(module, LifecycleAction::Remove).await
    }

    /// Request a start.
    pub async fn start(&self, module: &str) -> Result<String> {
        self.request(module, LifecycleAction::Start).await
    }

    /// Request a stop.
    pub async fn stop(&self, module: &str) -> Result<String> {
        self.request(module, LifecycleAction::Stop).await
    }

    /// Subscribe to an operation's progress.
    pub fn subscribe(&self, operation_id: &str) -> Result<Subscription> {
        self.tracker.subscribe(operation_id)
    }

    /// Snapshot of one operation.
    pub fn operation(&self, operation_id: &str) -> Result<OperationInfo> {
        self.tracker
            .get(operation_id)
            .ok_or_else(|| Error::OperationNotFound(operation_id.to_string()))
    }

    /// Snapshots of every retained operation.
    pub fn operations(&self) -> Vec<OperationInfo> {
        self.tracker.list()
    }

    // ========================================================================
    // Dependency queries
    // ========================================================================

    /// Install order for `module`, dependencies first.
    pub fn install_order(&self, module: &str) -> Result<Vec<String>> {
        self.registry.require(module)?;
        self.graph.install_order(module).into_result()
    }

    /// Loaded modules that directly depend on `module`.
    pub fn dependents(&self, module: &str) -> Result<Vec<String>> {
        self.registry.require(module)?;
        Ok(self.graph.dependents(module))
    }

    /// Validate the whole registry, reporting every cycle and every missing
    /// reference in one batch.
    pub fn validate(&self) -> Result<()> {
        let mut errors = self.graph.validate_references();
        errors.extend(self.graph.detect_cycles());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Installed modules.
    pub async fn installed(&self) -> Result<BTreeMap<String, InstalledRecord>> {
        self.store.get_installed().await
    }

    /// Current lock record.
    pub async fn lock(&self) -> Result<LockState> {
        self.store.get_lock().await
    }

    /// Enable lock mode.
    pub async fn enable_lock(&self, actor: Option<&str>, message: Option<&str>) -> Result<LockState> {
        let _admission = self.admission.lock().await;
        let lock = self.store.enable_lock(actor, message).await?;
        info!(modules = ?lock.modules, "Lock mode enabled");
        Ok(lock)
    }

    /// Disable lock mode.
    pub async fn disable_lock(&self) -> Result<()> {
        let _admission = self.admission.lock().await;
        self.store.disable_lock().await?;
        info!("Lock mode disabled");
        Ok(())
    }

    /// Modules users may act on: everything, or only the locked set while
    /// lock mode is enabled.
    pub async fn visible_modules(&self) -> Result<Vec<&ModuleSpec>> {
        let lock = self.store.get_lock().await?;
        Ok(self
            .registry
            .modules()
            .filter(|spec| !lock.locked || lock.contains(&spec.name))
            .collect())
    }

    /// Probe a module's state.
    ///
    /// Declared probes win over the state store; the store only decides for
    /// modules that declare no probes.
    pub async fn status(&self, module: &str) -> Result<ModuleStatus> {
        let spec = self.registry.require(module)?;
        let probes = &spec.status;

        if probes.is_empty() {
            return Ok(if self.store.is_installed(&spec.name).await? {
                ModuleStatus::Installed
            } else {
                ModuleStatus::NotInstalled
            });
        }

        if let Some(running) = &probes.running
            && self.probe(&spec.name, self.executor.probe_started(running).await)
        {
            return Ok(ModuleStatus::Running);
        }

        if let Some(installed) = &probes.installed
            && self.probe(&spec.name, self.executor.probe_exists(installed).await)
        {
            return Ok(if probes.running.is_some() {
                ModuleStatus::Stopped
            } else {
                ModuleStatus::Installed
            });
        }

        Ok(ModuleStatus::NotInstalled)
    }

    fn probe(
        &self,
        module: &str,
        result: std::result::Result<bool, crate::backend::BackendError>,
    ) -> bool {
        result.unwrap_or_else(|e| {
            warn!(module = %normalize_name(module), error = %e, "Status probe failed");
            false
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("modules", &self.registry.len())
            .field("tracker", &self.tracker)
            .finish()
    }
}
