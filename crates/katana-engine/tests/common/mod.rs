// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for katana-engine tests.
//!
//! Provides a TestLab wiring an orchestrator to mock backends and either an
//! in-memory or a file-backed state store.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use katana_core::{
    BackendKey, Config, FileStateStore, InstalledRecord, LockState, ModuleRegistry, ModuleSpec,
    Result, StateStore, StatusProbes, Task, TaskAction, normalize_name,
};
use katana_engine::backend::{BackendRegistry, MockBackend};
use katana_engine::{OperationInfo, Orchestrator, ProgressEvent};

/// State store kept in memory, for tests running on a paused clock.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    installed: Mutex<BTreeMap<String, InstalledRecord>>,
    lock: Mutex<LockState>,
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_installed(&self) -> Result<BTreeMap<String, InstalledRecord>> {
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn mark_installed(&self, name: &str, version: Option<&str>) -> Result<()> {
        self.installed.lock().unwrap().insert(
            normalize_name(name),
            InstalledRecord {
                installed_at: Utc::now(),
                version: version.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn mark_removed(&self, name: &str) -> Result<()> {
        self.installed.lock().unwrap().remove(&normalize_name(name));
        Ok(())
    }

    async fn get_lock(&self) -> Result<LockState> {
        Ok(self.lock.lock().unwrap().clone())
    }

    async fn enable_lock(&self, actor: Option<&str>, message: Option<&str>) -> Result<LockState> {
        let mut lock = self.lock.lock().unwrap();
        if !lock.locked {
            *lock = LockState {
                locked: true,
                modules: self.installed.lock().unwrap().keys().cloned().collect(),
                locked_by: actor.map(str::to_string),
                message: message.map(str::to_string),
                locked_at: Some(Utc::now()),
            };
        }
        Ok(lock.clone())
    }

    async fn disable_lock(&self) -> Result<()> {
        *self.lock.lock().unwrap() = LockState::default();
        Ok(())
    }
}

/// A docker task for resource `name`.
pub fn docker(name: &str) -> Task {
    Task::named(format!("container {}", name), TaskAction::Docker(json!({ "name": name })))
}

/// A service task for resource `name`.
pub fn service(name: &str) -> Task {
    Task::named(format!("service {}", name), TaskAction::Service(json!({ "name": name })))
}

/// A module backed by one container, with status probes on that container.
pub fn module(name: &str, depends_on: &[&str]) -> ModuleSpec {
    let mut spec = ModuleSpec::new(name, "targets");
    spec.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
    spec.install = vec![docker(name)];
    spec.remove = vec![docker(name)];
    spec.start = vec![docker(name)];
    spec.stop = vec![docker(name)];
    spec.status = StatusProbes {
        installed: Some(TaskAction::Docker(json!({ "name": name }))),
        running: Some(TaskAction::Docker(json!({ "name": name }))),
    };
    spec
}

/// Test configuration with a short timeout and retention.
pub fn test_config(state_dir: &std::path::Path) -> Config {
    Config {
        state_dir: state_dir.to_path_buf(),
        operation_timeout: Duration::from_secs(60),
        operation_retention: Duration::from_secs(600),
        cleanup_interval: Duration::from_secs(30),
        ..Config::default()
    }
}

/// Orchestrator wired to mock docker and service backends.
pub struct TestLab {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn StateStore>,
    pub docker: MockBackend,
    pub service: MockBackend,
    pub config: Config,
    _temp_dir: TempDir,
}

impl TestLab {
    /// Lab with an in-memory state store.
    pub fn new(modules: Vec<ModuleSpec>) -> Self {
        Self::with_config(modules, |_| {})
    }

    /// Lab with an in-memory state store and a tweaked config.
    pub fn with_config(modules: Vec<ModuleSpec>, tweak: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        tweak(&mut config);
        Self::build(modules, config, Arc::new(MemoryStateStore::default()), temp_dir)
    }

    /// Lab with a file-backed state store in a temporary directory.
    pub fn with_files(modules: Vec<ModuleSpec>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let store = Arc::new(FileStateStore::new(temp_dir.path()));
        Self::build(modules, config, store, temp_dir)
    }

    fn build(
        modules: Vec<ModuleSpec>,
        config: Config,
        store: Arc<dyn StateStore>,
        temp_dir: TempDir,
    ) -> Self {
        let docker = MockBackend::new(BackendKey::Docker);
        let service = MockBackend::new(BackendKey::Service);
        Self::build_with_backends(modules, config, store, temp_dir, docker, service)
    }

    /// Lab with caller-supplied mock backends.
    pub fn build_with_backends(
        modules: Vec<ModuleSpec>,
        config: Config,
        store: Arc<dyn StateStore>,
        temp_dir: TempDir,
        docker: MockBackend,
        service: MockBackend,
    ) -> Self {
        let registry = ModuleRegistry::new(modules).unwrap();
        let backends = BackendRegistry::new()
            .with(Arc::new(docker.clone()))
            .with(Arc::new(service.clone()));
        let orchestrator =
            Orchestrator::new(Arc::new(registry), Arc::new(backends), store.clone(), &config);

        Self {
            orchestrator,
            store,
            docker,
            service,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Run an action to completion, returning every event and the final snapshot.
    pub async fn run(
        &self,
        module: &str,
        action: katana_core::LifecycleAction,
    ) -> (Vec<ProgressEvent>, OperationInfo) {
        let id = self.orchestrator.request(module, action).await.unwrap();
        let events = self.follow(&id).await;
        (events, self.orchestrator.operation(&id).unwrap())
    }

    /// Subscribe to an operation and collect events until the stream closes.
    pub async fn follow(&self, operation_id: &str) -> Vec<ProgressEvent> {
        let mut subscription = self.orchestrator.subscribe(operation_id).unwrap();
        let mut events = Vec::new();
        while let Some(event) = subscription.receiver.recv().await {
            events.push(event);
        }
        events
    }

    /// Poll until an operation is terminal.
    pub async fn wait_terminal(&self, operation_id: &str) -> OperationInfo {
        loop {
            let info = self.orchestrator.operation(operation_id).unwrap();
            if info.status.is_terminal() {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Normalized names in the state store.
    pub async fn installed_names(&self) -> Vec<String> {
        self.store.get_installed().await.unwrap().into_keys().collect()
    }
}

/// Completion events in a stream.
pub fn completions(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
    events.iter().filter(|e| e.is_complete()).collect()
}
