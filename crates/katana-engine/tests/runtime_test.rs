// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the embeddable runtime and its retention worker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MemoryStateStore, module};
use katana_core::{BackendKey, ModuleRegistry, StateStore};
use katana_engine::backend::MockBackend;
use katana_engine::retention_worker::{RetentionWorker, RetentionWorkerConfig};
use katana_engine::{EngineRuntime, OperationStatus};
use tempfile::TempDir;

#[test]
fn test_build_requires_registry() {
    let result = EngineRuntime::builder().build();
    let err = result.err().unwrap();
    assert!(err.to_string().contains("registry is required"));
}

#[tokio::test]
async fn test_runtime_installs_with_file_store() {
    let dir = TempDir::new().unwrap();
    let runtime = EngineRuntime::builder()
        .registry(ModuleRegistry::new(vec![module("dvwa", &[])]).unwrap())
        .backend(Arc::new(MockBackend::new(BackendKey::Docker)))
        .state_dir(dir.path().join("state"))
        .build()
        .unwrap()
        .start();
    assert!(runtime.is_running());

    let orchestrator = runtime.orchestrator();
    let id = orchestrator.install("dvwa").await.unwrap();
    let mut subscription = orchestrator.subscribe(&id).unwrap();
    while subscription.receiver.recv().await.is_some() {}

    assert_eq!(
        orchestrator.operation(&id).unwrap().status,
        OperationStatus::Completed
    );
    assert!(dir.path().join("state/installed.json").exists());

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_runtime_retention_sweeps_operations() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::default());
    let runtime = EngineRuntime::builder()
        .registry(ModuleRegistry::new(vec![module("dvwa", &[])]).unwrap())
        .backend(Arc::new(MockBackend::new(BackendKey::Docker)))
        .state_store(store)
        .operation_retention(Duration::from_secs(120))
        .cleanup_interval(Duration::from_secs(30))
        .build()
        .unwrap()
        .start();

    let orchestrator = runtime.orchestrator().clone();
    let id = orchestrator.install("dvwa").await.unwrap();
    let mut subscription = orchestrator.subscribe(&id).unwrap();
    while subscription.receiver.recv().await.is_some() {}
    assert!(orchestrator.operation(&id).is_ok());

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(orchestrator.operation(&id).is_err());

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retention_worker_stops_on_shutdown() {
    let lab = common::TestLab::new(vec![module("dvwa", &[])]);

    let worker = RetentionWorker::new(
        lab.orchestrator.tracker().clone(),
        RetentionWorkerConfig {
            poll_interval: Duration::from_secs(1),
            retention: Duration::from_secs(1),
        },
    );
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.notify_one();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retention_worker_sweep() {
    let lab = common::TestLab::new(vec![module("dvwa", &[])]);
    let id = lab.orchestrator.install("dvwa").await.unwrap();
    lab.wait_terminal(&id).await;

    let worker = RetentionWorker::new(
        lab.orchestrator.tracker().clone(),
        RetentionWorkerConfig {
            poll_interval: Duration::from_secs(1),
            retention: Duration::from_secs(10),
        },
    );
    assert_eq!(worker.sweep(), 0);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(worker.sweep(), 1);
}
