// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end lifecycle tests through the orchestrator with mock backends.

mod common;

use common::{TestLab, completions, docker, module, service};
use katana_core::{Error, LifecycleAction, ValidationError};
use katana_engine::backend::MockResourceState;
use katana_engine::{LogLevel, ModuleStatus, OperationStatus, ProgressEvent, TaskState};

fn chain() -> Vec<katana_core::ModuleSpec> {
    vec![module("a", &["b"]), module("b", &["c"]), module("c", &[])]
}

// ============================================================================
// Install Tests
// ============================================================================

#[tokio::test]
async fn test_install_order_chain() {
    let lab = TestLab::new(chain());
    assert_eq!(lab.orchestrator.install_order("A").unwrap(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_install_brings_in_dependencies_first() {
    let lab = TestLab::new(chain());

    let (events, info) = lab.run("a", LifecycleAction::Install).await;

    assert_eq!(info.status, OperationStatus::Completed);
    assert_eq!(lab.installed_names().await, vec!["a", "b", "c"]);

    // Each dependency is installed, then started, before the target is provisioned.
    let running: Vec<(String, String)> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Task { module, name, status: TaskState::Running } => {
                Some((module.clone(), name.clone()))
            }
            _ => None,
        })
        .collect();
    let modules: Vec<&str> = running.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(modules, vec!["c", "c", "b", "b", "a"]);

    // Dependencies end up running; the target is only installed.
    assert_eq!(lab.docker.state_of("c").await, Some(MockResourceState::Running));
    assert_eq!(lab.docker.state_of("b").await, Some(MockResourceState::Running));
    assert_eq!(lab.docker.state_of("a").await, Some(MockResourceState::Stopped));
}

#[tokio::test]
async fn test_install_skips_installed_dependencies() {
    let lab = TestLab::with_config(chain(), |c| c.start_dependencies = false);

    lab.run("b", LifecycleAction::Install).await;
    let executions = lab.docker.execution_count();
    assert_eq!(executions, 2);

    lab.run("a", LifecycleAction::Install).await;
    // Only the target's own install task ran.
    assert_eq!(lab.docker.execution_count(), executions + 1);
}

#[tokio::test]
async fn test_progress_reaches_100_and_complete_is_last() {
    let lab = TestLab::new(chain());

    let (events, _) = lab.run("a", LifecycleAction::Install).await;

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.last(), Some(&100));

    assert_eq!(completions(&events).len(), 1);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete { success: true, error: None, .. })
    ));
}

#[tokio::test]
async fn test_dependency_failure_aborts_install() {
    let lab = TestLab::new(chain());
    lab.docker.fail_on("b").await;

    let (events, info) = lab.run("a", LifecycleAction::Install).await;

    assert_eq!(info.status, OperationStatus::Failed);
    let error = info.error.unwrap();
    assert!(error.contains("container b"), "{}", error);
    assert!(error.contains("'b'"), "{}", error);

    // c stays installed, no partial records for b or a, and a was never touched.
    assert_eq!(lab.installed_names().await, vec!["c"]);
    assert_eq!(lab.docker.state_of("a").await, None);

    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Task { module, status: TaskState::Failed, .. } if module == "b"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Log { level: LogLevel::Error, .. }
    )));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete { success: false, .. })
    ));
}

#[tokio::test]
async fn test_install_with_cycle_fails_validation() {
    let lab = TestLab::new(vec![module("a", &["b"]), module("b", &["a"])]);

    let (_, info) = lab.run("a", LifecycleAction::Install).await;

    assert_eq!(info.status, OperationStatus::Failed);
    assert!(info.error.unwrap().contains("Circular dependency"));
    assert!(lab.installed_names().await.is_empty());
    assert_eq!(lab.docker.execution_count(), 0);
}

#[tokio::test]
async fn test_unregistered_backend_fails_operation() {
    let mut spec = module("dvwa", &[]);
    spec.install.push(katana_core::Task::named(
        "Clone sources",
        katana_core::TaskAction::Git(serde_json::json!({"name": "dvwa"})),
    ));
    let lab = TestLab::new(vec![spec]);

    let (_, info) = lab.run("dvwa", LifecycleAction::Install).await;

    assert_eq!(info.status, OperationStatus::Failed);
    let error = info.error.unwrap();
    assert!(error.contains("No backend registered for 'git'"), "{}", error);
    assert!(error.contains("Clone sources"), "{}", error);
    assert!(lab.installed_names().await.is_empty());
}

#[tokio::test]
async fn test_continue_on_error_still_fails_module() {
    let mut spec = module("dvwa", &[]);
    spec.install = vec![docker("dvwa"), docker("broken"), service("dvwa-db")];
    let lab = TestLab::with_config(vec![spec], |c| c.stop_on_error = false);
    lab.docker.fail_on("broken").await;

    let (_, info) = lab.run("dvwa", LifecycleAction::Install).await;

    assert_eq!(info.status, OperationStatus::Failed);
    // The task after the failure still ran.
    assert_eq!(lab.service.execution_count(), 1);
    assert!(lab.installed_names().await.is_empty());
}

#[tokio::test]
async fn test_file_store_records_install() {
    let lab = TestLab::with_files(vec![module("dvwa", &[])]);

    let (_, info) = lab.run("dvwa", LifecycleAction::Install).await;

    assert_eq!(info.status, OperationStatus::Completed);
    assert_eq!(lab.installed_names().await, vec!["dvwa"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_installs_keep_every_record_in_file_store() {
    let names: Vec<String> = (0..12).map(|i| format!("lab{:02}", i)).collect();
    let lab = TestLab::with_files(names.iter().map(|n| module(n, &[])).collect());

    let mut ids = Vec::new();
    for name in &names {
        ids.push(lab.orchestrator.install(name).await.unwrap());
    }
    for id in &ids {
        assert_eq!(lab.wait_terminal(id).await.status, OperationStatus::Completed);
    }

    assert_eq!(lab.installed_names().await, names);
}

// ============================================================================
// Remove / Start / Stop Tests
// ============================================================================

#[tokio::test]
async fn test_remove_warns_about_installed_dependents() {
    let lab = TestLab::new(chain());
    lab.run("a", LifecycleAction::Install).await;

    let (events, info) = lab.run("c", LifecycleAction::Remove).await;

    // Removal is not blocked by dependents.
    assert_eq!(info.status, OperationStatus::Completed);
    assert_eq!(lab.installed_names().await, vec!["a", "b"]);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Log { level: LogLevel::Warn, message } if message.contains("b")
    )));
}

#[tokio::test]
async fn test_start_stop_and_status() {
    let lab = TestLab::new(vec![module("dvwa", &[])]);
    assert_eq!(
        lab.orchestrator.status("dvwa").await.unwrap(),
        ModuleStatus::NotInstalled
    );

    lab.run("dvwa", LifecycleAction::Install).await;
    assert_eq!(lab.orchestrator.status("dvwa").await.unwrap(), ModuleStatus::Stopped);

    lab.run("dvwa", LifecycleAction::Start).await;
    assert_eq!(lab.orchestrator.status("DVWA").await.unwrap(), ModuleStatus::Running);

    lab.run("dvwa", LifecycleAction::Stop).await;
    assert_eq!(lab.orchestrator.status("dvwa").await.unwrap(), ModuleStatus::Stopped);

    let (_, info) = lab.run("dvwa", LifecycleAction::Remove).await;
    assert_eq!(info.status, OperationStatus::Completed);
    assert_eq!(
        lab.orchestrator.status("dvwa").await.unwrap(),
        ModuleStatus::NotInstalled
    );
    assert!(lab.installed_names().await.is_empty());
}

#[tokio::test]
async fn test_status_without_probes_uses_state_store() {
    let mut spec = module("notes", &[]);
    spec.status = Default::default();
    let lab = TestLab::new(vec![spec]);

    assert_eq!(
        lab.orchestrator.status("notes").await.unwrap(),
        ModuleStatus::NotInstalled
    );
    lab.run("notes", LifecycleAction::Install).await;
    assert_eq!(lab.orchestrator.status("notes").await.unwrap(), ModuleStatus::Installed);
}

#[tokio::test]
async fn test_status_with_only_installed_probe() {
    let mut spec = module("tool", &[]);
    spec.status.running = None;
    let lab = TestLab::new(vec![spec]);

    lab.run("tool", LifecycleAction::Install).await;
    assert_eq!(lab.orchestrator.status("tool").await.unwrap(), ModuleStatus::Installed);
}

// ============================================================================
// Lock Mode Tests
// ============================================================================

#[tokio::test]
async fn test_lock_rejects_install_but_allows_stop() {
    let lab = TestLab::new(vec![module("dvwa", &[]), module("juiceshop", &[])]);
    lab.run("dvwa", LifecycleAction::Install).await;
    lab.run("dvwa", LifecycleAction::Start).await;

    let lock = lab.orchestrator.enable_lock(Some("instructor"), None).await.unwrap();
    assert_eq!(lock.modules, vec!["dvwa"]);

    let err = lab.orchestrator.install("juiceshop").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Locked { action: LifecycleAction::Install, ref module } if module == "juiceshop"
    ));
    assert_eq!(err.error_code(), "LOCKED");

    let err = lab.orchestrator.remove("dvwa").await.unwrap_err();
    assert!(matches!(err, Error::Locked { action: LifecycleAction::Remove, .. }));

    let (_, info) = lab.run("dvwa", LifecycleAction::Stop).await;
    assert_eq!(info.status, OperationStatus::Completed);
    assert_eq!(lab.docker.state_of("dvwa").await, Some(MockResourceState::Stopped));
}

#[tokio::test]
async fn test_visible_modules_follow_lock() {
    let lab = TestLab::new(vec![module("dvwa", &[]), module("juiceshop", &[])]);
    lab.run("dvwa", LifecycleAction::Install).await;

    let all: Vec<&str> = lab
        .orchestrator
        .visible_modules()
        .await
        .unwrap()
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(all, vec!["dvwa", "juiceshop"]);

    lab.orchestrator.enable_lock(None, None).await.unwrap();
    let locked: Vec<&str> = lab
        .orchestrator
        .visible_modules()
        .await
        .unwrap()
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(locked, vec!["dvwa"]);

    lab.orchestrator.disable_lock().await.unwrap();
    assert!(!lab.orchestrator.lock().await.unwrap().locked);
    let id = lab.orchestrator.install("juiceshop").await.unwrap();
    lab.follow(&id).await;
}

// ============================================================================
// Admission and Query Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_module_rejected() {
    let lab = TestLab::new(chain());

    let err = lab.orchestrator.install("nope").await.unwrap_err();
    assert!(matches!(err, Error::ModuleNotFound(ref name) if name == "nope"));
    assert_eq!(err.error_code(), "NOT_FOUND");

    let err = lab.orchestrator.operation("missing-op").unwrap_err();
    assert!(matches!(err, Error::OperationNotFound(_)));
}

#[tokio::test]
async fn test_dependents_and_validate() {
    let lab = TestLab::new(chain());
    assert_eq!(lab.orchestrator.dependents("c").unwrap(), vec!["b"]);
    assert!(lab.orchestrator.validate().is_ok());

    let broken = TestLab::new(vec![
        module("a", &["b"]),
        module("b", &["a"]),
        module("x", &["ghost"]),
    ]);
    let err = broken.orchestrator.validate().unwrap_err();
    let errors = err.validation_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| matches!(
        e,
        ValidationError::CircularDependency { path }
            if path.contains(&"a".to_string()) && path.contains(&"b".to_string())
    )));
    assert!(errors.iter().any(|e| matches!(
        e,
        ValidationError::MissingDependency { dependent, missing }
            if dependent == "x" && missing == "ghost"
    )));

    // An unrelated broken module does not affect ordering elsewhere.
    let mixed = TestLab::new(vec![module("ok", &[]), module("x", &["ghost"])]);
    assert_eq!(mixed.orchestrator.install_order("ok").unwrap(), vec!["ok"]);
}

#[tokio::test]
async fn test_operations_are_listed() {
    let lab = TestLab::new(vec![module("dvwa", &[])]);
    let (_, first) = lab.run("dvwa", LifecycleAction::Install).await;
    let (_, second) = lab.run("dvwa", LifecycleAction::Start).await;

    let ids: Vec<String> = lab.orchestrator.operations().into_iter().map(|o| o.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.id));
    assert!(ids.contains(&second.id));
    assert_eq!(second.action, LifecycleAction::Start);
    assert!(second.completed_at.is_some());
}
