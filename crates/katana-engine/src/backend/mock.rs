// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! An in-memory, idempotent backend that tracks resources by their `name`
//! parameter without touching containers, services or files. Clones share
//! state, so a test can keep a handle after registering the backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use katana_core::{BackendKey, LifecycleAction};
use serde_json::Value;
use tokio::sync::Mutex;

use super::traits::*;

/// State of a mock resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockResourceState {
    /// Exists but not running.
    Stopped,
    /// Exists and running.
    Running,
}

/// Desired end state of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desired {
    Present,
    Absent,
    Started,
    Stopped,
    Restarted,
}

impl Desired {
    fn from_params(params: &Value, action: LifecycleAction) -> Result<Self> {
        match optional_str(params, "state") {
            Some("present") => Ok(Self::Present),
            Some("absent") => Ok(Self::Absent),
            Some("started") => Ok(Self::Started),
            Some("stopped") => Ok(Self::Stopped),
            Some("restarted") => Ok(Self::Restarted),
            Some(other) => Err(BackendError::Unsupported(format!("state '{}'", other))),
            None => Ok(match action {
                LifecycleAction::Install => Self::Present,
                LifecycleAction::Remove => Self::Absent,
                LifecycleAction::Start => Self::Started,
                LifecycleAction::Stop => Self::Stopped,
            }),
        }
    }
}

/// Mock backend for testing.
#[derive(Debug, Clone)]
pub struct MockBackend {
    key: BackendKey,
    resources: Arc<Mutex<HashMap<String, MockResourceState>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    executions: Arc<AtomicUsize>,
    /// Optional delay to simulate backend latency (in milliseconds)
    pub execution_delay_ms: u64,
    /// If true, every `execute` fails
    pub fail_by_default: bool,
}

impl MockBackend {
    /// Create a mock backend serving `key`.
    pub fn new(key: BackendKey) -> Self {
        Self {
            key,
            resources: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            executions: Arc::new(AtomicUsize::new(0)),
            execution_delay_ms: 0,
            fail_by_default: false,
        }
    }

    /// Create a mock backend whose every `execute` fails.
    pub fn failing(key: BackendKey) -> Self {
        Self {
            fail_by_default: true,
            ..Self::new(key)
        }
    }

    /// Create a mock backend that sleeps before every `execute`.
    pub fn with_delay(key: BackendKey, delay: Duration) -> Self {
        Self {
            execution_delay_ms: delay.as_millis() as u64,
            ..Self::new(key)
        }
    }

    /// Make every `execute` touching resource `name` fail.
    pub async fn fail_on(&self, name: &str) {
        self.failing.lock().await.insert(name.to_string());
    }

    /// Stop injecting failures for resource `name`.
    pub async fn clear_failure(&self, name: &str) {
        self.failing.lock().await.remove(name);
    }

    /// Seed a resource's state (`None` removes it).
    pub async fn set_state(&self, name: &str, state: Option<MockResourceState>) {
        let mut resources = self.resources.lock().await;
        match state {
            Some(state) => {
                resources.insert(name.to_string(), state);
            }
            None => {
                resources.remove(name);
            }
        }
    }

    /// Current state of a resource (`None` if absent).
    pub async fn state_of(&self, name: &str) -> Option<MockResourceState> {
        self.resources.lock().await.get(name).copied()
    }

    /// Number of `execute` calls so far.
    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn key(&self) -> BackendKey {
        self.key
    }

    async fn execute(&self, params: &Value, ctx: &TaskContext) -> Result<BackendOutcome> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        if self.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.execution_delay_ms)).await;
        }

        let name = required_str(params, "name")?;
        let desired = Desired::from_params(params, ctx.action)?;

        if self.fail_by_default || self.failing.lock().await.contains(name) {
            ctx.log.error(format!("{} '{}' failed", self.key, name));
            return Err(BackendError::Failed(format!(
                "Mock failure for {} '{}'",
                self.key, name
            )));
        }

        let mut resources = self.resources.lock().await;
        let current = resources.get(name).copied();
        let next = match (desired, current) {
            (Desired::Present, None) => Some(MockResourceState::Stopped),
            (Desired::Present, state) => state,
            (Desired::Absent, _) => None,
            (Desired::Started | Desired::Restarted, _) => Some(MockResourceState::Running),
            (Desired::Stopped, Some(_)) => Some(MockResourceState::Stopped),
            (Desired::Stopped, None) => None,
        };
        let changed = desired == Desired::Restarted || next != current;

        if !changed {
            ctx.log.debug(format!("{} '{}' already in desired state", self.key, name));
            return Ok(BackendOutcome::unchanged());
        }

        if ctx.dry_run {
            ctx.log.info(format!("[dry-run] would change {} '{}'", self.key, name));
            return Ok(BackendOutcome::changed().with_message("dry run"));
        }

        match next {
            Some(state) => {
                resources.insert(name.to_string(), state);
            }
            None => {
                resources.remove(name);
            }
        }
        ctx.log.info(format!("{} '{}' -> {:?}", self.key, name, next));
        Ok(BackendOutcome::changed())
    }

    async fn exists(&self, params: &Value) -> Result<bool> {
        let name = required_str(params, "name")?;
        Ok(self.resources.lock().await.contains_key(name))
    }

    async fn started(&self, params: &Value) -> Result<bool> {
        let name = required_str(params, "name")?;
        Ok(self.resources.lock().await.get(name) == Some(&MockResourceState::Running))
    }
}
