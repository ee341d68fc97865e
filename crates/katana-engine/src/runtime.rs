// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for katana.
//!
//! [`EngineRuntime`] wires the orchestrator to its collaborators and runs the
//! retention worker in the background.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use katana_core::{Config, ModuleRegistry};
//! use katana_engine::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ModuleRegistry::new(load_modules()?)?;
//!
//!     let runtime = EngineRuntime::builder()
//!         .config(Config::from_env()?)
//!         .registry(registry)
//!         .backend(Arc::new(DockerBackend::connect()?))
//!         .build()?
//!         .start();
//!
//!     let op = runtime.orchestrator().install("dvwa").await?;
//!     let mut sub = runtime.orchestrator().subscribe(&op)?;
//!     while let Some(event) = sub.receiver.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use katana_core::{Config, FileStateStore, ModuleRegistry, StateStore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::{Backend, BackendRegistry};
use crate::orchestrator::Orchestrator;
use crate::retention_worker::{RetentionWorker, RetentionWorkerConfig};

/// Builder for creating an [`EngineRuntime`].
#[derive(Default)]
pub struct EngineRuntimeBuilder {
    config: Config,
    registry: Option<ModuleRegistry>,
    backends: BackendRegistry,
    state_store: Option<Arc<dyn StateStore>>,
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the whole engine configuration.
    ///
    /// Default: [`Config::default()`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the module registry (required).
    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the backend registry.
    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Register one backend.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.register(backend);
        self
    }

    /// Set the state store.
    ///
    /// Default: a [`FileStateStore`] in the configured state directory.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Set the state directory for the default file store.
    ///
    /// Default: `.katana`
    pub fn state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_dir = path.into();
        self
    }

    /// Set the per-operation timeout.
    ///
    /// Default: 30 minutes
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Set how long finished operations are retained.
    ///
    /// Default: 1 hour
    pub fn operation_retention(mut self, retention: Duration) -> Self {
        self.config.operation_retention = retention;
        self
    }

    /// Set the retention sweep interval.
    ///
    /// Default: 60 seconds
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set the executor's abort-on-first-failure policy.
    ///
    /// Default: `true`
    pub fn stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.config.stop_on_error = stop_on_error;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        let state_store = self
            .state_store
            .unwrap_or_else(|| Arc::new(FileStateStore::new(self.config.state_dir.clone())));

        Ok(EngineRuntimeConfig {
            config: self.config,
            registry: Arc::new(registry),
            backends: Arc::new(self.backends),
            state_store,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    config: Config,
    registry: Arc<ModuleRegistry>,
    backends: Arc<BackendRegistry>,
    state_store: Arc<dyn StateStore>,
}

impl EngineRuntimeConfig {
    /// Start the runtime, spawning the retention worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> EngineRuntime {
        let orchestrator = Arc::new(Orchestrator::new(
            self.registry.clone(),
            self.backends.clone(),
            self.state_store,
            &self.config,
        ));

        let retention_worker = RetentionWorker::new(
            orchestrator.tracker().clone(),
            RetentionWorkerConfig {
                poll_interval: self.config.cleanup_interval,
                retention: self.config.operation_retention,
            },
        );
        let retention_shutdown = retention_worker.shutdown_handle();
        let retention_handle = tokio::spawn(async move {
            retention_worker.run().await;
        });

        info!(
            modules = self.registry.len(),
            backends = self.backends.len(),
            state_dir = %self.config.state_dir.display(),
            "EngineRuntime started"
        );

        EngineRuntime {
            orchestrator,
            retention_handle,
            retention_shutdown,
        }
    }
}

/// A running katana engine that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Operations
/// still in flight keep running on the tokio runtime.
pub struct EngineRuntime {
    orchestrator: Arc<Orchestrator>,
    retention_handle: JoinHandle<()>,
    retention_shutdown: Arc<Notify>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The lifecycle orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Check if the background worker is still running.
    pub fn is_running(&self) -> bool {
        !self.retention_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        self.retention_shutdown.notify_one();

        if let Err(e) = self.retention_handle.await {
            error!("Retention worker task panicked: {}", e);
            return Err(anyhow::anyhow!("retention worker panicked: {}", e));
        }

        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}
