// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend registration by task key.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use katana_core::BackendKey;
use tracing::debug;

use super::traits::Backend;

/// Backends keyed by the task key they serve.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<BackendKey, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own key, returning any backend it replaced.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        let key = backend.key();
        debug!(backend = %key, "Registered backend");
        self.backends.insert(key, backend)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    /// Backend serving `key`.
    pub fn get(&self, key: BackendKey) -> Option<Arc<dyn Backend>> {
        self.backends.get(&key).cloned()
    }

    /// Whether a backend serves `key`.
    pub fn contains(&self, key: BackendKey) -> bool {
        self.backends.contains_key(&key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<BackendKey> {
        self.backends.keys().copied().collect()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
