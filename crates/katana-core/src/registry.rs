// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only module registry.
//!
//! Holds the loaded module specs keyed by normalized name. The engine never
//! mutates a spec once loaded.

use std::collections::BTreeMap;

use crate::error::{Error, Result, ValidationError};
use crate::module::{ModuleSpec, normalize_name};

/// Loaded module specs, keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleSpec>,
}

impl ModuleRegistry {
    /// Build a registry from module specs.
    ///
    /// Fails with every duplicate name found when two specs normalize to the
    /// same name.
    pub fn new(specs: impl IntoIterator<Item = ModuleSpec>) -> Result<Self> {
        let mut modules = BTreeMap::new();
        let mut errors = Vec::new();

        for spec in specs {
            let name = spec.normalized_name();
            if modules.contains_key(&name) {
                errors.push(ValidationError::DuplicateModule { name });
                continue;
            }
            modules.insert(name, spec);
        }

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        Ok(Self { modules })
    }

    /// Look up a module by name (any case).
    pub fn get(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.get(&normalize_name(name))
    }

    /// Look up a module by name, failing with [`Error::ModuleNotFound`].
    pub fn require(&self, name: &str) -> Result<&ModuleSpec> {
        self.get(name)
            .ok_or_else(|| Error::ModuleNotFound(normalize_name(name)))
    }

    /// Whether a module with this name is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(&normalize_name(name))
    }

    /// Normalized names of all loaded modules, sorted.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// All loaded module specs, sorted by normalized name.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.values()
    }

    /// Number of loaded modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
