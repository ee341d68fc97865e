// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for katana.
//!
//! The state store owns two documents: the installed-module map and the lock
//! record. It is the only shared mutable resource in the engine. Mutations are
//! read-modify-write without a lock held across calls; callers serialize
//! work per module (see the operation tracker's single-flight check).

pub mod atomic;
pub mod file;

pub use self::atomic::{AtomicFile, StagedWrite};
pub use self::file::FileStateStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::module::normalize_name;

/// Installed-module record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    /// When the install completed.
    pub installed_at: DateTime<Utc>,
    /// Module version at install time, if the spec declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Lock mode record.
///
/// Once locked, `modules` is a frozen snapshot of the installed set at lock
/// time; it only goes away through an explicit unlock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    /// Whether lock mode is enabled.
    pub locked: bool,
    /// Installed modules at lock time, sorted.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Who enabled the lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    /// Why the lock was enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the lock was enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

impl LockState {
    /// Whether a module is part of the locked snapshot.
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.modules.iter().any(|m| *m == name)
    }
}

/// On-disk shapes accepted for the lock document.
///
/// The legacy shape is a bare list of module names with no metadata.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LockDocument {
    Legacy(Vec<String>),
    Structured(LockState),
}

impl From<LockDocument> for LockState {
    fn from(doc: LockDocument) -> Self {
        match doc {
            LockDocument::Structured(state) => state,
            LockDocument::Legacy(modules) if modules.is_empty() => LockState::default(),
            LockDocument::Legacy(modules) => {
                let mut modules: Vec<String> =
                    modules.iter().map(|m| normalize_name(m)).collect();
                modules.sort();
                modules.dedup();
                LockState {
                    locked: true,
                    modules,
                    ..LockState::default()
                }
            }
        }
    }
}

/// Durable store for installed modules and lock mode.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Installed modules keyed by normalized name.
    async fn get_installed(&self) -> Result<BTreeMap<String, InstalledRecord>>;

    /// Record a successful install.
    async fn mark_installed(&self, name: &str, version: Option<&str>) -> Result<()>;

    /// Forget a module after a successful remove.
    async fn mark_removed(&self, name: &str) -> Result<()>;

    /// Current lock record (unlocked if none is stored).
    async fn get_lock(&self) -> Result<LockState>;

    /// Enable lock mode, snapshotting the current installed set.
    ///
    /// If already locked, the existing record is returned unchanged.
    async fn enable_lock(&self, actor: Option<&str>, message: Option<&str>) -> Result<LockState>;

    /// Disable lock mode by deleting the lock record.
    async fn disable_lock(&self) -> Result<()>;

    /// Whether a module has an installed record.
    async fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self
            .get_installed()
            .await?
            .contains_key(&normalize_name(name)))
    }
}
