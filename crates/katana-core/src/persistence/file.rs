// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File-backed state store.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/
//!   installed.json   { "<module>": { "installed_at": ..., "version": ... } }
//!   lock.json        { "locked": true, "modules": [...], ... }  (absent when unlocked)
//! ```
//!
//! Every write goes through [`AtomicFile`], so a crash mid-write leaves the
//! previous document in place. Mutations are read-modify-write cycles over a
//! whole document; a per-store mutex serializes them so concurrent updates
//! for different modules never overwrite each other.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::atomic::AtomicFile;
use super::{InstalledRecord, LockDocument, LockState, StateStore};
use crate::error::{Error, Result};
use crate::module::normalize_name;

/// Installed-module document name.
pub const INSTALLED_FILE: &str = "installed.json";

/// Lock document name.
pub const LOCK_FILE: &str = "lock.json";

/// JSON documents in a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
    installed: AtomicFile,
    lock: AtomicFile,
    /// Held for each whole read-modify-write, never across calls.
    writes: Arc<Mutex<()>>,
}

impl FileStateStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            installed: AtomicFile::new(dir.join(INSTALLED_FILE)),
            lock: AtomicFile::new(dir.join(LOCK_FILE)),
            writes: Arc::new(Mutex::new(())),
            dir,
        }
    }

    /// State directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the installed-module document.
    pub fn installed_path(&self) -> &Path {
        self.installed.path()
    }

    /// Path of the lock document.
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    async fn read_installed(&self) -> Result<BTreeMap<String, InstalledRecord>> {
        let file = self.installed.clone();
        let contents = blocking(move || file.read()).await?;
        match contents {
            Some(contents) if !contents.trim().is_empty() => Ok(serde_json::from_str(&contents)?),
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn write_installed(&self, installed: &BTreeMap<String, InstalledRecord>) -> Result<()> {
        write_json(&self.installed, installed).await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_installed(&self) -> Result<BTreeMap<String, InstalledRecord>> {
        self.read_installed().await
    }

    async fn mark_installed(&self, name: &str, version: Option<&str>) -> Result<()> {
        let name = normalize_name(name);
        let _guard = self.writes.lock().await;
        let mut installed = self.read_installed().await?;
        installed.insert(
            name.clone(),
            InstalledRecord {
                installed_at: Utc::now(),
                version: version.map(str::to_string),
            },
        );
        self.write_installed(&installed).await?;
        debug!(module = %name, "Recorded module as installed");
        Ok(())
    }

    async fn mark_removed(&self, name: &str) -> Result<()> {
        let name = normalize_name(name);
        let _guard = self.writes.lock().await;
        let mut installed = self.read_installed().await?;
        if installed.remove(&name).is_none() {
            debug!(module = %name, "Module had no installed record");
            return Ok(());
        }
        self.write_installed(&installed).await?;
        debug!(module = %name, "Removed installed record");
        Ok(())
    }

    async fn get_lock(&self) -> Result<LockState> {
        let file = self.lock.clone();
        let contents = blocking(move || file.read()).await?;
        match contents {
            Some(contents) if !contents.trim().is_empty() => {
                let doc: LockDocument = serde_json::from_str(&contents)?;
                Ok(doc.into())
            }
            _ => Ok(LockState::default()),
        }
    }

    async fn enable_lock(&self, actor: Option<&str>, message: Option<&str>) -> Result<LockState> {
        let _guard = self.writes.lock().await;
        let current = self.get_lock().await?;
        if current.locked {
            debug!("Lock already enabled, keeping existing snapshot");
            return Ok(current);
        }

        let modules: Vec<String> = self.read_installed().await?.into_keys().collect();
        let state = LockState {
            locked: true,
            modules,
            locked_by: actor.map(str::to_string),
            message: message.map(str::to_string),
            locked_at: Some(Utc::now()),
        };
        write_json(&self.lock, &state).await?;

        info!(
            modules = state.modules.len(),
            locked_by = ?state.locked_by,
            "Lab locked"
        );
        Ok(state)
    }

    async fn disable_lock(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        let file = self.lock.clone();
        blocking(move || file.remove()).await?;
        info!("Lab unlocked");
        Ok(())
    }
}

async fn write_json<T: Serialize + ?Sized>(file: &AtomicFile, value: &T) -> Result<()> {
    let mut contents = serde_json::to_vec_pretty(value)?;
    contents.push(b'\n');
    let file = file.clone();
    blocking(move || file.write(&contents)).await
}

/// Run blocking filesystem work off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
        .map_err(Error::Io)
}
