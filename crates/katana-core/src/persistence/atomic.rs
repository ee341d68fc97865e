// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atomic document writes.
//!
//! A write is staged into a temporary file in the target's directory, synced,
//! and then renamed over the target. Readers see either the old document or
//! the new one, never a partial write. A staged write that is never committed
//! leaves the target untouched.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// A document path written with temp-file-then-rename semantics.
#[derive(Debug, Clone)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    /// Create a handle for the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The canonical document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `contents` to a synced temporary file next to the target.
    ///
    /// Nothing is visible at the canonical path until [`StagedWrite::commit`].
    pub fn stage(&self, contents: &[u8]) -> io::Result<StagedWrite> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&dir)?;

        temp.write_all(contents)?;
        temp.as_file().sync_all()?;

        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
        })
    }

    /// Stage and commit in one step.
    pub fn write(&self, contents: &[u8]) -> io::Result<()> {
        self.stage(contents)?.commit()
    }

    /// Read the document, returning `None` if it does not exist.
    pub fn read(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the document. A missing document is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A fully written, not yet visible document.
///
/// Dropping it without committing discards the temporary file.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Path of the temporary file holding the staged contents.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically rename the staged file over the canonical path.
    pub fn commit(self) -> io::Result<()> {
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}
