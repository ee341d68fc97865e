// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Katana engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the installed-module and lock documents
    pub state_dir: PathBuf,
    /// Maximum time an operation may run before it is marked failed
    pub operation_timeout: Duration,
    /// How long terminal operations are kept for late subscribers and polling
    pub operation_retention: Duration,
    /// How often expired operations are garbage-collected
    pub cleanup_interval: Duration,
    /// Abort the remaining tasks of a batch on the first failure
    pub stop_on_error: bool,
    /// Run a dependency's start tasks after ensuring it is installed
    pub start_dependencies: bool,
    /// Passed to every backend invocation
    pub dry_run: bool,
    /// Passed to every backend invocation
    pub mock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".katana"),
            operation_timeout: Duration::from_secs(30 * 60),
            operation_retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            stop_on_error: true,
            start_dependencies: true,
            dry_run: false,
            mock: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `KATANA_STATE_DIR`: state directory (default: `.katana`)
    /// - `KATANA_OPERATION_TIMEOUT_SECS`: operation timeout (default: 1800)
    /// - `KATANA_OPERATION_RETENTION_SECS`: terminal operation retention (default: 3600)
    /// - `KATANA_CLEANUP_INTERVAL_SECS`: retention sweep interval (default: 60)
    /// - `KATANA_STOP_ON_ERROR`: abort a task batch on first failure (default: true)
    /// - `KATANA_START_DEPENDENCIES`: start dependencies during install (default: true)
    /// - `KATANA_DRY_RUN`, `KATANA_MOCK`: backend context flags (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let state_dir = std::env::var("KATANA_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let operation_timeout = secs_var(
            "KATANA_OPERATION_TIMEOUT_SECS",
            defaults.operation_timeout,
        )?;
        let operation_retention = secs_var(
            "KATANA_OPERATION_RETENTION_SECS",
            defaults.operation_retention,
        )?;
        let cleanup_interval = secs_var("KATANA_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval)?;

        Ok(Self {
            state_dir,
            operation_timeout,
            operation_retention,
            cleanup_interval,
            stop_on_error: bool_var("KATANA_STOP_ON_ERROR", defaults.stop_on_error)?,
            start_dependencies: bool_var(
                "KATANA_START_DEPENDENCIES",
                defaults.start_dependencies,
            )?,
            dry_run: bool_var("KATANA_DRY_RUN", defaults.dry_run)?,
            mock: bool_var("KATANA_MOCK", defaults.mock)?,
        })
    }
}

fn secs_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(name, "must be a whole number of seconds"))?;
            if secs == 0 {
                return Err(ConfigError::Invalid(name, "must be greater than zero"));
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

fn bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid(name, "must be true, false, 1 or 0")),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
