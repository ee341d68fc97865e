// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Module specification types.
//!
//! A module spec arrives already validated from the external module registry.
//! The engine treats everything except names, dependencies and task lists as
//! opaque.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalize a module name to its canonical case.
///
/// Every graph, registry, state and tracker lookup goes through this.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A lifecycle action that can be requested for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    /// Provision the module (dependencies first).
    Install,
    /// Tear the module down.
    Remove,
    /// Start an installed module.
    Start,
    /// Stop a running module.
    Stop,
}

impl LifecycleAction {
    /// All actions, in declaration order.
    pub const ALL: [LifecycleAction; 4] = [Self::Install, Self::Remove, Self::Start, Self::Stop];

    /// Lowercase action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    /// Whether the action changes the installed-module set.
    ///
    /// Mutating actions are rejected while lock mode is enabled.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Install | Self::Remove)
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "install" => Ok(Self::Install),
            "remove" => Ok(Self::Remove),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(format!("Unknown lifecycle action: {}", other)),
        }
    }
}

/// Key identifying the backend family a task is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKey {
    /// Container runtime.
    #[serde(rename = "docker")]
    Docker,
    /// Host service control.
    #[serde(rename = "service")]
    Service,
    /// Reverse-proxy config generation and certificate issuance.
    #[serde(rename = "reverseproxy")]
    ReverseProxy,
    /// Line-oriented file edits (hosts file entries).
    #[serde(rename = "lineinfile")]
    LineInFile,
    /// File copy / content write.
    #[serde(rename = "copy")]
    Copy,
    /// File or directory removal.
    #[serde(rename = "rm")]
    Remove,
    /// Arbitrary command execution.
    #[serde(rename = "command")]
    Command,
    /// Git checkout.
    #[serde(rename = "git")]
    Git,
    /// URL download.
    #[serde(rename = "get_url")]
    GetUrl,
    /// Archive extraction.
    #[serde(rename = "unarchive")]
    Unarchive,
    /// In-file text replacement.
    #[serde(rename = "replace")]
    Replace,
    /// Desktop menu and favorites integration.
    #[serde(rename = "desktop")]
    Desktop,
}

impl BackendKey {
    /// The key as written in module specs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Service => "service",
            Self::ReverseProxy => "reverseproxy",
            Self::LineInFile => "lineinfile",
            Self::Copy => "copy",
            Self::Remove => "rm",
            Self::Command => "command",
            Self::Git => "git",
            Self::GetUrl => "get_url",
            Self::Unarchive => "unarchive",
            Self::Replace => "replace",
            Self::Desktop => "desktop",
        }
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-bound step, one variant per backend key.
///
/// Decoded once from the module spec, so dispatch is a match on the variant
/// rather than a search through the task's keys. Parameters stay opaque to
/// the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskAction {
    /// Container runtime step.
    #[serde(rename = "docker")]
    Docker(Value),
    /// Host service step.
    #[serde(rename = "service")]
    Service(Value),
    /// Reverse-proxy step.
    #[serde(rename = "reverseproxy")]
    ReverseProxy(Value),
    /// Line-in-file step.
    #[serde(rename = "lineinfile")]
    LineInFile(Value),
    /// Copy step.
    #[serde(rename = "copy")]
    Copy(Value),
    /// Removal step.
    #[serde(rename = "rm")]
    Remove(Value),
    /// Command step.
    #[serde(rename = "command")]
    Command(Value),
    /// Git step.
    #[serde(rename = "git")]
    Git(Value),
    /// Download step.
    #[serde(rename = "get_url")]
    GetUrl(Value),
    /// Archive extraction step.
    #[serde(rename = "unarchive")]
    Unarchive(Value),
    /// Replace step.
    #[serde(rename = "replace")]
    Replace(Value),
    /// Desktop integration step.
    #[serde(rename = "desktop")]
    Desktop(Value),
}

impl TaskAction {
    /// The backend this step is dispatched to.
    pub fn key(&self) -> BackendKey {
        match self {
            Self::Docker(_) => BackendKey::Docker,
            Self::Service(_) => BackendKey::Service,
            Self::ReverseProxy(_) => BackendKey::ReverseProxy,
            Self::LineInFile(_) => BackendKey::LineInFile,
            Self::Copy(_) => BackendKey::Copy,
            Self::Remove(_) => BackendKey::Remove,
            Self::Command(_) => BackendKey::Command,
            Self::Git(_) => BackendKey::Git,
            Self::GetUrl(_) => BackendKey::GetUrl,
            Self::Unarchive(_) => BackendKey::Unarchive,
            Self::Replace(_) => BackendKey::Replace,
            Self::Desktop(_) => BackendKey::Desktop,
        }
    }

    /// Backend-specific parameters.
    pub fn params(&self) -> &Value {
        match self {
            Self::Docker(p)
            | Self::Service(p)
            | Self::ReverseProxy(p)
            | Self::LineInFile(p)
            | Self::Copy(p)
            | Self::Remove(p)
            | Self::Command(p)
            | Self::Git(p)
            | Self::GetUrl(p)
            | Self::Unarchive(p)
            | Self::Replace(p)
            | Self::Desktop(p) => p,
        }
    }
}

/// One step in a module's action task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The backend-bound action.
    #[serde(flatten)]
    pub action: TaskAction,
}

impl Task {
    /// Create an unnamed task.
    pub fn new(action: TaskAction) -> Self {
        Self { name: None, action }
    }

    /// Create a named task.
    pub fn named(name: impl Into<String>, action: TaskAction) -> Self {
        Self {
            name: Some(name.into()),
            action,
        }
    }

    /// Name shown in progress output.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} task", self.action.key()),
        }
    }
}

/// Status probe descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusProbes {
    /// Probed with the backend's `exists` check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<TaskAction>,
    /// Probed with the backend's `started` check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<TaskAction>,
}

impl StatusProbes {
    /// Whether no probe is declared.
    pub fn is_empty(&self) -> bool {
        self.installed.is_none() && self.running.is_none()
    }
}

/// A declaratively-specified deployable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module name (unique, case-insensitive).
    pub name: String,
    /// Grouping shown to users (e.g. "targets", "tools", "base").
    pub category: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version recorded on successful install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Names of modules that must be installed first.
    #[serde(default, alias = "depends-on")]
    pub depends_on: Vec<String>,
    /// Install task list.
    #[serde(default)]
    pub install: Vec<Task>,
    /// Remove task list.
    #[serde(default)]
    pub remove: Vec<Task>,
    /// Start task list.
    #[serde(default)]
    pub start: Vec<Task>,
    /// Stop task list.
    #[serde(default)]
    pub stop: Vec<Task>,
    /// Status probes.
    #[serde(default, skip_serializing_if = "StatusProbes::is_empty")]
    pub status: StatusProbes,
}

impl ModuleSpec {
    /// Create an empty module spec with the given name and category.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: None,
            version: None,
            depends_on: Vec::new(),
            install: Vec::new(),
            remove: Vec::new(),
            start: Vec::new(),
            stop: Vec::new(),
            status: StatusProbes::default(),
        }
    }

    /// Canonical module name.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Task list for an action.
    pub fn tasks(&self, action: LifecycleAction) -> &[Task] {
        match action {
            LifecycleAction::Install => &self.install,
            LifecycleAction::Remove => &self.remove,
            LifecycleAction::Start => &self.start,
            LifecycleAction::Stop => &self.stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  DVWA "), "dvwa");
        assert_eq!(normalize_name("Juice-Shop"), "juice-shop");
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("Install".parse::<LifecycleAction>(), Ok(LifecycleAction::Install));
        assert_eq!("stop".parse::<LifecycleAction>(), Ok(LifecycleAction::Stop));
        assert!("upgrade".parse::<LifecycleAction>().is_err());
    }

    #[test]
    fn test_action_is_mutating() {
        assert!(LifecycleAction::Install.is_mutating());
        assert!(LifecycleAction::Remove.is_mutating());
        assert!(!LifecycleAction::Start.is_mutating());
        assert!(!LifecycleAction::Stop.is_mutating());
    }

    #[test]
    fn test_task_decodes_to_variant() {
        let task: Task = serde_json::from_value(json!({
            "name": "Install the docker image",
            "docker": { "name": "dvwa", "image": "vulnerables/web-dvwa" }
        }))
        .unwrap();

        assert_eq!(task.display_name(), "Install the docker image");
        assert_eq!(task.action.key(), BackendKey::Docker);
        assert_eq!(task.action.params()["image"], "vulnerables/web-dvwa");
    }

    #[test]
    fn test_task_without_name() {
        let task: Task = serde_json::from_value(json!({
            "rm": { "path": "/etc/nginx/conf.d/dvwa.conf" }
        }))
        .unwrap();

        assert!(task.name.is_none());
        assert_eq!(task.action.key(), BackendKey::Remove);
        assert_eq!(task.display_name(), "rm task");
    }

    #[test]
    fn test_task_unknown_backend_rejected() {
        let result: Result<Task, _> = serde_json::from_value(json!({
            "name": "Mystery",
            "teleport": { "to": "mars" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_module_spec_decodes() {
        let spec: ModuleSpec = serde_json::from_value(json!({
            "name": "DVWA",
            "category": "targets",
            "depends-on": ["docker"],
            "install": [
                { "docker": { "name": "dvwa", "image": "vulnerables/web-dvwa" } },
                { "service": { "name": "nginx", "state": "restarted" } }
            ],
            "start": [ { "docker": { "name": "dvwa" } } ],
            "status": {
                "running": { "docker": { "name": "dvwa" } },
                "installed": { "docker": { "name": "dvwa" } }
            }
        }))
        .unwrap();

        assert_eq!(spec.normalized_name(), "dvwa");
        assert_eq!(spec.depends_on, vec!["docker".to_string()]);
        assert_eq!(spec.tasks(LifecycleAction::Install).len(), 2);
        assert_eq!(spec.tasks(LifecycleAction::Start).len(), 1);
        assert!(spec.tasks(LifecycleAction::Stop).is_empty());
        assert!(!spec.status.is_empty());
    }
}
