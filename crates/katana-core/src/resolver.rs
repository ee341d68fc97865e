// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependency resolution over the module graph.
//!
//! The graph is an edge list keyed by normalized module name, pointing from a
//! module to the modules it depends on. Dependency names that are not loaded
//! still become nodes, so they can be reported as missing instead of silently
//! dropped.
//!
//! Diagnostics are collected, not fail-fast: [`DependencyGraph::detect_cycles`]
//! reports every cycle and [`DependencyGraph::validate_references`] every
//! dangling reference. Install ordering only looks at the transitive closure
//! of the requested module, so unrelated broken modules do not block it.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::{Error, Result, ValidationError};
use crate::module::{ModuleSpec, normalize_name};
use crate::registry::ModuleRegistry;

/// Node colors for the three-color depth-first traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not yet visited.
    White,
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

/// Result of resolving the install order for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Normalized target module.
    pub target: String,
    /// Modules to install, dependencies first, target last. Empty on error.
    pub order: Vec<String>,
    /// Every problem found in the target's dependency closure.
    pub errors: Vec<ValidationError>,
}

impl InstallPlan {
    /// Whether the plan resolved without errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into the install order, or the batch of validation errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.order)
        } else {
            Err(Error::Validation(self.errors))
        }
    }
}

/// Dependency graph over normalized module names.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// module -> modules it depends on (deduplicated, declaration order)
    edges: BTreeMap<String, Vec<String>>,
    /// modules with a loaded spec behind them
    loaded: BTreeSet<String>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from module specs.
    pub fn build<'a>(modules: impl IntoIterator<Item = &'a ModuleSpec>) -> Self {
        let mut graph = Self::new();
        for module in modules {
            graph.add_module(&module.name, &module.depends_on);
        }
        graph
    }

    /// Build a graph from every module in a registry.
    pub fn from_registry(registry: &ModuleRegistry) -> Self {
        Self::build(registry.modules())
    }

    /// Add a loaded module and its dependency edges.
    pub fn add_module(&mut self, name: &str, depends_on: &[String]) {
        let name = normalize_name(name);
        self.loaded.insert(name.clone());

        let mut deps: Vec<String> = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            let dep = normalize_name(dep);
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        for dep in &deps {
            self.edges.entry(dep.clone()).or_default();
        }

        let entry = self.edges.entry(name).or_default();
        for dep in deps {
            if !entry.contains(&dep) {
                entry.push(dep);
            }
        }
    }

    /// Whether a node exists (loaded or only referenced).
    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(&normalize_name(name))
    }

    /// Whether a loaded module backs this node.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(&normalize_name(name))
    }

    /// Direct dependencies of a module.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges
            .get(&normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Detect every dependency cycle in the graph.
    ///
    /// A back-edge to a node still on the DFS path yields one error carrying
    /// the path from that node back to itself. A self-dependency is a
    /// one-node cycle (`["a", "a"]`).
    pub fn detect_cycles(&self) -> Vec<ValidationError> {
        let scope: BTreeSet<&str> = self.edges.keys().map(String::as_str).collect();
        self.find_cycles(&scope)
    }

    /// Report every edge whose dependency has no loaded module behind it.
    pub fn validate_references(&self) -> Vec<ValidationError> {
        let scope: BTreeSet<&str> = self.edges.keys().map(String::as_str).collect();
        self.missing_references(&scope)
    }

    /// Compute the install order for `target`.
    ///
    /// Only the transitive dependency closure of the target is validated and
    /// sorted (Kahn's algorithm). If the closure has missing references or
    /// cycles, no order is returned.
    pub fn install_order(&self, target: &str) -> InstallPlan {
        let target = normalize_name(target);

        if !self.loaded.contains(&target) {
            return InstallPlan {
                errors: vec![ValidationError::MissingModule {
                    name: target.clone(),
                }],
                target,
                order: Vec::new(),
            };
        }

        let closure = self.closure(&target);

        let mut errors = self.missing_references(&closure);
        errors.extend(self.find_cycles(&closure));
        if !errors.is_empty() {
            return InstallPlan {
                target,
                order: Vec::new(),
                errors,
            };
        }

        // In-degree = number of in-closure dependencies not yet ordered.
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &closure {
            let deps = self.dependencies(node);
            in_degree.insert(*node, deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(*node);
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(closure.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for dependent in dependents.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() != closure.len() {
            // Unreachable after the cycle check; keep the contract of never
            // returning a partial order.
            let ordered: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            let path = closure
                .iter()
                .filter(|node| !ordered.contains(*node))
                .map(|node| node.to_string())
                .collect();
            return InstallPlan {
                target,
                order: Vec::new(),
                errors: vec![ValidationError::CircularDependency { path }],
            };
        }

        InstallPlan {
            target,
            order,
            errors: Vec::new(),
        }
    }

    /// Loaded modules that directly depend on `name`, sorted.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let name = normalize_name(name);
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(&name))
            .map(|(module, _)| module.clone())
            .collect()
    }

    /// Format a cycle path as a human-readable multi-line message.
    pub fn format_cycle(path: &[String]) -> String {
        let mut msg = String::from("Circular dependency detected:\n\nCycle path:\n");
        for (i, node) in path.iter().enumerate() {
            if i > 0 {
                msg.push_str("  → ");
            } else {
                msg.push_str("  ");
            }
            msg.push_str(node);
            if i == path.len() - 1 {
                msg.push_str("  ← Cycle!");
            }
            msg.push('\n');
        }
        msg.push_str("\nTo fix: remove one of the dependencies along this path.\n");
        msg
    }

    /// Transitive dependency closure of `target`, including the target.
    fn closure(&self, target: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let Some((start, _)) = self.edges.get_key_value(target) else {
            return seen;
        };

        let mut stack = vec![start.as_str()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            for dep in self.dependencies(node) {
                if !seen.contains(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }
        seen
    }

    fn missing_references(&self, scope: &BTreeSet<&str>) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for node in scope {
            if !self.loaded.contains(*node) {
                continue;
            }
            for dep in self.dependencies(node) {
                if !self.loaded.contains(dep) {
                    errors.push(ValidationError::MissingDependency {
                        dependent: node.to_string(),
                        missing: dep.clone(),
                    });
                }
            }
        }
        errors
    }

    fn find_cycles<'a>(&'a self, scope: &BTreeSet<&'a str>) -> Vec<ValidationError> {
        let mut colors: HashMap<&str, Color> =
            scope.iter().map(|node| (*node, Color::White)).collect();
        let mut path = Vec::new();
        let mut cycles = Vec::new();

        for node in scope {
            if colors.get(node) == Some(&Color::White) {
                self.visit(*node, scope, &mut colors, &mut path, &mut cycles);
            }
        }
        cycles
    }

    /// Depth-first search helper for cycle detection
    fn visit<'a>(
        &'a self,
        node: &'a str,
        scope: &BTreeSet<&'a str>,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<ValidationError>,
    ) {
        colors.insert(node, Color::Gray);
        path.push(node);

        for dep in self.edges.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            let dep = dep.as_str();
            if !scope.contains(dep) {
                continue;
            }
            match colors.get(dep).copied().unwrap_or(Color::White) {
                Color::White => self.visit(dep, scope, colors, path, cycles),
                Color::Gray => {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(dep.to_string());
                    cycles.push(ValidationError::CircularDependency { path: cycle });
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
    }
}
