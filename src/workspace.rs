use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::core::Hash32;
use crate::diagnostics::{Diagnostic, ScopedDiagnostic};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub settings: Settings,
    pub sources: Vec<Utf8PathBuf>,
    pub resources: Vec<Utf8PathBuf>,
    /// Names of targets that must be built first.
    pub dependencies: Vec<String>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Settings::new(),
            sources: Vec::new(),
            resources: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn setting(mut self, name: &str, value: &str) -> Self {
        self.settings.insert(name, value);
        self
    }

    pub fn source(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    pub fn resource(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.resources.push(path.into());
        self
    }

    pub fn depends_on(mut self, target: impl Into<String>) -> Self {
        self.dependencies.push(target.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    /// Directory the default build locations are derived from.
    pub root: Utf8PathBuf,
    pub targets: Vec<Target>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            targets: Vec::new(),
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn find(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// The requested targets plus everything they depend on, dependencies
    /// first. An empty request means every target. Unknown names and
    /// dependency cycles are reported; targets on a cycle are still returned
    /// (in name order) so planning can go on.
    pub fn resolve(&self, requested: &[String]) -> (Vec<&Target>, Vec<ScopedDiagnostic>) {
        let mut diagnostics = Vec::new();

        let mut pending: Vec<&str> = if requested.is_empty() {
            self.targets.iter().map(|t| t.name.as_str()).collect()
        } else {
            requested.iter().map(String::as_str).collect()
        };

        let mut closure: BTreeMap<&str, &Target> = BTreeMap::new();
        while let Some(name) = pending.pop() {
            if closure.contains_key(name) {
                continue;
            }
            let Some(target) = self.find(name) else {
                diagnostics.push(ScopedDiagnostic::new(
                    None,
                    Diagnostic::error(format!("Unable to find a target named '{name}'")),
                ));
                continue;
            };
            closure.insert(name, target);

            for dependency in &target.dependencies {
                if self.find(dependency).is_none() {
                    diagnostics.push(ScopedDiagnostic::new(
                        Some(name),
                        Diagnostic::error(format!("Target '{name}' depends on unknown target '{dependency}'")),
                    ));
                } else {
                    pending.push(dependency);
                }
            }
        }

        let mut graph: DiGraph<&Target, ()> = DiGraph::new();
        let indices: BTreeMap<&str, NodeIndex> = closure
            .iter()
            .map(|(name, target)| (*name, graph.add_node(*target)))
            .collect();

        for (name, target) in &closure {
            for dependency in &target.dependencies {
                if let Some(&from) = indices.get(dependency.as_str()) {
                    graph.add_edge(from, indices[name], ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => (order.into_iter().map(|i| graph[i]).collect(), diagnostics),
            Err(_) => {
                for component in tarjan_scc(&graph) {
                    let is_cycle = component.len() > 1
                        || component
                            .first()
                            .is_some_and(|&i| graph.contains_edge(i, i));
                    if !is_cycle {
                        continue;
                    }

                    let names: BTreeSet<&str> = component.iter().map(|&i| graph[i].name.as_str()).collect();
                    let names: Vec<&str> = names.into_iter().collect();
                    diagnostics.push(ScopedDiagnostic::new(
                        None,
                        Diagnostic::error(format!("Cycle in target dependencies: {}", names.join(" -> "))),
                    ));
                }

                (closure.into_values().collect(), diagnostics)
            }
        }
    }
}

/// What to build, and where.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildRequest {
    pub workspace: Workspace,
    /// Target names; empty builds everything.
    pub targets: Vec<String>,
    /// Active run destination, e.g. `macosx` or `iphonesimulator`.
    pub destination: String,
    /// Settings applied on top of every target's own.
    pub overrides: Settings,
}

impl BuildRequest {
    pub fn new(workspace: Workspace, destination: impl Into<String>) -> Self {
        Self {
            workspace,
            targets: Vec::new(),
            destination: destination.into(),
            overrides: Settings::new(),
        }
    }

    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn overrides(mut self, overrides: Settings) -> Self {
        self.overrides = overrides;
        self
    }

    /// Cache key of the build description this request produces.
    pub fn signature(&self) -> Hash32 {
        Hash32::of("build-request", self)
    }
}
