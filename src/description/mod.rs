//! The build description: every planned task of one build, in a fixed order,
//! with the node graph they form and everything a later build needs to tell
//! whether the description can be reused.

mod builder;
mod manifest;
pub mod search_paths;
pub mod serial;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::FileSystemMode;
use crate::core::Hash32;
use crate::diagnostics::{Behavior, ScopedDiagnostic};
use crate::error::{DescriptionError, SerialError};
use crate::node::Node;
use crate::settings::Settings;
use crate::task::PlannedTask;

pub use builder::BuildDescriptionBuilder;
pub(crate) use manifest::{target_begin_node, target_end_node};
pub use search_paths::{CachedSearchPaths, RecursiveSearchPathResolver, ResolvedSearchPaths, SearchPathKey};

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalSource {
    New,
    InMemoryCache,
    OnDiskCache,
}

/// The `client` header of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: u32,
    pub file_system_mode: FileSystemMode,
    pub perform_ownership_analysis: bool,
    pub workspace: String,
    /// Requested targets plus their dependencies, dependencies first.
    pub targets: Vec<String>,
}

/// A task in its final position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Unique manifest command name.
    pub key: String,
    pub signature: Hash32,
    /// Virtual nodes added for `must_precede` ordering.
    pub ordering_inputs: Vec<Node>,
    pub ordering_outputs: Vec<Node>,
    pub task: PlannedTask,
}

impl TaskEntry {
    pub fn inputs(&self) -> impl Iterator<Item = &Node> {
        self.task.inputs.iter().chain(&self.ordering_inputs)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Node> {
        self.task.outputs.iter().chain(&self.ordering_outputs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescription {
    pub signature: Hash32,
    pub client: ClientInfo,
    pub tasks: Vec<TaskEntry>,
    /// Every node referenced by a task, by identifier.
    pub nodes: BTreeMap<String, Node>,
    pub target_dependencies: BTreeMap<String, Vec<String>>,
    pub settings: BTreeMap<String, Settings>,
    pub search_paths: Vec<CachedSearchPaths>,
    pub diagnostics: Vec<ScopedDiagnostic>,
}

impl BuildDescription {
    pub fn task(&self, key: &str) -> Option<&TaskEntry> {
        self.tasks.iter().find(|entry| entry.key == key)
    }

    pub fn tasks_of<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a TaskEntry> + 'a {
        self.tasks
            .iter()
            .filter(move |entry| entry.task.target.as_deref() == Some(target))
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|scoped| scoped.diagnostic.behavior == Behavior::Error)
    }

    /// The manifest handed to the low-level executor, as pretty JSON.
    pub fn manifest(&self) -> Result<String, DescriptionError> {
        manifest::render(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerialError> {
        serial::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError> {
        serial::deserialize(bytes)
    }
}
