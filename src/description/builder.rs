use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use super::{BuildDescription, CachedSearchPaths, ClientInfo, TaskEntry, serial};
use crate::config::BuildConfig;
use crate::core::Hash32;
use crate::diagnostics::{Diagnostic, ScopedDiagnostic};
use crate::error::DescriptionError;
use crate::node::Node;
use crate::planner::PlanResult;
use crate::settings::Settings;
use crate::task::{PlannedTask, TaskRef};

const CLIENT_NAME: &str = "basic";

/// Collects planned tasks and turns them into a [`BuildDescription`].
///
/// Construction validates the whole task set at once. Tasks without outputs
/// abort construction, every other problem (conflicting producers, unknown
/// ordering targets, cycles) becomes a diagnostic on the description so the
/// caller sees all of them in one pass.
#[derive(Debug, Clone)]
pub struct BuildDescriptionBuilder {
    signature: Hash32,
    client: ClientInfo,
    tasks: Vec<PlannedTask>,
    diagnostics: Vec<ScopedDiagnostic>,
    target_dependencies: BTreeMap<String, Vec<String>>,
    settings: BTreeMap<String, Settings>,
    search_paths: Vec<CachedSearchPaths>,
}

impl BuildDescriptionBuilder {
    pub fn new(config: &BuildConfig, workspace: impl Into<String>, signature: Hash32) -> Self {
        Self {
            signature,
            client: ClientInfo {
                name: CLIENT_NAME.to_owned(),
                version: serial::FORMAT_VERSION,
                file_system_mode: config.file_system_mode,
                perform_ownership_analysis: config.perform_ownership_analysis,
                workspace: workspace.into(),
                targets: Vec::new(),
            },
            tasks: Vec::new(),
            diagnostics: Vec::new(),
            target_dependencies: BTreeMap::new(),
            settings: BTreeMap::new(),
            search_paths: Vec::new(),
        }
    }

    pub fn from_plan(config: &BuildConfig, signature: Hash32, plan: PlanResult) -> Self {
        let mut builder = Self::new(config, plan.workspace, signature)
            .targets(plan.targets)
            .tasks(plan.tasks)
            .diagnostics(plan.diagnostics);
        builder.target_dependencies = plan.target_dependencies;
        builder.settings = plan.settings;
        builder.search_paths = plan.search_paths;
        builder
    }

    /// Targets listed in the manifest. Defaults to every target that owns a
    /// task.
    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn task(mut self, task: PlannedTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = PlannedTask>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn diagnostics(mut self, diagnostics: impl IntoIterator<Item = ScopedDiagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    pub fn target_dependencies(mut self, target: impl Into<String>, dependencies: Vec<String>) -> Self {
        self.target_dependencies.insert(target.into(), dependencies);
        self
    }

    pub fn settings(mut self, target: impl Into<String>, settings: Settings) -> Self {
        self.settings.insert(target.into(), settings);
        self
    }

    pub fn search_paths(mut self, cached: Vec<CachedSearchPaths>) -> Self {
        self.search_paths = cached;
        self
    }

    pub fn construct(self) -> Result<BuildDescription, DescriptionError> {
        let Self {
            signature,
            mut client,
            tasks,
            mut diagnostics,
            target_dependencies,
            settings,
            search_paths,
        } = self;

        let mut malformed: Vec<ScopedDiagnostic> = tasks
            .iter()
            .filter(|task| task.outputs.is_empty())
            .map(|task| {
                ScopedDiagnostic::new(
                    task.target.as_deref(),
                    Diagnostic::error(format!("unexpected task with no outputs: '{}'", task.rule_info_string())),
                )
            })
            .collect();

        if !malformed.is_empty() {
            malformed.sort();
            return Err(DescriptionError::MalformedTasks(malformed));
        }

        if client.targets.is_empty() {
            let owners: BTreeSet<&str> = tasks.iter().filter_map(|task| task.target.as_deref()).collect();
            client.targets = owners.into_iter().map(str::to_owned).collect();
        }

        let mut entries = assign_keys(tasks);
        lower_must_precede(&mut entries, &mut diagnostics);

        let producers = producers(&entries);
        diagnostics.extend(duplicate_outputs(&entries, &producers));
        diagnostics.extend(cycles(&entries, &producers));
        diagnostics.sort();

        let mut nodes = BTreeMap::new();
        for entry in &entries {
            for node in entry.inputs().chain(entry.outputs()) {
                nodes.entry(node.identifier()).or_insert_with(|| node.clone());
            }
        }

        tracing::info!(
            "constructed build description {} with {} tasks and {} nodes",
            signature,
            entries.len(),
            nodes.len()
        );

        Ok(BuildDescription {
            signature,
            client,
            tasks: entries,
            nodes,
            target_dependencies,
            settings,
            search_paths,
            diagnostics,
        })
    }
}

/// Sorts the tasks and gives each a unique key.
///
/// The order only depends on task content, never on the order tasks were
/// added in, so concurrently planned targets serialize identically.
fn assign_keys(mut tasks: Vec<PlannedTask>) -> Vec<TaskEntry> {
    tasks.sort_by_cached_key(|task| {
        (
            task.target.clone(),
            task.rule_info.clone(),
            task.outputs.iter().map(Node::identifier).collect::<Vec<_>>(),
            task.signature(),
        )
    });

    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    tasks
        .into_iter()
        .map(|task| {
            let base = format!(
                "P{}:{}:{}",
                task.priority,
                task.target.as_deref().unwrap_or("workspace"),
                task.rule_info_string()
            );
            let count = seen.entry(base.clone()).or_default();
            *count += 1;
            let key = match *count {
                1 => base,
                n => format!("{base}#{n}"),
            };

            TaskEntry {
                key,
                signature: task.signature(),
                ordering_inputs: Vec::new(),
                ordering_outputs: Vec::new(),
                task,
            }
        })
        .collect()
}

/// Turns every `must_precede` hint into a virtual node produced by the
/// earlier task and consumed by the later one.
fn lower_must_precede(entries: &mut [TaskEntry], diagnostics: &mut Vec<ScopedDiagnostic>) {
    let mut by_ref: BTreeMap<TaskRef, Vec<usize>> = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        by_ref.entry(entry.task.task_ref()).or_default().push(i);
    }

    for i in 0..entries.len() {
        for follower in entries[i].task.must_precede.clone() {
            let Some(followers) = by_ref.get(&follower) else {
                let task = &entries[i].task;
                tracing::debug!("dropping ordering hint of '{}'", task.rule_info_string());
                diagnostics.push(ScopedDiagnostic::new(
                    task.target.as_deref(),
                    Diagnostic::warning(format!(
                        "Task '{}' must precede '{}', which is not part of the build",
                        task.rule_info_string(),
                        follower.rule_info.join(" ")
                    )),
                ));
                continue;
            };

            let node = Node::virtual_node(format!("ordering:{}", entries[i].key));
            for &j in followers.iter().filter(|&&j| j != i) {
                if !entries[i].ordering_outputs.contains(&node) {
                    entries[i].ordering_outputs.push(node.clone());
                }
                if !entries[j].ordering_inputs.contains(&node) {
                    entries[j].ordering_inputs.push(node.clone());
                }
            }
        }
    }
}

/// Output identifier to the indices of the tasks producing it.
fn producers(entries: &[TaskEntry]) -> BTreeMap<String, Vec<usize>> {
    let mut producers: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        for node in entry.outputs() {
            let list = producers.entry(node.identifier()).or_default();
            if !list.contains(&i) {
                list.push(i);
            }
        }
    }
    producers
}

fn duplicate_outputs(entries: &[TaskEntry], producers: &BTreeMap<String, Vec<usize>>) -> Vec<ScopedDiagnostic> {
    let mut out = Vec::new();

    for (output, indices) in producers.iter().filter(|(_, indices)| indices.len() > 1) {
        let mut tasks: Vec<&PlannedTask> = indices.iter().map(|&i| &entries[i].task).collect();
        tasks.sort_by(|a, b| {
            (a.target.as_deref(), a.rule_info.first(), &a.rule_info).cmp(&(
                b.target.as_deref(),
                b.rule_info.first(),
                &b.rule_info,
            ))
        });

        let children = tasks
            .iter()
            .map(|task| {
                let kind = task.rule_info.first().map(String::as_str).unwrap_or(&task.task_type);
                Diagnostic::note(match &task.target {
                    Some(target) => format!("Target '{target}' has {kind} command with output '{output}'"),
                    None => format!("Workspace has {kind} command with output '{output}'"),
                })
            })
            .collect();

        tracing::debug!("{} tasks produce {output}", tasks.len());
        out.push(ScopedDiagnostic::new(
            None,
            Diagnostic::error(format!("Multiple commands produce '{output}'")).with_children(children),
        ));
    }

    out
}

fn cycles(entries: &[TaskEntry], producers: &BTreeMap<String, Vec<usize>>) -> Vec<ScopedDiagnostic> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(entries.len(), entries.len());
    let indices: Vec<NodeIndex> = (0..entries.len()).map(|i| graph.add_node(i)).collect();

    for (i, entry) in entries.iter().enumerate() {
        let mut linked = BTreeSet::new();
        for node in entry.inputs() {
            for &producer in producers.get(&node.identifier()).into_iter().flatten() {
                if linked.insert(producer) {
                    graph.add_edge(indices[producer], indices[i], ());
                }
            }
        }
    }

    let mut out = Vec::new();
    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&i| graph.contains_edge(i, i));
        if !is_cycle {
            continue;
        }

        let mut keys: Vec<&str> = component.iter().map(|&i| entries[graph[i]].key.as_str()).collect();
        keys.sort_unstable();
        out.push(ScopedDiagnostic::new(
            None,
            Diagnostic::error(format!("Cycle in task graph: {}", keys.join(" -> "))),
        ));
    }

    out
}
