use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{BuildDescription, TaskEntry};
use crate::error::DescriptionError;
use crate::node::Node;

const ALL: &str = "<all>";

#[derive(Serialize)]
struct Manifest<'a> {
    client: Client<'a>,
    targets: BTreeMap<String, Vec<String>>,
    nodes: BTreeMap<String, NodeAttributes<'a>>,
    commands: BTreeMap<String, Command<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Client<'a> {
    name: &'a str,
    version: u32,
    file_system: &'static str,
    perform_ownership_analysis: bool,
    workspace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct NodeAttributes<'a> {
    is_directory_tree: bool,
    #[serde(skip_serializing_if = "no_items")]
    content_exclusion_patterns: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Command<'a> {
    tool: &'static str,
    description: &'a str,
    inputs: Vec<String>,
    outputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'static str>,
    #[serde(skip_serializing_if = "no_items")]
    args: &'a [String],
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_directory: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deps: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deps_style: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    always_out_of_date: bool,
    #[serde(skip_serializing_if = "is_false")]
    repair_via_ownership_analysis: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn no_items(items: &&[String]) -> bool {
    items.is_empty()
}

/// Node that completes when every task of `target` has.
pub(crate) fn target_end_node(target: &str) -> Node {
    Node::virtual_node(format!("target-{target}-end"))
}

pub(crate) fn target_begin_node(target: &str) -> Node {
    Node::virtual_node(format!("target-{target}-begin"))
}

pub(super) fn render(description: &BuildDescription) -> Result<String, DescriptionError> {
    let client = &description.client;

    let mut targets = BTreeMap::new();
    let mut everything = BTreeSet::new();
    for target in &client.targets {
        let entry_points = target_entry_points(description, target);
        everything.extend(entry_points.iter().cloned());
        targets.insert(target.clone(), entry_points);
    }
    targets.insert(String::new(), vec![ALL.to_owned()]);

    let nodes = description
        .nodes
        .iter()
        .filter_map(|(identifier, node)| match node {
            Node::DirectoryTree { excluding, .. } => Some((
                identifier.clone(),
                NodeAttributes {
                    is_directory_tree: true,
                    content_exclusion_patterns: excluding,
                },
            )),
            _ => None,
        })
        .collect();

    let mut commands: BTreeMap<String, Command> = description
        .tasks
        .iter()
        .map(|entry| (entry.key.clone(), command(entry, client.perform_ownership_analysis)))
        .collect();

    commands.insert(
        ALL.to_owned(),
        Command {
            tool: "phony",
            description: "",
            inputs: everything.into_iter().collect(),
            outputs: vec![ALL.to_owned()],
            action: None,
            args: &[],
            env: BTreeMap::new(),
            working_directory: None,
            deps: None,
            deps_style: None,
            signature: None,
            always_out_of_date: false,
            repair_via_ownership_analysis: false,
        },
    );

    let manifest = Manifest {
        client: Client {
            name: &client.name,
            version: client.version,
            file_system: client.file_system_mode.as_str(),
            perform_ownership_analysis: client.perform_ownership_analysis,
            workspace: &client.workspace,
        },
        targets,
        nodes,
        commands,
    };

    let mut text = serde_json::to_string_pretty(&manifest)?;
    text.push('\n');
    Ok(text)
}

/// What building `target` means: its end gate when one is produced,
/// otherwise every output of its tasks.
fn target_entry_points(description: &BuildDescription, target: &str) -> Vec<String> {
    let end = target_end_node(target);
    let owned = || {
        description
            .tasks
            .iter()
            .filter(|entry| entry.task.target.as_deref() == Some(target))
    };

    if owned().any(|entry| entry.task.outputs.contains(&end)) {
        return vec![end.identifier()];
    }

    owned()
        .flat_map(|entry| entry.task.outputs.iter().map(Node::identifier))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn command(entry: &TaskEntry, ownership_analysis: bool) -> Command<'_> {
    let task = &entry.task;

    let tool = if task.phony {
        "phony"
    } else if task.action.is_some() {
        "swb-task-action"
    } else {
        "shell"
    };

    Command {
        tool,
        description: &task.execution_description,
        inputs: entry.inputs().map(Node::identifier).collect(),
        outputs: entry.outputs().map(Node::identifier).collect(),
        action: task.action.as_ref().map(|action| action.kind()),
        args: if task.phony { &[] } else { task.command_line.as_slice() },
        env: task
            .environment
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        working_directory: (!task.phony).then_some(task.working_directory.as_str()),
        deps: task.dependency_data.as_ref().map(|data| data.path().as_str()),
        deps_style: task.dependency_data.as_ref().map(|data| data.style()),
        signature: (!task.phony).then(|| entry.signature.to_hex()),
        always_out_of_date: task.always_execute,
        repair_via_ownership_analysis: ownership_analysis && task.repair_via_ownership_analysis,
    }
}
