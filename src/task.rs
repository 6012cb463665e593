use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::action::{ActionContext, CommandResult, TaskAction};
use crate::core::{Blake3Hasher, Hash32};
use crate::diagnostics::{Diagnostic, OutputDelegate};
use crate::node::Node;
use crate::process::ProcessRequest;

/// Where the executor finds the dependencies a tool discovered while running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "style", content = "path", rename_all = "kebab-case")]
pub enum DependencyData {
    /// A Makefile-style `.d` file.
    Makefile(Utf8PathBuf),
    /// A binary `ld -dependency_info` file.
    DependencyInfo(Utf8PathBuf),
}

impl DependencyData {
    pub fn style(&self) -> &'static str {
        match self {
            DependencyData::Makefile(_) => "makefile",
            DependencyData::DependencyInfo(_) => "dependency-info",
        }
    }

    pub fn path(&self) -> &Utf8Path {
        match self {
            DependencyData::Makefile(path) | DependencyData::DependencyInfo(path) => path,
        }
    }
}

/// Names another task without holding a reference to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRef {
    pub target: Option<String>,
    pub rule_info: Vec<String>,
}

impl TaskRef {
    pub fn new<I, S>(target: Option<&str>, rule_info: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.map(str::to_owned),
            rule_info: rule_info.into_iter().map(Into::into).collect(),
        }
    }
}

/// One unit of work, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlannedTask {
    pub target: Option<String>,
    /// The verb, e.g. `CompileC` or `CopyPlistFile`.
    pub task_type: String,
    pub rule_info: Vec<String>,
    pub command_line: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Utf8PathBuf,
    pub inputs: Vec<Node>,
    pub outputs: Vec<Node>,
    pub must_precede: Vec<TaskRef>,
    pub action: Option<TaskAction>,
    /// Does no work; exists only to join nodes, like target gates.
    pub phony: bool,
    pub execution_description: String,
    pub priority: u32,
    pub dependency_data: Option<DependencyData>,
    pub additional_signature: String,
    pub always_execute: bool,
    pub prepares_for_indexing: bool,
    pub enable_sandboxing: bool,
    pub repair_via_ownership_analysis: bool,
}

impl PlannedTask {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            target: self.target.clone(),
            rule_info: self.rule_info.clone(),
        }
    }

    pub fn rule_info_string(&self) -> String {
        self.rule_info.join(" ")
    }

    /// Content fingerprint for change detection. The owning target is not
    /// part of it, identical work in two targets signs the same.
    pub fn signature(&self) -> Hash32 {
        let mut hasher = Blake3Hasher::default();
        "planned-task".hash(&mut hasher);
        self.rule_info.hash(&mut hasher);
        self.command_line.hash(&mut hasher);
        self.environment.hash(&mut hasher);
        self.working_directory.hash(&mut hasher);
        for node in self.inputs.iter().chain(&self.outputs) {
            node.identifier().hash(&mut hasher);
        }
        self.inputs.len().hash(&mut hasher);
        (
            self.phony,
            self.always_execute,
            self.prepares_for_indexing,
            self.enable_sandboxing,
            self.repair_via_ownership_analysis,
        )
            .hash(&mut hasher);
        self.dependency_data.hash(&mut hasher);
        self.additional_signature.hash(&mut hasher);
        self.action.as_ref().map(TaskAction::signature).hash(&mut hasher);
        hasher.into()
    }

    pub fn executable(self) -> ExecutableTask {
        ExecutableTask { task: Arc::new(self) }
    }
}

/// Accumulates the pieces of a [`PlannedTask`].
///
/// Nothing is validated against the rest of the build here. A task without
/// outputs is accepted and reported later by the description builder, so a
/// whole batch of problems surfaces at once.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task: PlannedTask,
}

impl TaskBuilder {
    pub fn new<I, S>(task_type: impl Into<String>, rule_info: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task: PlannedTask {
                target: None,
                task_type: task_type.into(),
                rule_info: rule_info.into_iter().map(Into::into).collect(),
                command_line: Vec::new(),
                environment: BTreeMap::new(),
                working_directory: Utf8PathBuf::from("/"),
                inputs: Vec::new(),
                outputs: Vec::new(),
                must_precede: Vec::new(),
                action: None,
                phony: false,
                execution_description: String::new(),
                priority: 0,
                dependency_data: None,
                additional_signature: String::new(),
                always_execute: false,
                prepares_for_indexing: false,
                enable_sandboxing: false,
                repair_via_ownership_analysis: false,
            },
        }
    }

    /// A task that runs nothing and only forwards its inputs to its outputs.
    pub fn phony<I, S>(task_type: impl Into<String>, rule_info: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Self::new(task_type, rule_info);
        builder.task.phony = true;
        builder
    }

    pub fn target(mut self, target: Option<&str>) -> Self {
        self.task.target = target.map(str::to_owned);
        self
    }

    pub fn command_line<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task.command_line = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.task.environment.insert(key.into(), value.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.task.working_directory = dir.into();
        self
    }

    pub fn input(mut self, node: Node) -> Self {
        self.task.inputs.push(node);
        self
    }

    pub fn inputs(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.task.inputs.extend(nodes);
        self
    }

    pub fn output(mut self, node: Node) -> Self {
        self.task.outputs.push(node);
        self
    }

    pub fn outputs(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.task.outputs.extend(nodes);
        self
    }

    pub fn must_precede(mut self, task: TaskRef) -> Self {
        self.task.must_precede.push(task);
        self
    }

    pub fn action(mut self, action: TaskAction) -> Self {
        self.task.action = Some(action);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.task.execution_description = text.into();
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn dependency_data(mut self, data: DependencyData) -> Self {
        self.task.dependency_data = Some(data);
        self
    }

    pub fn additional_signature(mut self, data: impl Into<String>) -> Self {
        self.task.additional_signature = data.into();
        self
    }

    pub fn always_execute(mut self, value: bool) -> Self {
        self.task.always_execute = value;
        self
    }

    pub fn prepares_for_indexing(mut self, value: bool) -> Self {
        self.task.prepares_for_indexing = value;
        self
    }

    pub fn enable_sandboxing(mut self, value: bool) -> Self {
        self.task.enable_sandboxing = value;
        self
    }

    pub fn repair_via_ownership_analysis(mut self, value: bool) -> Self {
        self.task.repair_via_ownership_analysis = value;
        self
    }

    /// Finishes the task.
    ///
    /// # Panics
    ///
    /// If the rule info is empty, or if a non-phony task has neither a command
    /// line nor an in-process action. Both are mistakes in the calling tool
    /// spec.
    pub fn build(mut self) -> PlannedTask {
        assert!(!self.task.rule_info.is_empty(), "task rule info must not be empty");
        assert!(
            self.task.phony || !self.task.command_line.is_empty() || self.task.action.is_some(),
            "task '{}' has neither a command line nor an action",
            self.task.rule_info.join(" ")
        );

        if self.task.execution_description.is_empty() {
            self.task.execution_description = self.task.rule_info.join(" ");
        }

        self.task
    }
}

/// The executor-facing wrapper around a [`PlannedTask`].
#[derive(Debug, Clone)]
pub struct ExecutableTask {
    task: Arc<PlannedTask>,
}

impl ExecutableTask {
    pub fn task(&self) -> &PlannedTask {
        &self.task
    }

    /// Runs the in-process action, or spawns the command line through the
    /// context's process runner when the task has none.
    pub fn execute(&self, ctx: &ActionContext, output: &mut dyn OutputDelegate) -> CommandResult {
        if ctx.cancellation.is_cancelled() {
            return CommandResult::Cancelled;
        }

        let task = &*self.task;
        tracing::debug!("executing {}", task.execution_description);

        if task.phony {
            return CommandResult::Succeeded;
        }

        if let Some(action) = &task.action {
            return action.perform(task, ctx, output);
        }

        let kind = task.rule_info.first().unwrap_or(&task.task_type);
        let Some((program, args)) = task.command_line.split_first() else {
            output.emit(Diagnostic::error(format!(
                "Command {kind} has an empty command line"
            )));
            return CommandResult::Failed;
        };

        let request = ProcessRequest::new(program.clone())
            .args(args.iter().cloned())
            .env(task.environment.clone())
            .cwd(Some(task.working_directory.clone()));

        let result = ctx.processes.run(&request);

        if ctx.cancellation.is_cancelled() {
            return CommandResult::Cancelled;
        }

        match result {
            Ok(process) => {
                output.emit_output(&process.stdout);
                output.emit_output(&process.stderr);
                if process.is_success() {
                    CommandResult::Succeeded
                } else {
                    output.emit(Diagnostic::error(format!(
                        "Command {kind} failed with a nonzero exit code"
                    )));
                    CommandResult::Failed
                }
            }
            Err(e) => {
                output.emit(Diagnostic::error(format!("Unable to spawn process '{program}': {e}")));
                CommandResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{AuxiliaryFileAction, CancellationToken, NoClient};
    use crate::diagnostics::{Behavior, DiagnosticsCollector};
    use crate::fs::PseudoFs;
    use crate::process::{ProcessOutput, RecordingProcessRunner};

    fn compile(source: &str) -> TaskBuilder {
        TaskBuilder::new("CompileC", ["CompileC", source])
            .command_line(["clang", "-c", source])
            .input(Node::path(source))
            .output(Node::path(format!("{source}.o")))
    }

    #[test]
    fn test_builder_defaults_description() {
        let task = compile("/src/a.c").target(Some("Foo")).build();
        assert_eq!(task.execution_description, "CompileC /src/a.c");
        assert_eq!(task.task_ref(), TaskRef::new(Some("Foo"), ["CompileC", "/src/a.c"]));
    }

    #[test]
    fn test_builder_allows_no_outputs() {
        let task = TaskBuilder::new("Phony", ["Phony"]).command_line(["true"]).build();
        assert!(task.outputs.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_builder_rejects_empty_rule_info() {
        TaskBuilder::new("X", Vec::<String>::new())
            .command_line(["true"])
            .build();
    }

    #[test]
    fn test_signature_ignores_target_but_not_args() {
        let a = compile("/src/a.c").target(Some("Foo")).build();
        let b = compile("/src/a.c").target(Some("Bar")).build();
        let c = compile("/src/a.c").env("CC", "gcc").build();

        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_signature_tracks_action() {
        let make = |contents: &str| {
            TaskBuilder::new("WriteAuxiliaryFile", ["WriteAuxiliaryFile", "/o"])
                .action(TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/o", contents)))
                .output(Node::path("/o"))
                .build()
        };

        assert_ne!(make("a").signature(), make("b").signature());
    }

    #[test]
    fn test_execute_external_failure() {
        let fs = PseudoFs::new();
        let runner = RecordingProcessRunner::new();
        runner.respond(Ok(ProcessOutput::failure(1, "clang: error\n")));
        let ctx = ActionContext::new(&fs, &runner, &NoClient);

        let mut out = DiagnosticsCollector::new();
        let result = compile("/src/a.c").build().executable().execute(&ctx, &mut out);

        assert_eq!(result, CommandResult::Failed);
        assert_eq!(out.messages(Behavior::Error), vec!["Command CompileC failed with a nonzero exit code"]);
        assert_eq!(out.transcript_lossy(), "clang: error\n");
        assert_eq!(runner.requests()[0].display(), "clang -c /src/a.c");
    }

    #[test]
    fn test_execute_cancelled_before_start() {
        let fs = PseudoFs::new();
        let runner = RecordingProcessRunner::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let ctx = ActionContext::new(&fs, &runner, &NoClient).with_cancellation(cancellation);

        let mut out = DiagnosticsCollector::new();
        let result = compile("/src/a.c").build().executable().execute(&ctx, &mut out);

        assert_eq!(result, CommandResult::Cancelled);
        assert!(runner.requests().is_empty());
        assert!(out.diagnostics.is_empty());
    }
}
