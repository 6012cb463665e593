//! Tool specs: the pieces that know how a particular tool is invoked.
//!
//! A spec reads its inputs, outputs and settings from a
//! [`CommandBuildContext`] and hands finished [`TaskBuilder`]s to a
//! [`TaskGenerationDelegate`]. Specs never see each other or the rest of the
//! build, which is what lets the planner run them for many targets at once.

mod builtin;

use std::fmt::Debug;

use camino::{Utf8Path, Utf8PathBuf};

use crate::context::CommandBuildContext;
use crate::diagnostics::Diagnostic;
use crate::node::Node;
use crate::task::TaskBuilder;

pub use builtin::{
    CodeSignSpec, CompileSpec, CopyPlistSpec, CopySpec, CopyStringsSpec, CopyTiffSpec, InfoPlistSpec, LinkSpec,
    MkdirSpec, SymlinkSpec,
};

/// Receives what a spec produces.
pub trait TaskGenerationDelegate {
    fn add_task(&mut self, task: TaskBuilder);

    /// Schedules a file whose contents are known at planning time and returns
    /// the node a consuming task should take as input.
    fn create_aux_file(&mut self, path: &Utf8Path, contents: Vec<u8>, executable: bool) -> Node;

    /// Expands a search path setting entry, recursive or not, to directories.
    fn search_paths(&mut self, expression: &str) -> Vec<Utf8PathBuf>;

    fn emit(&mut self, diagnostic: Diagnostic);
}

pub trait ToolSpec: Send + Sync + Debug {
    fn identifier(&self) -> &'static str;

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate);
}

/// A builder carrying what every spec copies from the context: owning target,
/// working directory, input files and ordering nodes.
fn task_for<I, S>(cbc: &CommandBuildContext, task_type: &str, rule_info: I) -> TaskBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    TaskBuilder::new(task_type, rule_info)
        .target(cbc.target)
        .working_directory(cbc.working_directory.clone())
        .inputs(cbc.input_nodes())
}

/// Reports a context a tool spec cannot work with.
fn malformed(spec: &dyn ToolSpec, delegate: &mut dyn TaskGenerationDelegate, what: &str) {
    delegate.emit(Diagnostic::error(format!("{} requires {what}", spec.identifier())));
}
