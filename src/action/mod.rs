//! In-process task actions.
//!
//! Every action reads its arguments from the task's command line, reports
//! through a [`DiagnosticsCollector`] and returns a [`CommandResult`]. The
//! dispatcher in [`TaskAction::perform`] turns any emitted error into
//! [`CommandResult::Failed`] and drops the diagnostics of a cancelled run.

mod aux_file;
mod copy;
mod copy_plist;
mod copy_strings;
mod copy_tiff;
mod dev_assets;
mod fsops;
mod info_plist;
mod merge_info_plist;
mod tools;
mod xcframework;

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::core::Hash32;
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::fs::FileSystem;
use crate::process::ProcessRunner;
use crate::task::PlannedTask;

pub use aux_file::AuxiliaryFileAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandResult {
    Succeeded,
    Failed,
    Cancelled,
}

/// Cooperative cancellation flag shared between the executor and running
/// actions.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Services owned by the client that launched the build.
pub trait ClientDelegate: Send + Sync + Debug {
    /// Exempts a freshly built executable from the host's execution policy.
    fn register_execution_policy_exception(&self, path: &Utf8Path) -> Result<(), String>;
}

/// A client that accepts every request and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClient;

impl ClientDelegate for NoClient {
    fn register_execution_policy_exception(&self, _: &Utf8Path) -> Result<(), String> {
        Ok(())
    }
}

/// What an action may touch while it runs.
pub struct ActionContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub processes: &'a dyn ProcessRunner,
    pub client: &'a dyn ClientDelegate,
    pub cancellation: CancellationToken,
}

impl<'a> ActionContext<'a> {
    pub fn new(fs: &'a dyn FileSystem, processes: &'a dyn ProcessRunner, client: &'a dyn ClientDelegate) -> Self {
        Self {
            fs,
            processes,
            client,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// The closed set of in-process actions.
///
/// The serde tag of each variant is its stable name in serialized build
/// descriptions and manifests, and doubles as the tool name a task's command
/// line starts with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", content = "params")]
pub enum TaskAction {
    #[serde(rename = "auxiliary-file")]
    AuxiliaryFile(AuxiliaryFileAction),
    #[serde(rename = "builtin-copy")]
    Copy,
    #[serde(rename = "builtin-copyPlist")]
    CopyPlist,
    #[serde(rename = "builtin-copyStrings")]
    CopyStrings,
    #[serde(rename = "builtin-copyTiff")]
    CopyTiff,
    #[serde(rename = "builtin-infoPlistUtility")]
    InfoPlistProcessor,
    #[serde(rename = "builtin-mergeInfoPlist")]
    MergeInfoPlist,
    #[serde(rename = "builtin-validate-development-assets")]
    ValidateDevelopmentAssets,
    #[serde(rename = "register-execution-policy-exception")]
    RegisterExecutionPolicyException,
    #[serde(rename = "lsregister")]
    LaunchServicesRegister,
    #[serde(rename = "codesign")]
    CodeSign,
    #[serde(rename = "builtin-symlink")]
    Symlink,
    #[serde(rename = "builtin-concatenate")]
    Concatenate,
    #[serde(rename = "builtin-create-build-directory")]
    CreateBuildDirectory,
    #[serde(rename = "builtin-process-xcframework")]
    ProcessXcFramework,
}

impl TaskAction {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::AuxiliaryFile(_) => "auxiliary-file",
            TaskAction::Copy => "builtin-copy",
            TaskAction::CopyPlist => "builtin-copyPlist",
            TaskAction::CopyStrings => "builtin-copyStrings",
            TaskAction::CopyTiff => "builtin-copyTiff",
            TaskAction::InfoPlistProcessor => "builtin-infoPlistUtility",
            TaskAction::MergeInfoPlist => "builtin-mergeInfoPlist",
            TaskAction::ValidateDevelopmentAssets => "builtin-validate-development-assets",
            TaskAction::RegisterExecutionPolicyException => "register-execution-policy-exception",
            TaskAction::LaunchServicesRegister => "lsregister",
            TaskAction::CodeSign => "codesign",
            TaskAction::Symlink => "builtin-symlink",
            TaskAction::Concatenate => "builtin-concatenate",
            TaskAction::CreateBuildDirectory => "builtin-create-build-directory",
            TaskAction::ProcessXcFramework => "builtin-process-xcframework",
        }
    }

    /// Looks up the argv-driven action for a tool name. The tool may be given
    /// as a path, only its file name counts.
    pub fn for_tool(tool: &str) -> Option<TaskAction> {
        let name = Utf8Path::new(tool).file_name().unwrap_or(tool);
        let action = match name {
            "builtin-copy" => TaskAction::Copy,
            "builtin-copyPlist" => TaskAction::CopyPlist,
            "builtin-copyStrings" => TaskAction::CopyStrings,
            "builtin-copyTiff" => TaskAction::CopyTiff,
            "builtin-infoPlistUtility" => TaskAction::InfoPlistProcessor,
            "builtin-mergeInfoPlist" => TaskAction::MergeInfoPlist,
            "builtin-validate-development-assets" => TaskAction::ValidateDevelopmentAssets,
            "builtin-RegisterExecutionPolicyException" | "register-execution-policy-exception" => {
                TaskAction::RegisterExecutionPolicyException
            }
            "lsregister" => TaskAction::LaunchServicesRegister,
            "codesign" => TaskAction::CodeSign,
            "builtin-symlink" => TaskAction::Symlink,
            "builtin-concatenate" => TaskAction::Concatenate,
            "builtin-create-build-directory" => TaskAction::CreateBuildDirectory,
            "builtin-process-xcframework" => TaskAction::ProcessXcFramework,
            _ => return None,
        };
        Some(action)
    }

    /// Fingerprint of the construction parameters. Equal parameters give an
    /// equal signature, any difference gives a different one.
    pub fn signature(&self) -> Hash32 {
        Hash32::of(self.kind(), self)
    }

    pub fn perform(&self, task: &PlannedTask, ctx: &ActionContext, output: &mut dyn OutputDelegate) -> CommandResult {
        let mut sink = DiagnosticsCollector::new();

        let result = match self {
            TaskAction::AuxiliaryFile(action) => action.perform(ctx, &mut sink),
            TaskAction::Copy => copy::perform(task, ctx, &mut sink),
            TaskAction::CopyPlist => copy_plist::perform(task, ctx, &mut sink),
            TaskAction::CopyStrings => copy_strings::perform(task, ctx, &mut sink),
            TaskAction::CopyTiff => copy_tiff::perform(task, ctx, &mut sink),
            TaskAction::InfoPlistProcessor => info_plist::perform(task, ctx, &mut sink),
            TaskAction::MergeInfoPlist => merge_info_plist::perform(task, ctx, &mut sink),
            TaskAction::ValidateDevelopmentAssets => dev_assets::perform(task, ctx, &mut sink),
            TaskAction::RegisterExecutionPolicyException => tools::register_exception(task, ctx, &mut sink),
            TaskAction::LaunchServicesRegister => tools::lsregister(task, ctx, &mut sink),
            TaskAction::CodeSign => tools::codesign(task, ctx, &mut sink),
            TaskAction::Symlink => fsops::symlink(task, ctx, &mut sink),
            TaskAction::Concatenate => fsops::concatenate(task, ctx, &mut sink),
            TaskAction::CreateBuildDirectory => fsops::create_build_directory(task, ctx, &mut sink),
            TaskAction::ProcessXcFramework => xcframework::perform(task, ctx, &mut sink),
        };

        if result == CommandResult::Cancelled || ctx.cancellation.is_cancelled() {
            tracing::debug!(
                "discarding {} diagnostics of cancelled {}",
                sink.diagnostics.len(),
                self.kind()
            );
            return CommandResult::Cancelled;
        }

        let failed = result == CommandResult::Failed || sink.has_errors();
        sink.forward(output);

        if failed {
            CommandResult::Failed
        } else {
            CommandResult::Succeeded
        }
    }
}

/// Arguments after the tool name.
pub(crate) fn arguments(task: &PlannedTask) -> &[String] {
    task.command_line.get(1..).unwrap_or_default()
}

/// Resolves a command line path against the task's working directory.
pub(crate) fn resolve(task: &PlannedTask, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        task.working_directory.join(path)
    }
}

/// Error for an option that needs a value but is the last argument.
pub(crate) fn missing_value(option: &str) -> String {
    format!("missing argument for option '{option}'")
}

/// Shorthand for the result of an action that reported everything through
/// its sink.
pub(crate) fn finish(sink: &DiagnosticsCollector) -> CommandResult {
    if sink.has_errors() {
        CommandResult::Failed
    } else {
        CommandResult::Succeeded
    }
}

/// Creates the parent directory of `path` and writes the file, reporting
/// failures against the path.
pub(crate) fn write_output(fs: &dyn FileSystem, path: &Utf8Path, contents: &[u8], sink: &mut DiagnosticsCollector) -> bool {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
        && let Err(e) = fs.create_dir_all(parent)
    {
        sink.error(format!("unable to create directory '{parent}': {e}"));
        return false;
    }

    match fs.write(path, contents) {
        Ok(()) => true,
        Err(e) => {
            sink.error(format!("unable to write file '{path}': {e}"));
            false
        }
    }
}
