//! Actions that wrap a host tool or a client service.

use super::{ActionContext, CommandResult, arguments, finish, resolve};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::process::{ProcessOutput, ProcessRequest};
use crate::task::PlannedTask;

/// Noise `codesign` prints when re-signing an already signed product.
const REPLACING_SIGNATURE: &str = "replacing existing signature";

/// `register-execution-policy-exception PATH`
pub(super) fn register_exception(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let [path] = arguments(task) else {
        sink.error("expected exactly one path to register");
        return CommandResult::Failed;
    };

    let path = resolve(task, path);
    if !ctx.fs.exists(&path) {
        sink.error(format!("{path}: No such file or directory"));
        return CommandResult::Failed;
    }

    if let Err(e) = ctx.client.register_execution_policy_exception(&path) {
        sink.error(format!("failed to register execution policy exception for '{path}': {e}"));
    }

    finish(sink)
}

/// Runs `lsregister`. A failure to register is reported but never fails
/// the build.
pub(super) fn lsregister(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    match run_tool(task, ctx) {
        Some(Ok(output)) if output.is_success() => sink.emit_output(&output.stdout),
        Some(Ok(output)) => {
            sink.emit_output(&output.stderr);
            sink.warning(format!("lsregister exited with status {}", output.status));
        }
        Some(Err(e)) => sink.warning(format!("unable to run lsregister: {e}")),
        None => sink.error("no command line to run"),
    }

    finish(sink)
}

/// Runs `codesign`, filtering the replacement notice out of its output.
pub(super) fn codesign(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    match run_tool(task, ctx) {
        Some(Ok(output)) => {
            sink.emit_output(&output.stdout);
            sink.emit_output(&filter_lines(&output.stderr, REPLACING_SIGNATURE));
            if !output.is_success() {
                sink.error(format!("Command CodeSign failed with a nonzero exit code ({})", output.status));
            }
        }
        Some(Err(e)) => sink.error(format!("unable to run codesign: {e}")),
        None => sink.error("no command line to run"),
    }

    finish(sink)
}

fn run_tool(task: &PlannedTask, ctx: &ActionContext) -> Option<std::io::Result<ProcessOutput>> {
    let (program, args) = task.command_line.split_first()?;
    let request = ProcessRequest::new(program.as_str())
        .args(args.iter().map(String::as_str))
        .env(task.environment.clone())
        .cwd(Some(task.working_directory.clone()));

    Some(ctx.processes.run(&request))
}

fn filter_lines(bytes: &[u8], needle: &str) -> Vec<u8> {
    let needle = needle.as_bytes();
    bytes
        .split_inclusive(|&b| b == b'\n')
        .filter(|line| !line.windows(needle.len()).any(|w| w == needle))
        .flatten()
        .copied()
        .collect()
}
