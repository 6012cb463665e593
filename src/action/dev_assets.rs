use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::task::PlannedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validation {
    No,
    Warn,
    Error,
}

/// `builtin-validate-development-assets [--validate YES|YES_ERROR|NO] PATH...`
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let mut validation = Validation::Warn;
    let mut paths = Vec::new();

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--validate" => match args.next().map(String::as_str) {
                Some("YES") => validation = Validation::Warn,
                Some("YES_ERROR") => validation = Validation::Error,
                Some("NO") => validation = Validation::No,
                Some(other) => sink.error(format!("invalid value '{other}' for --validate")),
                None => sink.error(missing_value("--validate")),
            },
            flag if flag.starts_with("--") => sink.error(format!("unrecognized option: {flag}")),
            path => paths.push(resolve(task, path)),
        }
    }

    if sink.has_errors() || validation == Validation::No {
        return finish(sink);
    }

    for path in paths.iter().filter(|path| !ctx.fs.exists(path)) {
        let message = format!("One of the paths in DEVELOPMENT_ASSET_PATHS does not exist: {path}");
        match validation {
            Validation::Error => sink.error(message),
            _ => sink.warning(message),
        }
    }

    finish(sink)
}
