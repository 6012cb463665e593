use plist::{Dictionary, Value};

use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve, write_output};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::propertylist::merge::{ArrayPolicy, merge_dictionaries};
use crate::propertylist::{self, PlistFormat};
use crate::task::PlannedTask;

/// `builtin-mergeInfoPlist -o OUTPUT INPUT...`
///
/// Inputs are merged left to right, arrays keep one copy of each item.
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let mut output = None;
    let mut inputs = Vec::new();

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => match args.next() {
                Some(path) => output = Some(resolve(task, path)),
                None => sink.error(missing_value("-o")),
            },
            flag if flag.starts_with('-') && flag.len() > 1 => sink.error(format!("unrecognized option: {flag}")),
            input => inputs.push(resolve(task, input)),
        }
    }

    if output.is_none() {
        sink.error("no output file specified (-o)");
    }
    if inputs.is_empty() {
        sink.error("no input files specified");
    }
    let Some(output) = output.filter(|_| !sink.has_errors()) else {
        return CommandResult::Failed;
    };

    let mut merged = Dictionary::new();
    for input in &inputs {
        let parsed = ctx
            .fs
            .read(input)
            .map_err(|e| e.to_string())
            .and_then(|bytes| propertylist::read(&bytes).map_err(|e| e.to_string()));

        match parsed {
            Ok((Value::Dictionary(dict), _)) => {
                if let Err(e) = merge_dictionaries(&mut merged, &dict, ArrayPolicy::Union) {
                    sink.error(format!("{input}: {e}"));
                }
            }
            Ok(_) => sink.error(format!("{input}: the root object must be a dictionary")),
            Err(e) => sink.error(format!("{input}: unable to read property list: {e}")),
        }
    }

    if sink.has_errors() {
        return CommandResult::Failed;
    }

    match propertylist::write(&Value::Dictionary(merged), PlistFormat::Xml) {
        Ok(bytes) => {
            write_output(ctx.fs, &output, &bytes, sink);
        }
        Err(e) => sink.error(format!("{output}: {e}")),
    }

    finish(sink)
}
