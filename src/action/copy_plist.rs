use camino::Utf8Path;

use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve, write_output};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::propertylist::{self, PlistFormat};
use crate::strings::{self, TextEncoding};
use crate::task::PlannedTask;

/// `builtin-copyPlist [--validate] [--convert FORMAT] --outdir DIR INPUT...`
///
/// `FORMAT` is `openstep1`, `xml1`, `binary1` or `same-as-input`.
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let mut validate = false;
    let mut convert: Option<PlistFormat> = None;
    let mut outdir = None;
    let mut inputs = Vec::new();

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--validate" => validate = true,
            "--convert" => match args.next().map(String::as_str) {
                Some("same-as-input") => convert = None,
                Some(name) => match PlistFormat::parse(name) {
                    Some(format) => convert = Some(format),
                    None => sink.error(format!("unrecognized property list format '{name}'")),
                },
                None => sink.error(missing_value("--convert")),
            },
            "--outdir" => match args.next() {
                Some(dir) => outdir = Some(resolve(task, dir)),
                None => sink.error(missing_value("--outdir")),
            },
            flag if flag.starts_with("--") => sink.error(format!("unrecognized option: {flag}")),
            input => inputs.push(resolve(task, input)),
        }
    }

    // Report every usage problem in one go.
    if outdir.is_none() {
        sink.error("no output directory specified (--outdir)");
    }
    if inputs.is_empty() {
        sink.error("no input files specified");
    }
    let Some(outdir) = outdir.filter(|_| !sink.has_errors()) else {
        return CommandResult::Failed;
    };

    for input in inputs {
        let Some(name) = input.file_name() else {
            sink.error(format!("{input}: not a file"));
            continue;
        };
        let output = outdir.join(name);

        let bytes = match ctx.fs.read(&input) {
            Ok(bytes) => bytes,
            Err(e) => {
                sink.error(format!("{input}: unable to read file: {e}"));
                continue;
            }
        };

        if convert.is_none() {
            note_detected(&input, &bytes, sink);
        }

        // Without conversion or validation the bytes are copied untouched.
        if convert.is_none() && !validate {
            write_output(ctx.fs, &output, &bytes, sink);
            continue;
        }

        let (value, found) = match propertylist::read(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                sink.error(format!("{input}: unable to read property list: {e}"));
                continue;
            }
        };

        let contents = match convert {
            Some(format) if format != found => match propertylist::write(&value, format) {
                Ok(contents) => contents,
                Err(e) => {
                    sink.error(format!("{input}: unable to write property list as {}: {e}", format.as_str()));
                    continue;
                }
            },
            _ => bytes,
        };

        write_output(ctx.fs, &output, &contents, sink);
    }

    finish(sink)
}

fn note_detected(input: &Utf8Path, bytes: &[u8], sink: &mut DiagnosticsCollector) {
    let format = PlistFormat::detect(bytes);
    sink.note(format!("{input}: detected property list format as {}", format.as_str()));

    if format != PlistFormat::Binary {
        let encoding = strings::detect(bytes).encoding;
        if encoding != TextEncoding::Utf8 {
            sink.note(format!("{input}: detected input encoding as {encoding}"));
        }
    }
}
