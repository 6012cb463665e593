use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve, write_output};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::process::ProcessRequest;
use crate::task::PlannedTask;

const COMPRESSIONS: &[&str] = &["none", "lzw", "packbits", "jpeg"];

/// `builtin-copyTiff [--compression none|lzw|packbits|jpeg] --outdir DIR INPUT...`
///
/// Uncompressed copies happen in process. Recompression is delegated to
/// `tiffutil` through the process runner.
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let mut compression = "none".to_string();
    let mut outdir = None;
    let mut inputs = Vec::new();

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--compression" => match args.next() {
                Some(value) if COMPRESSIONS.contains(&value.as_str()) => compression = value.clone(),
                Some(value) => sink.error(format!(
                    "unsupported compression '{value}', expected one of: {}",
                    COMPRESSIONS.join(", ")
                )),
                None => sink.error(missing_value("--compression")),
            },
            "--outdir" => match args.next() {
                Some(dir) => outdir = Some(resolve(task, dir)),
                None => sink.error(missing_value("--outdir")),
            },
            flag if flag.starts_with("--") => sink.error(format!("unrecognized option: {flag}")),
            input => inputs.push(resolve(task, input)),
        }
    }

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

        if !is_tiff(&bytes) {
            sink.error(format!("{input}: not a TIFF file"));
            continue;
        }

        if compression == "none" {
            write_output(ctx.fs, &output, &bytes, sink);
            continue;
        }

        if let Err(e) = ctx.fs.create_dir_all(&outdir) {
            sink.error(format!("unable to create directory '{outdir}': {e}"));
            continue;
        }

        let flag = format!("-{compression}");
        let request = ProcessRequest::new("tiffutil")
            .args(["-cat", flag.as_str(), input.as_str(), "-out", output.as_str()])
            .cwd(Some(task.working_directory.clone()));

        match ctx.processes.run(&request) {
            Ok(process) if process.is_success() => sink.emit_output(&process.stdout),
            Ok(process) => {
                sink.emit_output(&process.stderr);
                sink.error(format!("tiffutil failed for '{input}' with exit code {}", process.status));
            }
            Err(e) => sink.error(format!("unable to run tiffutil: {e}")),
        }
    }

    finish(sink)
}

fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*")
}
