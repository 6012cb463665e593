use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve, write_output};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::propertylist::{self, PlistFormat, openstep};
use crate::strings::{self, TextEncoding};
use crate::task::PlannedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputEncoding {
    Text(TextEncoding),
    /// The table as a binary property list.
    Binary,
}

/// `builtin-copyStrings [--validate] [--inputencoding ENC] [--outputencoding ENC]
/// --outdir DIR [--outfilename NAME] INPUT...`
///
/// The output encoding defaults to UTF-16 with a byte order mark.
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let mut validate = false;
    let mut input_encoding = None;
    let mut output_encoding = OutputEncoding::Text(TextEncoding::Utf16);
    let mut outdir = None;
    let mut outfilename: Option<String> = None;
    let mut inputs = Vec::new();

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--validate" => validate = true,
            "--inputencoding" => match args.next() {
                Some(name) => match TextEncoding::parse(name) {
                    Some(encoding) => input_encoding = Some(encoding),
                    None => sink.error(format!("unrecognized input encoding '{name}'")),
                },
                None => sink.error(missing_value("--inputencoding")),
            },
            "--outputencoding" => match args.next() {
                Some(name) if name == "binary" => output_encoding = OutputEncoding::Binary,
                Some(name) => match TextEncoding::parse(name) {
                    Some(encoding) => output_encoding = OutputEncoding::Text(encoding),
                    None => sink.error(format!("unrecognized output encoding '{name}'")),
                },
                None => sink.error(missing_value("--outputencoding")),
            },
            "--outdir" => match args.next() {
                Some(dir) => outdir = Some(resolve(task, dir)),
                None => sink.error(missing_value("--outdir")),
            },
            "--outfilename" => match args.next() {
                Some(name) => outfilename = Some(name.clone()),
                None => sink.error(missing_value("--outfilename")),
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
    if outfilename.is_some() && inputs.len() > 1 {
        sink.error("--outfilename can only be used with a single input file");
    }
    let Some(outdir) = outdir.filter(|_| !sink.has_errors()) else {
        return CommandResult::Failed;
    };

    for input in inputs {
        let Some(name) = outfilename.as_deref().or(input.file_name()) else {
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

        let detected = strings::detect(&bytes);
        let encoding = match input_encoding {
            Some(encoding) => encoding,
            None => {
                if detected.encoding != TextEncoding::Utf8 {
                    sink.note(format!("{input}: detected input encoding as {}", detected.encoding));
                }
                detected.encoding
            }
        };
        if encoding == TextEncoding::Utf8 && detected.encoding == TextEncoding::Utf8 && detected.bom_len > 0 {
            sink.note(format!("{input}: ignoring byte order mark in UTF-8 input"));
        }

        let text = match strings::decode(&bytes, encoding) {
            Ok(text) => text,
            Err(e) => {
                sink.error(format!("{input}: {e}"));
                continue;
            }
        };

        let needs_table = validate || output_encoding == OutputEncoding::Binary;
        let table = if needs_table {
            match openstep::parse(&text) {
                Ok(table) => Some(table),
                Err(e) => {
                    sink.error(format!("{input}: not a valid strings file: {e}"));
                    continue;
                }
            }
        } else {
            None
        };

        let contents = match (output_encoding, table) {
            (OutputEncoding::Binary, Some(table)) => match propertylist::write(&table, PlistFormat::Binary) {
                Ok(contents) => contents,
                Err(e) => {
                    sink.error(format!("{input}: {e}"));
                    continue;
                }
            },
            (OutputEncoding::Text(encoding), _) => match strings::encode(&text, encoding) {
                Ok(contents) => contents,
                Err(e) => {
                    sink.error(format!("{input}: {e}"));
                    continue;
                }
            },
            (OutputEncoding::Binary, None) => continue,
        };

        write_output(ctx.fs, &output, &contents, sink);
    }

    finish(sink)
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::action::TaskAction;
    use crate::action::testing::Harness;
    use crate::diagnostics::Behavior;
    use crate::fs::FileSystem;

    const TABLE: &str = "/* greeting */\n\"hello\" = \"Hallo Welt\";\n\"bye\" = \"Tschüss\";\n";

    fn run(harness: &Harness, extra: &[&str]) -> (CommandResult, DiagnosticsCollector) {
        let mut argv = vec!["builtin-copyStrings"];
        argv.extend_from_slice(extra);
        argv.extend_from_slice(&["--outdir", "/out", "/src/Localizable.strings"]);
        harness.run(TaskAction::CopyStrings, &argv)
    }

    #[test]
    fn test_utf8_to_utf16() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Localizable.strings", TABLE);

        let (result, out) = run(&harness, &["--validate", "--outputencoding", "utf-16"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert!(out.diagnostics.is_empty());
        let written = harness.fs.read(Utf8Path::new("/out/Localizable.strings")).unwrap();
        assert_eq!(written, strings::encode(TABLE, TextEncoding::Utf16).unwrap());
    }

    #[test]
    fn test_utf8_bom_gives_same_bytes_and_note() {
        let plain = Harness::new();
        plain.fs.add_file("/src/Localizable.strings", TABLE);
        run(&plain, &[]);

        let marked = Harness::new();
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(TABLE.as_bytes());
        marked.fs.add_file("/src/Localizable.strings", bytes);
        let (result, out) = run(&marked, &[]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(
            out.messages(Behavior::Note),
            vec!["/src/Localizable.strings: ignoring byte order mark in UTF-8 input"]
        );
        assert_eq!(
            marked.fs.read(Utf8Path::new("/out/Localizable.strings")).unwrap(),
            plain.fs.read(Utf8Path::new("/out/Localizable.strings")).unwrap()
        );
    }

    #[test]
    fn test_explicit_utf8_input_notes_byte_order_mark() {
        let harness = Harness::new();
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(TABLE.as_bytes());
        harness.fs.add_file("/src/Localizable.strings", bytes);

        let (result, out) = run(&harness, &["--inputencoding", "utf-8", "--outputencoding", "utf-8"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(
            out.messages(Behavior::Note),
            vec!["/src/Localizable.strings: ignoring byte order mark in UTF-8 input"]
        );
        assert_eq!(harness.fs.read(Utf8Path::new("/out/Localizable.strings")).unwrap(), TABLE.as_bytes());
    }

    #[test]
    fn test_ascii_output_fails_on_non_ascii() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Localizable.strings", TABLE);

        let (result, out) = run(&harness, &["--outputencoding", "ascii"]);

        assert_eq!(result, CommandResult::Failed);
        let errors = out.messages(Behavior::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'ascii' encoding"));
    }

    #[test]
    fn test_utf16_input_detected() {
        let harness = Harness::new();
        harness.fs.add_file(
            "/src/Localizable.strings",
            strings::encode("\"a\" = \"b\";", TextEncoding::Utf16).unwrap(),
        );

        let (result, out) = run(&harness, &["--outputencoding", "utf-8"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(
            out.messages(Behavior::Note),
            vec!["/src/Localizable.strings: detected input encoding as utf-16le"]
        );
        assert_eq!(harness.fs.read(Utf8Path::new("/out/Localizable.strings")).unwrap(), b"\"a\" = \"b\";");
    }

    #[test]
    fn test_binary_output() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Localizable.strings", TABLE);

        let (result, _) = run(&harness, &["--outputencoding", "binary"]);

        assert_eq!(result, CommandResult::Succeeded);
        let written = harness.fs.read(Utf8Path::new("/out/Localizable.strings")).unwrap();
        let (value, format) = propertylist::read(&written).unwrap();
        assert_eq!(format, PlistFormat::Binary);
        assert_eq!(
            value.as_dictionary().and_then(|d| d.get("bye")).and_then(|v| v.as_string()),
            Some("Tschüss")
        );
    }
}
