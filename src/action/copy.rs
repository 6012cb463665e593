use camino::Utf8Path;
use glob::Pattern;

use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::fs::FileSystem;
use crate::task::PlannedTask;

struct Options {
    excludes: Vec<Pattern>,
    resolve_symlinks: bool,
    verbose: bool,
    operands: Vec<String>,
}

/// `builtin-copy [-exclude PATTERN]... [-resolve-src-symlinks] [-V] SOURCE... DEST-DIR`
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let Some(options) = parse(arguments(task), sink) else {
        return CommandResult::Failed;
    };

    let Some((destination, sources)) = options.operands.split_last() else {
        sink.error("no source files and no destination directory specified");
        return CommandResult::Failed;
    };

    if sources.is_empty() {
        sink.error("no source files specified");
        return CommandResult::Failed;
    }

    let destination = resolve(task, destination);
    if let Err(e) = ctx.fs.create_dir_all(&destination) {
        sink.error(format!("unable to create directory '{destination}': {e}"));
        return CommandResult::Failed;
    }

    for source in sources {
        if ctx.cancellation.is_cancelled() {
            return CommandResult::Cancelled;
        }

        let source = resolve(task, source);
        if !ctx.fs.exists(&source) {
            sink.error(format!("{source}: No such file or directory"));
            continue;
        }

        let Some(name) = source.file_name() else {
            sink.error(format!("{source}: cannot copy a path without a file name"));
            continue;
        };

        let target = destination.join(name);
        if options.verbose {
            sink.emit_output(format!("{source} -> {target}\n").as_bytes());
        }

        if target.starts_with(&source) {
            sink.error(format!("cannot copy '{source}' into itself ('{target}')"));
            continue;
        }

        if ctx.fs.exists(&target)
            && let Err(e) = ctx.fs.remove(&target)
        {
            sink.error(format!("unable to remove '{target}': {e}"));
            continue;
        }

        if let Err(e) = copy_entry(ctx.fs, &source, &target, &options) {
            sink.error(format!("unable to copy '{source}' to '{target}': {e}"));
        }
    }

    finish(sink)
}

fn parse(args: &[String], sink: &mut DiagnosticsCollector) -> Option<Options> {
    let mut options = Options {
        excludes: Vec::new(),
        resolve_symlinks: false,
        verbose: false,
        operands: Vec::new(),
    };
    let mut ok = true;

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-exclude" => match args.next() {
                Some(pattern) => match Pattern::new(pattern) {
                    Ok(pattern) => options.excludes.push(pattern),
                    Err(e) => {
                        sink.error(format!("invalid exclude pattern '{pattern}': {e}"));
                        ok = false;
                    }
                },
                None => {
                    sink.error(missing_value("-exclude"));
                    ok = false;
                }
            },
            "-resolve-src-symlinks" => options.resolve_symlinks = true,
            "-V" => options.verbose = true,
            "--" => options.operands.extend(args.by_ref().cloned()),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                sink.error(format!("unrecognized option: {flag}"));
                ok = false;
            }
            operand => options.operands.push(operand.to_owned()),
        }
    }

    ok.then_some(options)
}

fn copy_entry(fs: &dyn FileSystem, source: &Utf8Path, target: &Utf8Path, options: &Options) -> std::io::Result<()> {
    if fs.is_symlink(source) && !options.resolve_symlinks {
        let destination = fs.read_link(source)?;
        return fs.symlink(&destination, target);
    }

    if fs.is_dir(source) {
        fs.create_dir_all(target)?;
        for name in fs.read_dir(source)? {
            if options.excludes.iter().any(|pattern| pattern.matches(&name)) {
                continue;
            }
            copy_entry(fs, &source.join(&name), &target.join(&name), options)?;
        }
        return Ok(());
    }

    let data = fs.read(source)?;
    fs.write(target, &data)?;
    let mode = fs.stat(source).map(|info| info.permissions).unwrap_or(0o644);
    fs.set_permissions(target, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TaskAction;
    use crate::action::testing::Harness;
    use crate::diagnostics::Behavior;

    #[test]
    fn test_copies_tree_with_exclusions() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Res/a.png", "a");
        harness.fs.add_file("/src/Res/.svn/entries", "x");
        harness.fs.add_file("/src/Res/sub/b.png", "b");

        let (result, _) = harness.run(TaskAction::Copy, &["builtin-copy", "-exclude", ".svn", "/src/Res", "/dst"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(harness.fs.read(Utf8Path::new("/dst/Res/sub/b.png")).unwrap(), b"b");
        assert!(!harness.fs.exists(Utf8Path::new("/dst/Res/.svn")));
    }

    #[test]
    fn test_symlinks_kept_unless_resolved() {
        let harness = Harness::new();
        harness.fs.add_file("/src/real", "r");
        harness
            .fs
            .symlink(Utf8Path::new("real"), Utf8Path::new("/src/link"))
            .unwrap();

        harness.run(TaskAction::Copy, &["builtin-copy", "/src/link", "/a"]);
        assert!(harness.fs.is_symlink(Utf8Path::new("/a/link")));

        harness.run(TaskAction::Copy, &["builtin-copy", "-resolve-src-symlinks", "/src/link", "/b"]);
        assert!(!harness.fs.is_symlink(Utf8Path::new("/b/link")));
        assert_eq!(harness.fs.read(Utf8Path::new("/b/link")).unwrap(), b"r");
    }

    #[test]
    fn test_reports_every_missing_source() {
        let harness = Harness::new();
        harness.fs.add_file("/src/ok", "ok");

        let (result, out) = harness.run(TaskAction::Copy, &["builtin-copy", "/src/one", "/src/ok", "/src/two", "/dst"]);

        assert_eq!(result, CommandResult::Failed);
        assert_eq!(
            out.messages(Behavior::Error),
            vec!["/src/one: No such file or directory", "/src/two: No such file or directory"]
        );
        assert!(harness.fs.exists(Utf8Path::new("/dst/ok")));
    }

    #[test]
    fn test_relative_paths_and_bad_flags() {
        let harness = Harness::new();
        harness.fs.add_file("/work/file", "f");
        let (result, _) = harness.run(TaskAction::Copy, &["builtin-copy", "file", "out"]);
        assert_eq!(result, CommandResult::Succeeded);
        assert!(harness.fs.exists(Utf8Path::new("/work/out/file")));

        let (result, out) = harness.run(TaskAction::Copy, &["builtin-copy", "-bogus", "-exclude"]);
        assert_eq!(result, CommandResult::Failed);
        assert_eq!(
            out.messages(Behavior::Error),
            vec!["unrecognized option: -bogus", "missing argument for option '-exclude'"]
        );
    }

    #[test]
    fn test_refuses_to_copy_into_own_subtree() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Res/a.png", "a");
        harness.fs.add_file("/src/Other/b.png", "b");

        let (result, out) = harness.run(
            TaskAction::Copy,
            &["builtin-copy", "/src/Res", "/src/Other", "/src/Res/nested"],
        );

        assert_eq!(result, CommandResult::Failed);
        assert_eq!(
            out.messages(Behavior::Error),
            vec!["cannot copy '/src/Res' into itself ('/src/Res/nested/Res')"]
        );
        assert!(!harness.fs.exists(Utf8Path::new("/src/Res/nested/Res")));
        assert_eq!(harness.fs.read(Utf8Path::new("/src/Res/nested/Other/b.png")).unwrap(), b"b");
        assert_eq!(harness.fs.read(Utf8Path::new("/src/Res/a.png")).unwrap(), b"a");
    }
}
