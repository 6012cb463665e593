//! Small file system actions driven entirely by their command line.

use camino::Utf8Path;

use super::{ActionContext, CommandResult, arguments, finish, resolve, write_output};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::task::PlannedTask;

/// `builtin-symlink CONTENTS LINK`
///
/// `CONTENTS` is stored verbatim. An existing entry at `LINK` is replaced.
pub(super) fn symlink(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let [contents, link] = arguments(task) else {
        sink.error("usage: builtin-symlink <contents> <link>");
        return CommandResult::Failed;
    };
    let link = resolve(task, link);

    if (ctx.fs.exists(&link) || ctx.fs.is_symlink(&link))
        && let Err(e) = ctx.fs.remove(&link)
    {
        sink.error(format!("unable to remove '{link}': {e}"));
        return CommandResult::Failed;
    }

    if let Some(parent) = link.parent()
        && let Err(e) = ctx.fs.create_dir_all(parent)
    {
        sink.error(format!("unable to create directory '{parent}': {e}"));
        return CommandResult::Failed;
    }

    if let Err(e) = ctx.fs.symlink(Utf8Path::new(contents), &link) {
        sink.error(format!("unable to create symlink '{link}': {e}"));
    }

    finish(sink)
}

/// `builtin-concatenate OUTPUT INPUT...`
pub(super) fn concatenate(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let Some((output, inputs)) = arguments(task).split_first() else {
        sink.error("usage: builtin-concatenate <output> <inputs>...");
        return CommandResult::Failed;
    };

    let mut contents = Vec::new();
    for input in inputs {
        let input = resolve(task, input);
        match ctx.fs.read(&input) {
            Ok(bytes) => contents.extend(bytes),
            Err(e) => sink.error(format!("{input}: unable to read file: {e}")),
        }
    }

    if sink.has_errors() {
        return CommandResult::Failed;
    }

    write_output(ctx.fs, &resolve(task, output), &contents, sink);
    finish(sink)
}

/// `builtin-create-build-directory DIR...`
pub(super) fn create_build_directory(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let dirs = arguments(task);
    if dirs.is_empty() {
        sink.error("no directories specified");
    }

    for dir in dirs {
        let dir = resolve(task, dir);
        if let Err(e) = ctx.fs.create_dir_all(&dir) {
            sink.error(format!("unable to create directory '{dir}': {e}"));
        }
    }

    finish(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TaskAction;
    use crate::action::testing::Harness;
    use crate::diagnostics::Behavior;
    use crate::fs::FileSystem;

    #[test]
    fn test_symlink_replaces_existing() {
        let harness = Harness::new();
        harness.fs.add_file("/build/Current", "old");

        let (result, _) = harness.run(TaskAction::Symlink, &["builtin-symlink", "A", "/build/Current"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert!(harness.fs.is_symlink(Utf8Path::new("/build/Current")));
        assert_eq!(harness.fs.read_link(Utf8Path::new("/build/Current")).unwrap(), "A");
    }

    #[test]
    fn test_concatenate() {
        let harness = Harness::new();
        harness.fs.add_file("/work/a", "one\n");
        harness.fs.add_file("/work/b", "two\n");

        let (result, _) = harness.run(TaskAction::Concatenate, &["builtin-concatenate", "out/all", "a", "b"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(harness.fs.read(Utf8Path::new("/work/out/all")).unwrap(), b"one\ntwo\n");

        let (result, out) = harness.run(TaskAction::Concatenate, &["builtin-concatenate", "out/all", "missing"]);
        assert_eq!(result, CommandResult::Failed);
        assert_eq!(out.count(Behavior::Error), 1);
    }

    #[test]
    fn test_create_build_directory() {
        let harness = Harness::new();
        let (result, _) = harness.run(
            TaskAction::CreateBuildDirectory,
            &["builtin-create-build-directory", "/build/Products", "obj"],
        );

        assert_eq!(result, CommandResult::Succeeded);
        assert!(harness.fs.is_dir(Utf8Path::new("/build/Products")));
        assert!(harness.fs.is_dir(Utf8Path::new("/work/obj")));
    }
}
