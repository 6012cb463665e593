use camino::{Utf8Path, Utf8PathBuf};
use plist::{Dictionary, Value};

use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::fs::copy_tree;
use crate::propertylist;
use crate::task::PlannedTask;

/// One entry of an XCFramework's `AvailableLibraries`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Library {
    identifier: String,
    path: String,
    platform: String,
    variant: Option<String>,
}

impl Library {
    fn from_dictionary(dict: &Dictionary) -> Option<Self> {
        let string = |key: &str| dict.get(key).and_then(Value::as_string).map(str::to_owned);
        Some(Self {
            identifier: string("LibraryIdentifier")?,
            path: string("LibraryPath")?,
            platform: string("SupportedPlatform")?,
            variant: string("SupportedPlatformVariant"),
        })
    }

    fn matches(&self, platform: &str, environment: Option<&str>) -> bool {
        self.platform == platform && self.variant.as_deref() == environment
    }
}

/// `builtin-process-xcframework --xcframework PATH --platform NAME
/// [--environment NAME] --target-path DIR`
///
/// Copies the library slice matching the platform and environment into the
/// target directory.
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let mut xcframework: Option<Utf8PathBuf> = None;
    let mut platform: Option<String> = None;
    let mut environment: Option<String> = None;
    let mut target_path: Option<Utf8PathBuf> = None;

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        let flag = arg.as_str();
        if !matches!(flag, "--xcframework" | "--platform" | "--environment" | "--target-path") {
            sink.error(format!("unrecognized argument: {flag}"));
            continue;
        }

        let Some(value) = args.next() else {
            sink.error(missing_value(flag));
            continue;
        };

        match flag {
            "--xcframework" => xcframework = Some(resolve(task, value)),
            "--platform" => platform = Some(value.clone()),
            "--environment" => environment = Some(value.clone()),
            _ => target_path = Some(resolve(task, value)),
        }
    }

    for (missing, flag) in [
        (xcframework.is_none(), "--xcframework"),
        (platform.is_none(), "--platform"),
        (target_path.is_none(), "--target-path"),
    ] {
        if missing {
            sink.error(format!("{flag} is required"));
        }
    }

    let (Some(xcframework), Some(platform), Some(target_path)) = (xcframework, platform, target_path) else {
        return CommandResult::Failed;
    };
    if sink.has_errors() {
        return CommandResult::Failed;
    }

    let libraries = match read_libraries(ctx, &xcframework) {
        Ok(libraries) => libraries,
        Err(message) => {
            sink.error(message);
            return CommandResult::Failed;
        }
    };

    let Some(library) = libraries.iter().find(|lib| lib.matches(&platform, environment.as_deref())) else {
        sink.error(format!(
            "While building for {platform}, no library for this platform was found in '{xcframework}'."
        ));
        return CommandResult::Failed;
    };

    let source = xcframework.join(&library.identifier).join(&library.path);
    let Some(name) = Utf8Path::new(&library.path).file_name() else {
        sink.error(format!("invalid library path '{}' in '{xcframework}'", library.path));
        return CommandResult::Failed;
    };
    let destination = target_path.join(name);

    if !ctx.fs.exists(&source) {
        sink.error(format!("{source}: No such file or directory"));
        return CommandResult::Failed;
    }

    if let Err(e) = ctx.fs.create_dir_all(&target_path) {
        sink.error(format!("unable to create directory '{target_path}': {e}"));
        return CommandResult::Failed;
    }

    if (ctx.fs.exists(&destination) || ctx.fs.is_symlink(&destination))
        && let Err(e) = ctx.fs.remove(&destination)
    {
        sink.error(format!("unable to remove '{destination}': {e}"));
        return CommandResult::Failed;
    }

    if let Err(e) = copy_tree(ctx.fs, &source, &destination) {
        sink.error(format!("unable to copy '{source}' to '{destination}': {e}"));
    }

    finish(sink)
}

fn read_libraries(ctx: &ActionContext, xcframework: &Utf8Path) -> Result<Vec<Library>, String> {
    let info_path = xcframework.join("Info.plist");
    let bytes = ctx
        .fs
        .read(&info_path)
        .map_err(|e| format!("{info_path}: unable to read file: {e}"))?;
    let (value, _) = propertylist::read(&bytes).map_err(|e| format!("{info_path}: {e}"))?;

    let entries = value
        .as_dictionary()
        .and_then(|dict| dict.get("AvailableLibraries"))
        .and_then(Value::as_array)
        .ok_or_else(|| format!("{info_path}: missing AvailableLibraries"))?;

    Ok(entries
        .iter()
        .filter_map(Value::as_dictionary)
        .filter_map(Library::from_dictionary)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TaskAction;
    use crate::action::testing::Harness;
    use crate::diagnostics::Behavior;
    use crate::fs::FileSystem;

    const INFO: &str = r#"{
        AvailableLibraries = (
            { LibraryIdentifier = "ios-arm64"; LibraryPath = "Kit.framework"; SupportedPlatform = ios; },
            {
                LibraryIdentifier = "ios-arm64-simulator";
                LibraryPath = "Kit.framework";
                SupportedPlatform = ios;
                SupportedPlatformVariant = simulator;
            },
        );
    }"#;

    fn harness() -> Harness {
        let harness = Harness::new();
        harness.fs.add_file("/deps/Kit.xcframework/Info.plist", INFO);
        harness.fs.add_file("/deps/Kit.xcframework/ios-arm64/Kit.framework/Kit", "device");
        harness.fs.add_file("/deps/Kit.xcframework/ios-arm64-simulator/Kit.framework/Kit", "sim");
        harness
    }

    fn run(harness: &Harness, extra: &[&str]) -> (CommandResult, DiagnosticsCollector) {
        let mut argv = vec![
            "builtin-process-xcframework",
            "--xcframework",
            "/deps/Kit.xcframework",
            "--target-path",
            "/build/Products",
        ];
        argv.extend_from_slice(extra);
        harness.run(TaskAction::ProcessXcFramework, &argv)
    }

    #[test]
    fn test_picks_matching_variant() {
        let harness = harness();
        harness.fs.add_file("/build/Products/Kit.framework/Stale", "old");

        let (result, out) = run(&harness, &["--platform", "ios", "--environment", "simulator"]);

        assert_eq!(result, CommandResult::Succeeded, "{:?}", out.diagnostics);
        assert_eq!(harness.fs.read(Utf8Path::new("/build/Products/Kit.framework/Kit")).unwrap(), b"sim");
        assert!(!harness.fs.exists(Utf8Path::new("/build/Products/Kit.framework/Stale")));

        let (_, _) = run(&harness, &["--platform", "ios"]);
        assert_eq!(harness.fs.read(Utf8Path::new("/build/Products/Kit.framework/Kit")).unwrap(), b"device");
    }

    #[test]
    fn test_no_matching_library() {
        let harness = harness();
        let (result, out) = run(&harness, &["--platform", "macos"]);

        assert_eq!(result, CommandResult::Failed);
        assert_eq!(
            out.messages(Behavior::Error),
            vec!["While building for macos, no library for this platform was found in '/deps/Kit.xcframework'."]
        );
    }

    #[test]
    fn test_required_flags() {
        let harness = Harness::new();
        let (result, out) = harness.run(TaskAction::ProcessXcFramework, &["builtin-process-xcframework", "--platform"]);
        assert_eq!(result, CommandResult::Failed);
        assert_eq!(
            out.messages(Behavior::Error),
            vec![
                "missing argument for option '--platform'",
                "--xcframework is required",
                "--platform is required",
                "--target-path is required"
            ]
        );
    }
}
