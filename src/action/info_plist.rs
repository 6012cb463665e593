use camino::Utf8PathBuf;
use plist::{Dictionary, Value};

use super::{ActionContext, CommandResult, arguments, finish, missing_value, resolve, write_output};
use crate::diagnostics::{DiagnosticsCollector, OutputDelegate};
use crate::propertylist::merge::{ArrayPolicy, DEVICE_CAPABILITIES_KEY, merge_dictionaries};
use crate::propertylist::{self, PlistFormat};
use crate::task::PlannedTask;

#[derive(Debug, Default)]
struct Options {
    input: Option<Utf8PathBuf>,
    output: Option<Utf8PathBuf>,
    format: Option<PlistFormat>,
    platform: Option<String>,
    deployment_target: Option<String>,
    required_architecture: Option<String>,
    additional_content: Vec<Utf8PathBuf>,
    pkginfo: Option<Utf8PathBuf>,
}

/// `builtin-infoPlistUtility INPUT -o OUTPUT [-format openstep|xml|binary]
/// [-platform NAME] [-deployment-target VERSION] [-requiredArchitecture ARCH]
/// [-additionalcontentfile PATH]... [-genpkginfo PATH]`
pub(super) fn perform(task: &PlannedTask, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
    let options = parse(task, sink);

    if options.input.is_none() {
        sink.error("no input file specified");
    }
    if options.output.is_none() {
        sink.error("no output file specified (-o)");
    }
    if sink.has_errors() {
        return CommandResult::Failed;
    }
    let (Some(input), Some(output)) = (&options.input, &options.output) else {
        return CommandResult::Failed;
    };

    let mut root = match ctx.fs.read(input).map_err(|e| e.to_string()).and_then(|bytes| {
        propertylist::read(&bytes).map_err(|e| e.to_string())
    }) {
        Ok((Value::Dictionary(root), _)) => root,
        Ok(_) => {
            sink.error(format!("{input}: the root object of an Info.plist must be a dictionary"));
            return CommandResult::Failed;
        }
        Err(e) => {
            sink.error(format!("{input}: unable to read property list: {e}"));
            return CommandResult::Failed;
        }
    };

    for path in &options.additional_content {
        match ctx.fs.read(path).map_err(|e| e.to_string()).and_then(|bytes| {
            propertylist::read(&bytes).map_err(|e| e.to_string())
        }) {
            Ok((Value::Dictionary(extra), _)) => {
                if let Err(e) = merge_dictionaries(&mut root, &extra, ArrayPolicy::Concatenate) {
                    sink.error(format!("{path}: {e}"));
                }
            }
            Ok(_) => sink.error(format!("{path}: additional content must be a dictionary")),
            Err(e) => sink.error(format!("{path}: unable to read additional content: {e}")),
        }
    }

    if let Some(deployment_target) = &options.deployment_target {
        let key = minimum_version_key(options.platform.as_deref());
        apply_minimum_version(&mut root, key, deployment_target, sink);
    }

    if let Some(arch) = &options.required_architecture {
        add_required_architecture(&mut root, arch, sink);
    }

    let format = options.format.unwrap_or(PlistFormat::Xml);
    let root = Value::Dictionary(root);
    match propertylist::write(&root, format) {
        Ok(bytes) => {
            write_output(ctx.fs, output, &bytes, sink);
        }
        Err(e) => sink.error(format!("{output}: unable to write property list as {}: {e}", format.as_str())),
    }

    if let Some(path) = &options.pkginfo {
        let contents = pkginfo(&root);
        write_output(ctx.fs, path, &contents, sink);
    }

    finish(sink)
}

fn parse(task: &PlannedTask, sink: &mut DiagnosticsCollector) -> Options {
    let mut options = Options::default();

    let mut args = arguments(task).iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str, sink: &mut DiagnosticsCollector| {
            let value = args.next().cloned();
            if value.is_none() {
                sink.error(missing_value(flag));
            }
            value
        };

        match arg.as_str() {
            "-o" => options.output = value("-o", sink).map(|p| resolve(task, &p)),
            "-format" => {
                if let Some(name) = value("-format", sink) {
                    match PlistFormat::parse(&name) {
                        Some(format) => options.format = Some(format),
                        None => sink.error(format!("unrecognized property list format '{name}'")),
                    }
                }
            }
            "-platform" => options.platform = value("-platform", sink),
            "-deployment-target" => options.deployment_target = value("-deployment-target", sink),
            "-requiredArchitecture" => options.required_architecture = value("-requiredArchitecture", sink),
            "-additionalcontentfile" => {
                if let Some(path) = value("-additionalcontentfile", sink) {
                    options.additional_content.push(resolve(task, &path));
                }
            }
            "-genpkginfo" => options.pkginfo = value("-genpkginfo", sink).map(|p| resolve(task, &p)),
            flag if flag.starts_with('-') && flag.len() > 1 => sink.error(format!("unrecognized option: {flag}")),
            input if options.input.is_none() => options.input = Some(resolve(task, input)),
            extra => sink.error(format!("unexpected argument: {extra}")),
        }
    }

    options
}

fn minimum_version_key(platform: Option<&str>) -> &'static str {
    match platform {
        Some("macosx" | "macos") => "LSMinimumSystemVersion",
        _ => "MinimumOSVersion",
    }
}

/// Dotted version with up to three numeric components.
fn parse_version(text: &str) -> Option<[u32; 3]> {
    let mut out = [0u32; 3];
    let mut parts = text.trim().split('.');

    for slot in out.iter_mut() {
        match parts.next() {
            Some(part) => *slot = part.parse().ok()?,
            None => break,
        }
    }

    if parts.next().is_some() || text.trim().is_empty() {
        return None;
    }

    Some(out)
}

/// Brings the declared minimum version in line with the deployment target.
///
/// Below the target is raised with a warning, empty is filled with a
/// different warning, unparsable is an error and the key is dropped.
fn apply_minimum_version(root: &mut Dictionary, key: &str, deployment_target: &str, sink: &mut DiagnosticsCollector) {
    let Some(target) = parse_version(deployment_target) else {
        sink.error(format!("invalid deployment target '{deployment_target}'"));
        return;
    };

    let declared = match root.get(key) {
        None => {
            root.insert(key.to_owned(), Value::String(deployment_target.to_owned()));
            return;
        }
        Some(Value::String(declared)) => declared.clone(),
        Some(other) => {
            sink.error(format!(
                "{key} must be a string, found {}",
                propertylist::type_name(other)
            ));
            root.remove(key);
            return;
        }
    };

    if declared.trim().is_empty() {
        sink.warning(format!(
            "{key} is empty; setting it to the deployment target '{deployment_target}'"
        ));
        root.insert(key.to_owned(), Value::String(deployment_target.to_owned()));
        return;
    }

    match parse_version(&declared) {
        None => {
            sink.error(format!("{key} has an invalid value '{declared}'"));
            root.remove(key);
        }
        Some(version) if version < target => {
            sink.warning(format!(
                "{key} of '{declared}' is less than the deployment target '{deployment_target}'; setting it to '{deployment_target}'"
            ));
            root.insert(key.to_owned(), Value::String(deployment_target.to_owned()));
        }
        Some(_) => {}
    }
}

fn add_required_architecture(root: &mut Dictionary, arch: &str, sink: &mut DiagnosticsCollector) {
    match root.get_mut(DEVICE_CAPABILITIES_KEY) {
        None => {
            root.insert(
                DEVICE_CAPABILITIES_KEY.to_owned(),
                Value::Array(vec![Value::String(arch.to_owned())]),
            );
        }
        Some(Value::Array(items)) => {
            let item = Value::String(arch.to_owned());
            if !items.contains(&item) {
                items.push(item);
            }
        }
        Some(Value::Dictionary(flags)) => {
            flags.insert(arch.to_owned(), Value::Boolean(true));
        }
        Some(other) => sink.error(format!(
            "{DEVICE_CAPABILITIES_KEY} must be an array or dictionary, found {}",
            propertylist::type_name(other)
        )),
    }
}

/// Eight bytes: the package type then the signature, each padded or cut to
/// four characters.
fn pkginfo(root: &Value) -> Vec<u8> {
    let field = |key: &str, default: &str| {
        let text = root
            .as_dictionary()
            .and_then(|dict| dict.get(key))
            .and_then(Value::as_string)
            .unwrap_or(default);
        let mut bytes: Vec<u8> = text.bytes().take(4).collect();
        bytes.resize(4, b'?');
        bytes
    };

    let mut out = field("CFBundlePackageType", "APPL");
    out.extend(field("CFBundleSignature", "????"));
    out
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::action::TaskAction;
    use crate::action::testing::Harness;
    use crate::diagnostics::Behavior;
    use crate::fs::FileSystem;

    fn info(declared: Option<&str>) -> String {
        match declared {
            Some(value) => format!("{{ CFBundleName = App; MinimumOSVersion = \"{value}\"; }}"),
            None => "{ CFBundleName = App; }".to_string(),
        }
    }

    fn run_with(harness: &Harness, extra: &[&str]) -> (CommandResult, DiagnosticsCollector, Dictionary) {
        let mut argv = vec!["builtin-infoPlistUtility", "/src/Info.plist", "-o", "/out/Info.plist"];
        argv.extend_from_slice(extra);
        let (result, out) = harness.run(TaskAction::InfoPlistProcessor, &argv);

        let dict = harness
            .fs
            .read(Utf8Path::new("/out/Info.plist"))
            .ok()
            .and_then(|bytes| propertylist::read(&bytes).ok())
            .and_then(|(value, _)| value.into_dictionary())
            .unwrap_or_default();

        (result, out, dict)
    }

    fn minimum(declared: Option<&str>) -> (CommandResult, DiagnosticsCollector, Dictionary) {
        let harness = Harness::new();
        harness.fs.add_file("/src/Info.plist", info(declared));
        run_with(&harness, &["-platform", "iphoneos", "-deployment-target", "11.0"])
    }

    #[test]
    fn test_minimum_version_raised() {
        let (result, out, dict) = minimum(Some("10.15"));
        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(dict.get("MinimumOSVersion").and_then(Value::as_string), Some("11.0"));
        assert_eq!(
            out.messages(Behavior::Warning),
            vec!["MinimumOSVersion of '10.15' is less than the deployment target '11.0'; setting it to '11.0'"]
        );
    }

    #[test]
    fn test_minimum_version_empty() {
        let (result, out, dict) = minimum(Some(""));
        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(dict.get("MinimumOSVersion").and_then(Value::as_string), Some("11.0"));
        assert_eq!(
            out.messages(Behavior::Warning),
            vec!["MinimumOSVersion is empty; setting it to the deployment target '11.0'"]
        );
    }

    #[test]
    fn test_minimum_version_unparsable() {
        let (result, out, dict) = minimum(Some("nuts"));
        assert_eq!(result, CommandResult::Failed);
        assert!(dict.get("MinimumOSVersion").is_none());
        assert_eq!(out.messages(Behavior::Error), vec!["MinimumOSVersion has an invalid value 'nuts'"]);
        assert!(out.messages(Behavior::Warning).is_empty());
    }

    #[test]
    fn test_minimum_version_absent_or_higher() {
        let (_, out, dict) = minimum(None);
        assert_eq!(dict.get("MinimumOSVersion").and_then(Value::as_string), Some("11.0"));
        assert!(out.diagnostics.is_empty());

        let (_, out, dict) = minimum(Some("12.1"));
        assert_eq!(dict.get("MinimumOSVersion").and_then(Value::as_string), Some("12.1"));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_macos_uses_system_version_key() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Info.plist", "{ CFBundleName = App; }");
        let (_, _, dict) = run_with(&harness, &["-platform", "macosx", "-deployment-target", "13.0"]);
        assert_eq!(dict.get("LSMinimumSystemVersion").and_then(Value::as_string), Some("13.0"));
    }

    #[test]
    fn test_additional_content_and_architecture() {
        let harness = Harness::new();
        harness.fs.add_file(
            "/src/Info.plist",
            "{ UIRequiredDeviceCapabilities = (metal); CFBundleName = App; }",
        );
        harness.fs.add_file(
            "/src/Extra.plist",
            "{ UIRequiredDeviceCapabilities = { gps = true; }; NSExtra = (a); }",
        );

        let (result, out, dict) = run_with(
            &harness,
            &["-additionalcontentfile", "/src/Extra.plist", "-requiredArchitecture", "arm64", "-format", "xml"],
        );

        assert_eq!(result, CommandResult::Succeeded, "{:?}", out.diagnostics);
        let caps = dict.get(DEVICE_CAPABILITIES_KEY).and_then(Value::as_dictionary).unwrap();
        assert_eq!(caps.get("metal"), Some(&Value::Boolean(true)));
        assert_eq!(caps.get("arm64"), Some(&Value::Boolean(true)));
        assert!(dict.contains_key("NSExtra"));
    }

    #[test]
    fn test_pkginfo_and_format() {
        let harness = Harness::new();
        harness.fs.add_file("/src/Info.plist", "{ CFBundlePackageType = FMWK; }");

        let (result, _, _) = run_with(&harness, &["-format", "binary", "-genpkginfo", "/out/PkgInfo"]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(harness.fs.read(Utf8Path::new("/out/PkgInfo")).unwrap(), b"FMWK????");
        let written = harness.fs.read(Utf8Path::new("/out/Info.plist")).unwrap();
        assert!(written.starts_with(b"bplist00"));
    }

    #[test]
    fn test_usage_errors() {
        let harness = Harness::new();
        let (result, out) = harness.run(TaskAction::InfoPlistProcessor, &["builtin-infoPlistUtility", "-format"]);
        assert_eq!(result, CommandResult::Failed);
        assert_eq!(
            out.messages(Behavior::Error),
            vec![
                "missing argument for option '-format'",
                "no input file specified",
                "no output file specified (-o)"
            ]
        );
    }
}
