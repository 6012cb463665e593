use camino::{Utf8Path, Utf8PathBuf};

use super::{TaskGenerationDelegate, ToolSpec, malformed, task_for};
use crate::action::TaskAction;
use crate::context::CommandBuildContext;
use crate::node::Node;
use crate::settings::SettingsScope;
use crate::task::DependencyData;

/// Names `builtin-copy` never copies out of a resource directory.
const COPY_EXCLUSIONS: &[&str] = &[".DS_Store", "CVS", ".svn", ".git", ".hg"];

fn setting_or<'a>(scope: &'a dyn SettingsScope, name: &str, default: &'a str) -> &'a str {
    scope.lookup(name).filter(|value| !value.is_empty()).unwrap_or(default)
}

fn parent_of(path: &Utf8Path) -> Utf8PathBuf {
    path.parent().map(Utf8Path::to_owned).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileSpec;

impl ToolSpec for CompileSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.compilers.clang"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let (Some(input), Some(output)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "a source file and an object file");
        };

        let depfile = output.with_extension("d");
        let mut args = vec![
            setting_or(cbc.scope, "CC", "clang").to_owned(),
            "-c".into(),
            input.path.to_string(),
            "-o".into(),
            output.to_string(),
            "-MMD".into(),
            "-MF".into(),
            depfile.to_string(),
        ];
        for expression in cbc.scope.list("HEADER_SEARCH_PATHS") {
            args.extend(delegate.search_paths(&expression).into_iter().map(|dir| format!("-I{dir}")));
        }
        args.extend(cbc.scope.list("OTHER_CFLAGS"));

        let name = input.path.file_name().unwrap_or(input.path.as_str());
        delegate.add_task(
            task_for(cbc, "CompileC", ["CompileC", output.as_str(), input.path.as_str()])
                .command_line(args)
                .output(Node::path(output))
                .dependency_data(DependencyData::Makefile(depfile))
                .description(format!("Compile {name}")),
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkSpec;

impl ToolSpec for LinkSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.pbx.linkers.ld"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let Some(output) = cbc.first_output() else {
            return malformed(self, delegate, "an output path");
        };

        let product = setting_or(cbc.scope, "PRODUCT_NAME", output.file_name().unwrap_or("a.out"));
        let list_dir = cbc.scope.path("OBJECT_FILE_DIR").unwrap_or_else(|| parent_of(output));
        let list_path = list_dir.join(format!("{product}.LinkFileList"));

        let mut contents = String::new();
        for input in &cbc.inputs {
            contents.push_str(input.path.as_str());
            contents.push('\n');
        }
        let list = delegate.create_aux_file(&list_path, contents.into_bytes(), false);

        let mut args = vec![
            setting_or(cbc.scope, "LD", "clang").to_owned(),
            "-filelist".into(),
            list_path.to_string(),
            "-o".into(),
            output.to_string(),
        ];
        args.extend(cbc.scope.list("OTHER_LDFLAGS"));

        delegate.add_task(
            task_for(cbc, "Ld", ["Ld", output.as_str()])
                .input(list)
                .command_line(args)
                .output(Node::path(output))
                .description(format!("Link {product}")),
        );
    }
}

/// One `builtin-create-build-directory` task per output directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirSpec;

impl ToolSpec for MkdirSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.tools.mkdir"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        if cbc.outputs.is_empty() {
            return malformed(self, delegate, "at least one directory");
        }

        for dir in &cbc.outputs {
            delegate.add_task(
                task_for(cbc, "CreateBuildDirectory", ["CreateBuildDirectory", dir.as_str()])
                    .command_line(["builtin-create-build-directory", dir.as_str()])
                    .action(TaskAction::CreateBuildDirectory)
                    .output(Node::path(dir)),
            );
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopySpec;

impl ToolSpec for CopySpec {
    fn identifier(&self) -> &'static str {
        "com.apple.compilers.pbxcp"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let (Some(input), Some(output)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "a source and a destination");
        };

        let mut args = vec!["builtin-copy".to_owned()];
        for name in COPY_EXCLUSIONS {
            args.push("-exclude".into());
            args.push((*name).into());
        }
        args.push(input.path.to_string());
        args.push(parent_of(output).into_string());

        delegate.add_task(
            task_for(cbc, "Copy", ["Copy", output.as_str(), input.path.as_str()])
                .command_line(args)
                .action(TaskAction::Copy)
                .output(Node::path(output)),
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyPlistSpec;

impl ToolSpec for CopyPlistSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.build-tools.copy-plist-file"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let (Some(input), Some(output)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "a property list and a destination");
        };

        let format = setting_or(cbc.scope, "PLIST_FILE_OUTPUT_FORMAT", "same-as-input");
        let outdir = parent_of(output);
        delegate.add_task(
            task_for(cbc, "CopyPlistFile", ["CopyPlistFile", output.as_str(), input.path.as_str()])
                .command_line([
                    "builtin-copyPlist",
                    "--convert",
                    format,
                    "--outdir",
                    outdir.as_str(),
                    input.path.as_str(),
                ])
                .action(TaskAction::CopyPlist)
                .output(Node::path(output)),
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyStringsSpec;

impl ToolSpec for CopyStringsSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.build-tools.copy-strings-file"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let (Some(input), Some(output)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "a strings file and a destination");
        };

        let encoding = setting_or(cbc.scope, "STRINGS_FILE_OUTPUT_ENCODING", "utf-16");
        let outdir = parent_of(output);
        let mut args = vec![
            "builtin-copyStrings".to_owned(),
            "--outputencoding".into(),
            encoding.into(),
            "--outdir".into(),
            outdir.to_string(),
        ];
        if output.file_name() != input.path.file_name()
            && let Some(name) = output.file_name()
        {
            args.push("--outfilename".into());
            args.push(name.into());
        }
        args.push(input.path.to_string());

        delegate.add_task(
            task_for(cbc, "CopyStringsFile", ["CopyStringsFile", output.as_str(), input.path.as_str()])
                .command_line(args)
                .action(TaskAction::CopyStrings)
                .output(Node::path(output)),
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTiffSpec;

impl ToolSpec for CopyTiffSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.build-tools.copy-tiff"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let (Some(input), Some(output)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "an image and a destination");
        };

        let compression = setting_or(cbc.scope, "TIFF_COMPRESSION", "none");
        let outdir = parent_of(output);
        delegate.add_task(
            task_for(cbc, "CopyTiffFile", ["CopyTiffFile", output.as_str(), input.path.as_str()])
                .command_line([
                    "builtin-copyTiff",
                    "--compression",
                    compression,
                    "--outdir",
                    outdir.as_str(),
                    input.path.as_str(),
                ])
                .action(TaskAction::CopyTiff)
                .output(Node::path(output)),
        );
    }
}

/// Processes the target's Info.plist.
///
/// Needs the platform and an optional PkgInfo destination in addition to the
/// usual context, so callers go through [`InfoPlistSpec::construct_info_plist_tasks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoPlistSpec;

impl InfoPlistSpec {
    pub fn construct_info_plist_tasks(
        &self,
        cbc: &CommandBuildContext,
        delegate: &mut dyn TaskGenerationDelegate,
        platform: &str,
        pkginfo: Option<&Utf8Path>,
    ) {
        let (Some(input), Some(output)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "an Info.plist and a destination");
        };

        let mut args = vec![
            "builtin-infoPlistUtility".to_owned(),
            input.path.to_string(),
            "-o".into(),
            output.to_string(),
            "-platform".into(),
            platform.into(),
        ];
        if let Some(format) = cbc.scope.lookup("INFOPLIST_OUTPUT_FORMAT").filter(|f| !f.is_empty()) {
            args.push("-format".into());
            args.push(format.into());
        }
        if let Some(target) = cbc.scope.lookup(deployment_target_setting(platform)).filter(|t| !t.is_empty()) {
            args.push("-deployment-target".into());
            args.push(target.into());
        }
        if let [arch] = cbc.scope.list("ARCHS").as_slice() {
            args.push("-requiredArchitecture".into());
            args.push(arch.clone());
        }

        let extra = cbc.scope.list("INFOPLIST_ADDITIONAL_CONTENT_FILES");
        for path in &extra {
            args.push("-additionalcontentfile".into());
            args.push(path.clone());
        }

        let mut outputs = vec![Node::path(output)];
        if let Some(pkginfo) = pkginfo {
            args.push("-genpkginfo".into());
            args.push(pkginfo.to_string());
            outputs.push(Node::path(pkginfo));
        }

        delegate.add_task(
            task_for(cbc, "ProcessInfoPlistFile", ["ProcessInfoPlistFile", output.as_str(), input.path.as_str()])
                .inputs(extra.iter().map(Node::path))
                .command_line(args)
                .action(TaskAction::InfoPlistProcessor)
                .outputs(outputs),
        );
    }
}

impl ToolSpec for InfoPlistSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.tools.info-plist-utility"
    }

    fn construct_tasks(&self, _: &CommandBuildContext, _: &mut dyn TaskGenerationDelegate) {
        panic!("InfoPlistSpec must be invoked through construct_info_plist_tasks");
    }
}

fn deployment_target_setting(platform: &str) -> &'static str {
    match platform {
        "macosx" | "macos" => "MACOSX_DEPLOYMENT_TARGET",
        p if p.starts_with("iphone") => "IPHONEOS_DEPLOYMENT_TARGET",
        p if p.starts_with("appletv") => "TVOS_DEPLOYMENT_TARGET",
        p if p.starts_with("watch") => "WATCHOS_DEPLOYMENT_TARGET",
        _ => "DEPLOYMENT_TARGET",
    }
}

/// Signs the first input in place. The output is a virtual node, the signed
/// file is already somebody else's output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeSignSpec;

impl ToolSpec for CodeSignSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.build-tools.codesign"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let Some(input) = cbc.first_input() else {
            return malformed(self, delegate, "a product to sign");
        };

        let identity = setting_or(cbc.scope, "CODE_SIGN_IDENTITY", "-");
        let path = input.path.as_str();
        delegate.add_task(
            task_for(cbc, "CodeSign", ["CodeSign", path])
                .command_line(["codesign", "--force", "--sign", identity, path])
                .action(TaskAction::CodeSign)
                .output(Node::virtual_node(format!("CodeSign {path}"))),
        );
    }
}

/// `input` is what the link points to, `output` the link itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkSpec;

impl ToolSpec for SymlinkSpec {
    fn identifier(&self) -> &'static str {
        "com.apple.tools.symlink"
    }

    fn construct_tasks(&self, cbc: &CommandBuildContext, delegate: &mut dyn TaskGenerationDelegate) {
        let (Some(contents), Some(link)) = (cbc.first_input(), cbc.first_output()) else {
            return malformed(self, delegate, "link contents and a link path");
        };

        let contents = contents.path.as_str();
        delegate.add_task(
            task_for(cbc, "SymLink", ["SymLink", link.as_str(), contents])
                .command_line(["builtin-symlink", contents, link.as_str()])
                .action(TaskAction::Symlink)
                .output(Node::path(link)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostic;
    use crate::settings::Settings;
    use crate::task::{PlannedTask, TaskBuilder};

    #[derive(Default)]
    struct Recorder {
        tasks: Vec<PlannedTask>,
        aux: Vec<(Utf8PathBuf, Vec<u8>)>,
        diagnostics: Vec<Diagnostic>,
    }

    impl TaskGenerationDelegate for Recorder {
        fn add_task(&mut self, task: TaskBuilder) {
            self.tasks.push(task.build());
        }

        fn create_aux_file(&mut self, path: &Utf8Path, contents: Vec<u8>, _: bool) -> Node {
            self.aux.push((path.to_owned(), contents));
            Node::path(path)
        }

        fn search_paths(&mut self, expression: &str) -> Vec<Utf8PathBuf> {
            match expression.strip_suffix("/**") {
                Some(root) => vec![Utf8PathBuf::from(root), Utf8PathBuf::from(root).join("sub")],
                None => vec![Utf8PathBuf::from(expression)],
            }
        }

        fn emit(&mut self, diagnostic: Diagnostic) {
            self.diagnostics.push(diagnostic);
        }
    }

    #[test]
    fn test_compile_expands_header_search_paths() {
        let settings = Settings::new()
            .set("HEADER_SEARCH_PATHS", "/inc /deps/**")
            .set("OTHER_CFLAGS", "-O2");
        let cbc = CommandBuildContext::new(Some("Foo"), &settings, "/w")
            .input("/w/main.c")
            .output("/b/main.o")
            .ordered_after([Node::virtual_node("target-Foo-begin")]);

        let mut recorder = Recorder::default();
        CompileSpec.construct_tasks(&cbc, &mut recorder);

        let task = &recorder.tasks[0];
        assert_eq!(task.rule_info, vec!["CompileC", "/b/main.o", "/w/main.c"]);
        assert_eq!(
            task.command_line,
            vec![
                "clang", "-c", "/w/main.c", "-o", "/b/main.o", "-MMD", "-MF", "/b/main.d", "-I/inc", "-I/deps",
                "-I/deps/sub", "-O2"
            ]
        );
        assert_eq!(task.inputs, vec![Node::path("/w/main.c"), Node::virtual_node("target-Foo-begin")]);
        assert_eq!(task.dependency_data, Some(DependencyData::Makefile("/b/main.d".into())));
        assert_eq!(task.target.as_deref(), Some("Foo"));
    }

    #[test]
    fn test_link_writes_file_list() {
        let settings = Settings::new()
            .set("PRODUCT_NAME", "Foo")
            .set("OBJECT_FILE_DIR", "/b/Objects");
        let cbc = CommandBuildContext::new(Some("Foo"), &settings, "/w")
            .inputs(["/b/Objects/a.o", "/b/Objects/b.o"])
            .output("/b/Products/Foo");

        let mut recorder = Recorder::default();
        LinkSpec.construct_tasks(&cbc, &mut recorder);

        assert_eq!(recorder.aux, vec![(
            Utf8PathBuf::from("/b/Objects/Foo.LinkFileList"),
            b"/b/Objects/a.o\n/b/Objects/b.o\n".to_vec()
        )]);
        let task = &recorder.tasks[0];
        assert_eq!(task.command_line[..3], ["clang", "-filelist", "/b/Objects/Foo.LinkFileList"]);
        assert!(task.inputs.contains(&Node::path("/b/Objects/Foo.LinkFileList")));
        assert_eq!(task.outputs, vec![Node::path("/b/Products/Foo")]);
    }

    #[test]
    fn test_copy_specs_pick_settings() {
        let settings = Settings::new()
            .set("PLIST_FILE_OUTPUT_FORMAT", "binary")
            .set("STRINGS_FILE_OUTPUT_ENCODING", "utf-8");
        let plist = CommandBuildContext::new(None, &settings, "/w")
            .input("/w/Settings.plist")
            .output("/b/Res/Settings.plist");
        let strings = CommandBuildContext::new(None, &settings, "/w")
            .input("/w/en.lproj/Localizable.strings")
            .output("/b/Res/en.lproj/Localizable.strings");
        let tiff = CommandBuildContext::new(None, &settings, "/w")
            .input("/w/a.tiff")
            .output("/b/Res/a.tiff");

        let mut recorder = Recorder::default();
        CopyPlistSpec.construct_tasks(&plist, &mut recorder);
        CopyStringsSpec.construct_tasks(&strings, &mut recorder);
        CopyTiffSpec.construct_tasks(&tiff, &mut recorder);

        assert_eq!(recorder.tasks[0].command_line[1..3], ["--convert", "binary"]);
        assert_eq!(recorder.tasks[0].action, Some(TaskAction::CopyPlist));
        assert_eq!(recorder.tasks[1].command_line[1..5], ["--outputencoding", "utf-8", "--outdir", "/b/Res/en.lproj"]);
        assert_eq!(recorder.tasks[2].command_line[1..3], ["--compression", "none"]);
        assert!(recorder.diagnostics.is_empty());
    }

    #[test]
    fn test_copy_excludes_scm_directories() {
        let settings = Settings::new();
        let cbc = CommandBuildContext::new(Some("App"), &settings, "/w")
            .input("/w/Assets")
            .output("/b/Res/Assets");

        let mut recorder = Recorder::default();
        CopySpec.construct_tasks(&cbc, &mut recorder);

        let args = &recorder.tasks[0].command_line;
        assert_eq!(args.iter().filter(|a| *a == "-exclude").count(), COPY_EXCLUSIONS.len());
        assert_eq!(args[args.len() - 2..], ["/w/Assets", "/b/Res"]);
    }

    #[test]
    fn test_info_plist_arguments() {
        let settings = Settings::new()
            .set("IPHONEOS_DEPLOYMENT_TARGET", "15.0")
            .set("ARCHS", "arm64");
        let cbc = CommandBuildContext::new(Some("App"), &settings, "/w")
            .input("/w/Info.plist")
            .output("/b/App.app/Info.plist");

        let mut recorder = Recorder::default();
        InfoPlistSpec.construct_info_plist_tasks(&cbc, &mut recorder, "iphoneos", Some(Utf8Path::new("/b/App.app/PkgInfo")));

        let task = &recorder.tasks[0];
        let args: Vec<&str> = task.command_line.iter().map(String::as_str).collect();
        assert_eq!(
            args,
            vec![
                "builtin-infoPlistUtility",
                "/w/Info.plist",
                "-o",
                "/b/App.app/Info.plist",
                "-platform",
                "iphoneos",
                "-deployment-target",
                "15.0",
                "-requiredArchitecture",
                "arm64",
                "-genpkginfo",
                "/b/App.app/PkgInfo",
            ]
        );
        assert_eq!(task.outputs.len(), 2);
    }

    #[test]
    #[should_panic(expected = "construct_info_plist_tasks")]
    fn test_info_plist_generic_entry_is_a_hard_stop() {
        let settings = Settings::new();
        let cbc = CommandBuildContext::new(None, &settings, "/w");
        InfoPlistSpec.construct_tasks(&cbc, &mut Recorder::default());
    }

    #[test]
    fn test_codesign_and_symlink() {
        let settings = Settings::new();
        let sign = CommandBuildContext::new(Some("App"), &settings, "/w").input("/b/App");
        let link = CommandBuildContext::new(Some("App"), &settings, "/w")
            .input("/b/App")
            .output("/b/current");

        let mut recorder = Recorder::default();
        CodeSignSpec.construct_tasks(&sign, &mut recorder);
        SymlinkSpec.construct_tasks(&link, &mut recorder);

        assert_eq!(recorder.tasks[0].command_line, vec!["codesign", "--force", "--sign", "-", "/b/App"]);
        assert_eq!(recorder.tasks[0].outputs, vec![Node::virtual_node("CodeSign /b/App")]);
        assert_eq!(recorder.tasks[1].command_line, vec!["builtin-symlink", "/b/App", "/b/current"]);
    }

    #[test]
    fn test_missing_context_is_reported() {
        let settings = Settings::new();
        let cbc = CommandBuildContext::new(None, &settings, "/w");

        let mut recorder = Recorder::default();
        CompileSpec.construct_tasks(&cbc, &mut recorder);
        MkdirSpec.construct_tasks(&cbc, &mut recorder);

        assert!(recorder.tasks.is_empty());
        assert_eq!(recorder.diagnostics.len(), 2);
        assert_eq!(
            recorder.diagnostics[0].message,
            "com.apple.compilers.clang requires a source file and an object file"
        );
    }
}
