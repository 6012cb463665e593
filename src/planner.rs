//! Turns a [`BuildRequest`] into planned tasks, one target per rayon job.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::action::{AuxiliaryFileAction, TaskAction};
use crate::context::{CommandBuildContext, FileType};
use crate::description::{
    CachedSearchPaths, RecursiveSearchPathResolver, SearchPathKey, target_begin_node, target_end_node,
};
use crate::diagnostics::{Diagnostic, ScopedDiagnostic};
use crate::fs::FileSystem;
use crate::node::{Node, normalize_path};
use crate::settings::{Settings, SettingsScope};
use crate::spec::{
    CodeSignSpec, CompileSpec, CopyPlistSpec, CopySpec, CopyStringsSpec, CopyTiffSpec, InfoPlistSpec, LinkSpec,
    MkdirSpec, SymlinkSpec, TaskGenerationDelegate, ToolSpec,
};
use crate::task::{PlannedTask, TaskBuilder};
use crate::utils::{get_style_plan, get_style_target};
use crate::workspace::{BuildRequest, Target};

/// Everything planning produced, ready for the description builder.
#[derive(Debug, Clone, Default)]
pub struct PlanResult {
    pub workspace: String,
    /// Planned targets, dependencies first.
    pub targets: Vec<String>,
    pub tasks: Vec<PlannedTask>,
    pub diagnostics: Vec<ScopedDiagnostic>,
    /// Effective settings of each target.
    pub settings: BTreeMap<String, Settings>,
    pub target_dependencies: BTreeMap<String, Vec<String>>,
    pub search_paths: Vec<CachedSearchPaths>,
}

pub struct TaskPlanner<'a> {
    fs: &'a dyn FileSystem,
    resolver: &'a RecursiveSearchPathResolver,
}

impl<'a> TaskPlanner<'a> {
    pub fn new(fs: &'a dyn FileSystem, resolver: &'a RecursiveSearchPathResolver) -> Self {
        Self { fs, resolver }
    }

    pub fn plan(&self, request: &BuildRequest) -> anyhow::Result<PlanResult> {
        let workspace = &request.workspace;
        let (targets, mut diagnostics) = workspace.resolve(&request.targets);

        let settings: Vec<Settings> = targets.iter().map(|t| effective_settings(request, t)).collect();

        let mut tasks = self.plan_product_directories(&workspace.root, &settings);

        let root_span = tracing::info_span!("planning_targets");
        root_span.pb_set_length(targets.len() as u64);
        root_span.pb_set_style(&get_style_plan()?);
        root_span.pb_set_message("Planning targets...");
        let _enter = root_span.enter();

        let target_style = get_style_target()?;

        let planned: Vec<TargetPlan> = targets
            .par_iter()
            .zip(settings.par_iter())
            .map(|(target, settings)| {
                let span = tracing::info_span!(parent: &root_span, "target", name = %target.name);
                span.pb_set_style(&target_style);
                span.pb_set_message(&format!("Planning {}", target.name));
                let _enter = span.enter();

                let plan = self.plan_target(request, target, settings);
                root_span.pb_inc(1);
                plan
            })
            .collect();

        let mut search_paths = BTreeMap::new();
        for plan in planned {
            tasks.extend(plan.tasks);
            diagnostics.extend(plan.diagnostics);
            search_paths.extend(plan.search_paths);
        }

        let target_dependencies = targets
            .iter()
            .map(|target| {
                let known = target
                    .dependencies
                    .iter()
                    .filter(|name| workspace.find(name).is_some())
                    .cloned()
                    .collect();
                (target.name.clone(), known)
            })
            .collect();

        tracing::info!("planned {} tasks for {} targets", tasks.len(), targets.len());

        Ok(PlanResult {
            workspace: workspace.name.clone(),
            targets: targets.iter().map(|t| t.name.clone()).collect(),
            tasks,
            diagnostics,
            settings: targets.iter().map(|t| t.name.clone()).zip(settings).collect(),
            target_dependencies,
            search_paths: search_paths.into_values().collect(),
        })
    }

    /// One workspace-level directory task per distinct products directory.
    fn plan_product_directories(&self, root: &Utf8Path, settings: &[Settings]) -> Vec<PlannedTask> {
        let dirs: BTreeSet<Utf8PathBuf> = settings.iter().map(|s| products_dir(root, s)).collect();

        let scope = Settings::new();
        let cbc = CommandBuildContext::new(None, &scope, root).outputs(dirs);

        let mut collector = Collector::new(None, root, self);
        if !cbc.outputs.is_empty() {
            MkdirSpec.construct_tasks(&cbc, &mut collector);
        }
        collector.tasks
    }

    fn plan_target(&self, request: &BuildRequest, target: &Target, settings: &Settings) -> TargetPlan {
        let root = request.workspace.root.as_path();
        let name = target.name.as_str();
        let begin = target_begin_node(name);

        let products = products_dir(root, settings);
        let objects = absolute(root, settings.lookup("OBJECT_FILE_DIR").unwrap_or_default());
        let product_name = settings.string("PRODUCT_NAME");

        let mut collector = Collector::new(Some(name), root, self);
        collector.order.push(begin.clone());

        let context = |inputs: &[&Utf8Path], output: Option<&Utf8Path>| {
            let mut cbc = CommandBuildContext::new(Some(name), settings, root)
                .inputs(inputs.iter().copied())
                .ordered_after([begin.clone()]);
            if let Some(output) = output {
                cbc = cbc.output(output);
            }
            cbc
        };

        let sources: Vec<Utf8PathBuf> = target.sources.iter().map(|s| absolute(root, s.as_str())).collect();
        let compiled: Vec<&Utf8PathBuf> = sources.iter().filter(|s| FileType::of(s).is_compilable()).collect();

        if !compiled.is_empty() {
            MkdirSpec.construct_tasks(&context(&[], Some(objects.as_path())), &mut collector);
        }

        let mut objects_to_link = Vec::new();
        for source in compiled {
            let stem = source.file_stem().unwrap_or("out");
            let object = objects.join(format!("{stem}.o"));
            let cbc = context(&[source.as_path()], Some(object.as_path())).ordered_after([Node::path(&objects)]);
            CompileSpec.construct_tasks(&cbc, &mut collector);
            objects_to_link.push(object);
        }
        objects_to_link.extend(sources.iter().filter(|s| FileType::of(s) == FileType::Object).cloned());

        let product = (!objects_to_link.is_empty()).then(|| products.join(&product_name));
        if let Some(product) = &product {
            let inputs: Vec<&Utf8Path> = objects_to_link.iter().map(Utf8PathBuf::as_path).collect();
            LinkSpec.construct_tasks(&context(&inputs, Some(product.as_path())), &mut collector);
        }

        let resources_dir = match settings.lookup("UNLOCALIZED_RESOURCES_FOLDER_PATH") {
            Some(path) if !path.is_empty() => absolute(&products, path),
            _ => products.join(format!("{product_name}.resources")),
        };

        for resource in &target.resources {
            let source = absolute(root, resource.as_str());
            let destination = resource_destination(&resources_dir, &source);
            let spec: &dyn ToolSpec = match FileType::of(&source) {
                FileType::PropertyList => &CopyPlistSpec,
                FileType::Strings => &CopyStringsSpec,
                FileType::Tiff => &CopyTiffSpec,
                _ => &CopySpec,
            };
            spec.construct_tasks(&context(&[source.as_path()], Some(destination.as_path())), &mut collector);
        }

        if let Some(info) = settings.lookup("INFOPLIST_FILE").filter(|p| !p.is_empty()) {
            let info = absolute(root, info);
            let output = match settings.lookup("INFOPLIST_PATH") {
                Some(path) if !path.is_empty() => absolute(&products, path),
                _ => resources_dir.join("Info.plist"),
            };
            let pkginfo = settings
                .boolean("GENERATE_PKGINFO_FILE")
                .then(|| output.with_file_name("PkgInfo"));
            let platform = settings.string("PLATFORM_NAME");

            InfoPlistSpec.construct_info_plist_tasks(
                &context(&[info.as_path()], Some(output.as_path())),
                &mut collector,
                &platform,
                pkginfo.as_deref(),
            );
        }

        if let Some(product) = &product {
            if settings.lookup("CODE_SIGN_IDENTITY").is_some_and(|id| !id.is_empty()) {
                CodeSignSpec.construct_tasks(&context(&[product.as_path()], None), &mut collector);
            }

            if let Some(link) = settings.lookup("PRODUCT_LINK_PATH").filter(|p| !p.is_empty()) {
                let link = absolute(&products, link);
                SymlinkSpec.construct_tasks(&context(&[product.as_path()], Some(link.as_path())), &mut collector);
            }
        } else if ["CODE_SIGN_IDENTITY", "PRODUCT_LINK_PATH"]
            .iter()
            .any(|name| settings.lookup(name).is_some_and(|value| !value.is_empty()))
        {
            collector.emit(Diagnostic::warning(format!(
                "Target '{name}' has no sources to link, skipping signing and product links"
            )));
        }

        let produced: BTreeSet<Node> = collector.tasks.iter().flat_map(|t| t.outputs.iter().cloned()).collect();

        let dependencies = target
            .dependencies
            .iter()
            .filter(|dependency| request.workspace.find(dependency).is_some())
            .map(|dependency| target_end_node(dependency));

        collector.add_task(
            TaskBuilder::phony("Gate", ["Gate", format!("target-{name}-begin").as_str()])
                .target(Some(name))
                .inputs(dependencies)
                .input(Node::path(&products))
                .output(begin.clone()),
        );
        collector.add_task(
            TaskBuilder::phony("Gate", ["Gate", format!("target-{name}-end").as_str()])
                .target(Some(name))
                .input(begin)
                .inputs(produced)
                .output(target_end_node(name)),
        );

        tracing::debug!("planned {} tasks for {name}", collector.tasks.len());

        TargetPlan {
            tasks: collector.tasks,
            diagnostics: collector.diagnostics,
            search_paths: collector.search_paths,
        }
    }
}

struct TargetPlan {
    tasks: Vec<PlannedTask>,
    diagnostics: Vec<ScopedDiagnostic>,
    search_paths: BTreeMap<SearchPathKey, CachedSearchPaths>,
}

/// Per-target delegate. Nothing here is shared between targets except the
/// resolver, which synchronizes itself.
struct Collector<'a> {
    target: Option<&'a str>,
    scope: &'a Utf8Path,
    fs: &'a dyn FileSystem,
    resolver: &'a RecursiveSearchPathResolver,
    /// Inputs every auxiliary file task gets.
    order: Vec<Node>,
    tasks: Vec<PlannedTask>,
    diagnostics: Vec<ScopedDiagnostic>,
    /// Expansions this target relied on.
    search_paths: BTreeMap<SearchPathKey, CachedSearchPaths>,
}

impl<'a> Collector<'a> {
    fn new(target: Option<&'a str>, scope: &'a Utf8Path, planner: &TaskPlanner<'a>) -> Self {
        Self {
            target,
            scope,
            fs: planner.fs,
            resolver: planner.resolver,
            order: Vec::new(),
            tasks: Vec::new(),
            diagnostics: Vec::new(),
            search_paths: BTreeMap::new(),
        }
    }
}

impl TaskGenerationDelegate for Collector<'_> {
    fn add_task(&mut self, task: TaskBuilder) {
        self.tasks.push(task.build());
    }

    fn create_aux_file(&mut self, path: &Utf8Path, contents: Vec<u8>, executable: bool) -> Node {
        let mut action = AuxiliaryFileAction::new(path, contents);
        if executable {
            action = action.permissions(0o755);
        }

        let node = Node::path(path);
        self.add_task(
            TaskBuilder::new("WriteAuxiliaryFile", ["WriteAuxiliaryFile", path.as_str()])
                .target(self.target)
                .working_directory(self.scope)
                .inputs(self.order.clone())
                .action(TaskAction::AuxiliaryFile(action))
                .output(node.clone())
                .description(format!("Write {}", path.file_name().unwrap_or(path.as_str()))),
        );
        node
    }

    fn search_paths(&mut self, expression: &str) -> Vec<Utf8PathBuf> {
        let resolved = self.resolver.expand(expression, self.scope, self.fs);
        for diagnostic in resolved.diagnostics {
            self.emit(diagnostic);
        }
        if let Some(cached) = resolved.cached {
            self.search_paths.insert(cached.key.clone(), cached);
        }
        resolved.paths
    }

    fn emit(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(ScopedDiagnostic::new(self.target, diagnostic));
    }
}

/// Built-in defaults, then the target's own settings, then the request's
/// overrides.
fn effective_settings(request: &BuildRequest, target: &Target) -> Settings {
    let root = &request.workspace.root;
    let defaults = Settings::new()
        .set("TARGET_NAME", &target.name)
        .set("PRODUCT_NAME", &target.name)
        .set("PLATFORM_NAME", &request.destination)
        .set("SRCROOT", root.as_str())
        .set("BUILT_PRODUCTS_DIR", root.join("build/Products").into_string())
        .set(
            "OBJECT_FILE_DIR",
            root.join(format!("build/{}.build/Objects", target.name)).into_string(),
        );

    Settings::layered(&Settings::layered(&defaults, &target.settings), &request.overrides)
}

fn products_dir(root: &Utf8Path, settings: &Settings) -> Utf8PathBuf {
    absolute(root, settings.lookup("BUILT_PRODUCTS_DIR").unwrap_or("build/Products"))
}

fn absolute(base: &Utf8Path, path: &str) -> Utf8PathBuf {
    normalize_path(&base.join(path))
}

/// Localized resources keep their `.lproj` directory.
fn resource_destination(resources_dir: &Utf8Path, source: &Utf8Path) -> Utf8PathBuf {
    let name = source.file_name().unwrap_or(source.as_str());
    match source.parent().and_then(Utf8Path::file_name) {
        Some(lproj) if lproj.ends_with(".lproj") => resources_dir.join(lproj).join(name),
        _ => resources_dir.join(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::core::Hash32;
    use crate::description::BuildDescriptionBuilder;
    use crate::fs::PseudoFs;
    use crate::workspace::Workspace;

    fn plan(request: &BuildRequest, fs: &PseudoFs) -> PlanResult {
        let resolver = RecursiveSearchPathResolver::new(&BuildConfig::default()).unwrap();
        TaskPlanner::new(fs, &resolver).plan(request).unwrap()
    }

    fn foo_bar() -> BuildRequest {
        let workspace = Workspace::new("W", "/w")
            .target(Target::new("Foo").source("Foo/foo.c").resource("Foo/Settings.plist"))
            .target(Target::new("Bar").source("Bar/bar.c").depends_on("Foo"));
        BuildRequest::new(workspace, "macosx").targets(["Bar"])
    }

    fn find<'a>(plan: &'a PlanResult, rule: &[&str]) -> &'a PlannedTask {
        plan.tasks
            .iter()
            .find(|t| t.rule_info == rule)
            .unwrap_or_else(|| panic!("no task {rule:?}"))
    }

    #[test]
    fn test_dependent_target_waits_for_dependency() {
        let plan = plan(&foo_bar(), &PseudoFs::new());

        assert_eq!(plan.targets, vec!["Foo", "Bar"]);
        assert!(plan.diagnostics.is_empty());

        let begin = find(&plan, &["Gate", "target-Bar-begin"]);
        assert!(begin.inputs.contains(&Node::virtual_node("target-Foo-end")));
        assert!(begin.inputs.contains(&Node::path("/w/build/Products")));

        let foo_end = find(&plan, &["Gate", "target-Foo-end"]);
        assert!(foo_end.inputs.contains(&Node::path("/w/build/Products/Foo")));
        assert!(foo_end.inputs.contains(&Node::path("/w/build/Products/Foo.resources/Settings.plist")));

        for task in plan.tasks.iter().filter(|t| t.target.as_deref() == Some("Bar") && !t.phony) {
            assert!(
                task.inputs.contains(&Node::virtual_node("target-Bar-begin")),
                "{} is not gated",
                task.rule_info_string()
            );
        }
    }

    #[test]
    fn test_foo_bar_description() {
        let request = foo_bar();
        let plan = plan(&request, &PseudoFs::new());
        let description = BuildDescriptionBuilder::from_plan(&BuildConfig::default(), request.signature(), plan)
            .construct()
            .unwrap();

        assert!(description.diagnostics.is_empty(), "{:?}", description.diagnostics);
        assert_eq!(description.client.targets, vec!["Foo", "Bar"]);
        assert_eq!(description.target_dependencies["Bar"], vec!["Foo".to_string()]);

        let manifest: serde_json::Value = serde_json::from_str(&description.manifest().unwrap()).unwrap();
        assert_eq!(manifest["targets"]["Foo"], serde_json::json!(["<target-Foo-end>"]));
        assert_eq!(manifest["targets"]["Bar"], serde_json::json!(["<target-Bar-end>"]));

        let link = &manifest["commands"]["P0:Bar:Ld /w/build/Products/Bar"];
        assert_eq!(link["tool"], "shell");
        assert!(
            link["inputs"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("/w/build/Bar.build/Objects/Bar.LinkFileList"))
        );
    }

    #[test]
    fn test_recursive_header_search_paths() {
        let fs = PseudoFs::new();
        fs.add_file("/w/include/a.h", "");
        fs.add_file("/w/include/sub/b.h", "");

        let workspace = Workspace::new("W", "/w").target(
            Target::new("Foo")
                .source("foo.c")
                .setting("HEADER_SEARCH_PATHS", "include/**"),
        );
        let plan = plan(&BuildRequest::new(workspace, "macosx"), &fs);

        let compile = find(&plan, &["CompileC", "/w/build/Foo.build/Objects/foo.o", "/w/foo.c"]);
        assert!(compile.command_line.contains(&"-I/w/include".to_string()));
        assert!(compile.command_line.contains(&"-I/w/include/sub".to_string()));
        assert_eq!(plan.search_paths.len(), 1);
    }

    #[test]
    fn test_resources_dispatch_by_type() {
        let workspace = Workspace::new("W", "/w").target(
            Target::new("App")
                .resource("en.lproj/Localizable.strings")
                .resource("Icon.tiff")
                .resource("Defaults.plist")
                .resource("Assets"),
        );
        let plan = plan(&BuildRequest::new(workspace, "macosx"), &PseudoFs::new());

        let types: BTreeSet<&str> = plan.tasks.iter().map(|t| t.task_type.as_str()).collect();
        for expected in ["CopyStringsFile", "CopyTiffFile", "CopyPlistFile", "Copy"] {
            assert!(types.contains(expected), "missing {expected}");
        }
        assert!(
            plan.tasks
                .iter()
                .any(|t| t.outputs == [Node::path("/w/build/Products/App.resources/en.lproj/Localizable.strings")])
        );
        assert!(!types.contains("Ld"));
    }

    #[test]
    fn test_product_extras() {
        let workspace = Workspace::new("W", "/w").target(
            Target::new("App")
                .source("main.c")
                .setting("INFOPLIST_FILE", "Info.plist")
                .setting("GENERATE_PKGINFO_FILE", "YES")
                .setting("CODE_SIGN_IDENTITY", "-")
                .setting("PRODUCT_LINK_PATH", "current"),
        );
        let plan = plan(&BuildRequest::new(workspace, "macosx"), &PseudoFs::new());

        let info = find(
            &plan,
            &["ProcessInfoPlistFile", "/w/build/Products/App.resources/Info.plist", "/w/Info.plist"],
        );
        assert!(info.outputs.contains(&Node::path("/w/build/Products/App.resources/PkgInfo")));
        assert_eq!(info.action, Some(TaskAction::InfoPlistProcessor));

        let sign = find(&plan, &["CodeSign", "/w/build/Products/App"]);
        assert!(sign.inputs.contains(&Node::path("/w/build/Products/App")));

        let link = find(&plan, &["SymLink", "/w/build/Products/current", "/w/build/Products/App"]);
        assert_eq!(link.action, Some(TaskAction::Symlink));
    }

    #[test]
    fn test_shared_product_is_a_conflict() {
        let workspace = Workspace::new("W", "/w")
            .target(Target::new("A").source("a.c").setting("PRODUCT_NAME", "App"))
            .target(Target::new("B").source("b.c").setting("PRODUCT_NAME", "App"));
        let request = BuildRequest::new(workspace, "macosx");
        let plan = plan(&request, &PseudoFs::new());

        let description = BuildDescriptionBuilder::from_plan(&BuildConfig::default(), Hash32::default(), plan)
            .construct()
            .unwrap();

        let messages: Vec<&str> = description
            .diagnostics
            .iter()
            .map(|d| d.diagnostic.message.as_str())
            .collect();
        assert_eq!(messages, vec!["Multiple commands produce '/w/build/Products/App'"]);
        assert_eq!(description.diagnostics[0].diagnostic.children.len(), 2);
    }

    #[test]
    fn test_unknown_target_is_reported() {
        let workspace = Workspace::new("W", "/w").target(Target::new("Foo"));
        let request = BuildRequest::new(workspace, "macosx").targets(["Nope"]);
        let plan = plan(&request, &PseudoFs::new());

        assert!(plan.targets.is_empty());
        assert_eq!(plan.diagnostics[0].diagnostic.message, "Unable to find a target named 'Nope'");
    }
}
