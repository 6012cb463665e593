use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::settings::SettingsScope;

/// Coarse file type, derived from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    CSource,
    CppSource,
    ObjCSource,
    Header,
    Object,
    PropertyList,
    Strings,
    Tiff,
    Other,
}

impl FileType {
    pub fn of(path: &Utf8Path) -> Self {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("c") => FileType::CSource,
            Some("cc" | "cpp" | "cxx") => FileType::CppSource,
            Some("m" | "mm") => FileType::ObjCSource,
            Some("h" | "hpp") => FileType::Header,
            Some("o") => FileType::Object,
            Some("plist") => FileType::PropertyList,
            Some("strings") => FileType::Strings,
            Some("tif" | "tiff") => FileType::Tiff,
            _ => FileType::Other,
        }
    }

    pub fn is_compilable(self) -> bool {
        matches!(self, FileType::CSource | FileType::CppSource | FileType::ObjCSource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileToBuild {
    pub path: Utf8PathBuf,
    pub file_type: FileType,
}

impl FileToBuild {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let file_type = FileType::of(&path);
        Self { path, file_type }
    }
}

/// Everything one tool spec invocation needs, already resolved.
///
/// A context is read-only while specs consume it, so contexts of different
/// targets can be handed to specs on different threads.
pub struct CommandBuildContext<'a> {
    pub target: Option<&'a str>,
    pub scope: &'a dyn SettingsScope,
    pub inputs: Vec<FileToBuild>,
    pub outputs: Vec<Utf8PathBuf>,
    /// Extra inputs that only order the task, such as the target's begin gate.
    pub command_order_nodes: Vec<Node>,
    pub working_directory: Utf8PathBuf,
}

impl<'a> CommandBuildContext<'a> {
    pub fn new(target: Option<&'a str>, scope: &'a dyn SettingsScope, working_directory: impl Into<Utf8PathBuf>) -> Self {
        Self {
            target,
            scope,
            inputs: Vec::new(),
            outputs: Vec::new(),
            command_order_nodes: Vec::new(),
            working_directory: working_directory.into(),
        }
    }

    pub fn input(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.inputs.push(FileToBuild::new(path));
        self
    }

    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.inputs.extend(paths.into_iter().map(FileToBuild::new));
        self
    }

    pub fn output(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn outputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.outputs.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn ordered_after(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.command_order_nodes.extend(nodes);
        self
    }

    pub fn first_input(&self) -> Option<&FileToBuild> {
        self.inputs.first()
    }

    pub fn first_output(&self) -> Option<&Utf8Path> {
        self.outputs.first().map(Utf8PathBuf::as_path)
    }

    /// Input file nodes followed by the ordering nodes.
    pub fn input_nodes(&self) -> Vec<Node> {
        self.inputs
            .iter()
            .map(|input| Node::path(&input.path))
            .chain(self.command_order_nodes.iter().cloned())
            .collect()
    }

    pub fn output_nodes(&self) -> Vec<Node> {
        self.outputs.iter().map(Node::path).collect()
    }
}
