use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// A vertex of the build graph.
///
/// Identity is the printable identifier alone, so two nodes that print the
/// same are the same vertex no matter how they were created. In particular
/// the exclusion patterns of a directory tree do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Node {
    Path {
        path: Utf8PathBuf,
    },
    DirectoryTree {
        path: Utf8PathBuf,
        excluding: Vec<String>,
    },
    Virtual {
        name: String,
    },
}

impl Node {
    pub fn path(path: impl AsRef<Utf8Path>) -> Self {
        Node::Path {
            path: normalize_path(path.as_ref()),
        }
    }

    pub fn directory_tree<I, S>(path: impl AsRef<Utf8Path>, excluding: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut excluding: Vec<String> = excluding.into_iter().map(Into::into).collect();
        excluding.sort();
        excluding.dedup();

        Node::DirectoryTree {
            path: normalize_path(path.as_ref()),
            excluding,
        }
    }

    /// Synthetic ordering-only node. The name is wrapped in angle brackets
    /// unless it already is.
    pub fn virtual_node(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let name = if name.starts_with('<') && name.ends_with('>') {
            name.to_owned()
        } else {
            format!("<{name}>")
        };

        Node::Virtual { name }
    }

    pub fn identifier(&self) -> String {
        match self {
            Node::Path { path } => path.to_string(),
            Node::DirectoryTree { path, .. } => {
                let path = path.as_str();
                if path.ends_with('/') {
                    path.to_owned()
                } else {
                    format!("{path}/")
                }
            }
            Node::Virtual { name } => name.clone(),
        }
    }

    /// Filesystem path of the node, if it has one.
    pub fn fs_path(&self) -> Option<&Utf8Path> {
        match self {
            Node::Path { path } | Node::DirectoryTree { path, .. } => Some(path),
            Node::Virtual { .. } => None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Node::Virtual { .. })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.identifier() == other.identifier()
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier().hash(state);
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identifier().cmp(&other.identifier())
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identifier())
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => {}
            Utf8Component::RootDir => ret.push(Utf8Component::RootDir),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else if !ret.pop() && !ret.has_root() {
                    ret.push(Utf8Component::ParentDir);
                }
            }
            Utf8Component::Normal(c) => ret.push(c),
        }
    }

    if ret.as_str().is_empty() {
        ret.push(".");
    }

    ret
}
