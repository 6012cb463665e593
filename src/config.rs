use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the executor should compare file identity when deciding whether a node
/// changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileSystemMode {
    #[default]
    Default,
    /// Ignore device and inode numbers, compare only size and mtime.
    DeviceAgnostic,
}

impl FileSystemMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FileSystemMode::Default => "default",
            FileSystemMode::DeviceAgnostic => "device-agnostic",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(FileSystemMode::Default),
            "device-agnostic" => Some(FileSystemMode::DeviceAgnostic),
            _ => None,
        }
    }
}

/// When the in-memory description cache forgets entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum EvictionPolicy {
    /// Keep every description for the lifetime of the manager.
    Never,
    /// Keep the `capacity` most recently used descriptions.
    Lru { capacity: usize },
    /// Evict least recently used descriptions until the total task count of
    /// the cached descriptions fits into `max_tasks`. The newest entry always
    /// stays.
    TaskBudget { max_tasks: usize },
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Lru { capacity: 4 }
    }
}

impl EvictionPolicy {
    fn parse(value: &str) -> Option<Self> {
        if value == "never" {
            return Some(EvictionPolicy::Never);
        }
        if let Some(n) = value.strip_prefix("lru:") {
            return n.parse().ok().map(|capacity| EvictionPolicy::Lru { capacity });
        }
        if let Some(n) = value.strip_prefix("tasks:") {
            return n.parse().ok().map(|max_tasks| EvictionPolicy::TaskBudget { max_tasks });
        }
        None
    }
}

fn default_search_path_limit() -> usize {
    100_000
}

fn default_excluded_subdirectories() -> Vec<String> {
    [
        "*.nib", "*.lproj", "*.framework", "*.gch", "*.xcode*", "*.xcassets", ".DS_Store", "CVS", ".svn", ".git",
        ".hg", "*.pbproj", "*.pbxproj",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BuildConfig {
    pub file_system_mode: FileSystemMode,
    pub perform_ownership_analysis: bool,
    pub description_cache: EvictionPolicy,
    pub cache_root: Option<Utf8PathBuf>,
    #[serde(default = "default_search_path_limit")]
    pub recursive_search_path_limit: usize,
    #[serde(default = "default_excluded_subdirectories")]
    pub excluded_recursive_search_subdirectories: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            file_system_mode: FileSystemMode::Default,
            perform_ownership_analysis: false,
            description_cache: EvictionPolicy::default(),
            cache_root: None,
            recursive_search_path_limit: default_search_path_limit(),
            excluded_recursive_search_subdirectories: default_excluded_subdirectories(),
        }
    }
}

impl BuildConfig {
    /// Defaults with `SWBUILD_*` environment variables applied on top.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_vars(|key| std::env::var(key).ok())
    }

    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Applies overrides from a variable source. Split out from `from_env` so
    /// the parsing can be tested without touching the process environment.
    pub fn with_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let invalid = |key: &str, value: &str| ConfigError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };

        if let Some(value) = get("SWBUILD_FILE_SYSTEM_MODE") {
            self.file_system_mode =
                FileSystemMode::parse(&value).ok_or_else(|| invalid("SWBUILD_FILE_SYSTEM_MODE", &value))?;
        }

        if let Some(value) = get("SWBUILD_OWNERSHIP_ANALYSIS") {
            self.perform_ownership_analysis = match value.as_str() {
                "1" | "YES" | "yes" | "true" => true,
                "0" | "NO" | "no" | "false" => false,
                _ => return Err(invalid("SWBUILD_OWNERSHIP_ANALYSIS", &value)),
            };
        }

        if let Some(value) = get("SWBUILD_DESCRIPTION_CACHE") {
            self.description_cache =
                EvictionPolicy::parse(&value).ok_or_else(|| invalid("SWBUILD_DESCRIPTION_CACHE", &value))?;
        }

        if let Some(value) = get("SWBUILD_CACHE_ROOT")
            && !value.is_empty()
        {
            self.cache_root = Some(Utf8PathBuf::from(value));
        }

        Ok(self)
    }
}
