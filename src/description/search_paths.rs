//! Expansion of recursive search paths such as `$(SRCROOT)/include/**`.
//!
//! Expanding a recursive path means walking a directory tree, which is the
//! slowest thing task construction does. Results are memoized per
//! `(expression, scope)` and revalidated against the stat signature of every
//! directory the walk visited, so a lookup after a change on disk walks again
//! while an unchanged tree is answered from memory.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use super::RetrievalSource;
use crate::config::{BuildConfig, FileSystemMode};
use crate::core::{Blake3Hasher, Hash32};
use crate::diagnostics::Diagnostic;
use crate::fs::FileSystem;

const RECURSIVE_SUFFIX: &str = "/**";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchPathKey {
    pub expression: String,
    /// Directory a relative expression is evaluated against.
    pub scope: Utf8PathBuf,
}

/// One memoized expansion, as stored in a build description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSearchPaths {
    pub key: SearchPathKey,
    pub paths: Vec<Utf8PathBuf>,
    pub truncated: bool,
    /// Directories whose stat data went into `signature`.
    pub visited: Vec<Utf8PathBuf>,
    /// Combined stat signature of the visited directories.
    pub signature: Hash32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSearchPaths {
    pub paths: Vec<Utf8PathBuf>,
    pub source: RetrievalSource,
    pub diagnostics: Vec<Diagnostic>,
    /// The memoized expansion, for recursive expressions.
    pub cached: Option<CachedSearchPaths>,
}

#[derive(Debug)]
pub struct RecursiveSearchPathResolver {
    excluded: Vec<Pattern>,
    limit: usize,
    mode: FileSystemMode,
    cache: Mutex<BTreeMap<SearchPathKey, CachedSearchPaths>>,
}

impl RecursiveSearchPathResolver {
    pub fn new(config: &BuildConfig) -> Result<Self, glob::PatternError> {
        let excluded = config
            .excluded_recursive_search_subdirectories
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            excluded,
            limit: config.recursive_search_path_limit,
            mode: config.file_system_mode,
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn is_recursive(expression: &str) -> bool {
        expression.ends_with(RECURSIVE_SUFFIX) || expression == "**"
    }

    /// Expands one search path expression.
    ///
    /// Non-recursive expressions resolve to themselves and are never cached.
    /// A recursive `dir/**` yields `dir` and every directory below it, sorted,
    /// skipping excluded names and symlinked directories.
    pub fn expand(&self, expression: &str, scope: &Utf8Path, fs: &dyn FileSystem) -> ResolvedSearchPaths {
        let root = expression.strip_suffix(RECURSIVE_SUFFIX).or((expression == "**").then_some(""));
        let Some(root) = root else {
            return ResolvedSearchPaths {
                paths: vec![absolute(scope, expression)],
                source: RetrievalSource::New,
                diagnostics: Vec::new(),
                cached: None,
            };
        };

        let key = SearchPathKey {
            expression: expression.to_owned(),
            scope: scope.to_owned(),
        };

        // The lock only guards map access; stats and walks run outside it.
        let known = self.lock().get(&key).cloned();
        if let Some(entry) = known
            && self.is_current(&entry, fs)
        {
            tracing::debug!("search path '{expression}' answered from memory");
            return ResolvedSearchPaths {
                paths: entry.paths.clone(),
                source: RetrievalSource::InMemoryCache,
                diagnostics: self.truncation_warning(&entry),
                cached: Some(entry),
            };
        }

        let (paths, visited, truncated) = self.walk(fs, &absolute(scope, root));
        let result = CachedSearchPaths {
            key: key.clone(),
            paths,
            truncated,
            signature: self.signature(fs, &visited),
            visited,
        };
        let resolved = ResolvedSearchPaths {
            paths: result.paths.clone(),
            source: RetrievalSource::New,
            diagnostics: self.truncation_warning(&result),
            cached: Some(result.clone()),
        };

        match self.lock().entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().signature != result.signature {
                    slot.insert(result);
                }
            }
        }
        resolved
    }

    /// Whether none of the directories an expansion visited changed since.
    pub fn is_current(&self, cached: &CachedSearchPaths, fs: &dyn FileSystem) -> bool {
        self.signature(fs, &cached.visited) == cached.signature
    }

    /// The current cache content, ordered by key.
    pub fn cached(&self) -> Vec<CachedSearchPaths> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SearchPathKey, CachedSearchPaths>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn walk(&self, fs: &dyn FileSystem, root: &Utf8Path) -> (Vec<Utf8PathBuf>, Vec<Utf8PathBuf>, bool) {
        let mut found = Vec::new();
        let mut visited = Vec::new();
        let mut truncated = false;

        if !fs.is_dir(root) {
            return (found, vec![root.to_owned()], false);
        }

        let mut pending = vec![root.to_owned()];
        while let Some(dir) = pending.pop() {
            if found.len() >= self.limit {
                truncated = true;
                break;
            }
            found.push(dir.clone());
            visited.push(dir.clone());

            let Ok(names) = fs.read_dir(&dir) else {
                continue;
            };

            // Reverse so the stack pops in name order.
            for name in names.into_iter().rev() {
                if self.excluded.iter().any(|pattern| pattern.matches(&name)) {
                    continue;
                }
                let child = dir.join(&name);
                if fs.is_dir(&child) && !fs.is_symlink(&child) {
                    pending.push(child);
                }
            }
        }

        found.sort();
        visited.sort();
        (found, visited, truncated)
    }

    fn signature(&self, fs: &dyn FileSystem, dirs: &[Utf8PathBuf]) -> Hash32 {
        use std::hash::Hash;

        let mut hasher = Blake3Hasher::default();
        for dir in dirs {
            dir.hash(&mut hasher);
            match fs.stat(dir) {
                Ok(info) => {
                    (info.kind, info.size, info.modified_nanos).hash(&mut hasher);
                    if self.mode == FileSystemMode::Default {
                        (info.inode, info.device).hash(&mut hasher);
                    }
                }
                Err(_) => "missing".hash(&mut hasher),
            }
        }
        hasher.into()
    }

    fn truncation_warning(&self, result: &CachedSearchPaths) -> Vec<Diagnostic> {
        if !result.truncated {
            return Vec::new();
        }

        vec![Diagnostic::warning(format!(
            "Recursive search path '{}' expands to more than {} directories; only the first {} are used",
            result.key.expression, self.limit, self.limit
        ))]
    }
}

fn absolute(scope: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        crate::node::normalize_path(path)
    } else {
        crate::node::normalize_path(&scope.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::PseudoFs;

    fn tree() -> PseudoFs {
        let fs = PseudoFs::new();
        fs.add_file("/src/include/a.h", "");
        fs.add_file("/src/include/sub/b.h", "");
        fs.add_file("/src/include/Kit.framework/Headers/k.h", "");
        fs.add_file("/src/include/.git/HEAD", "");
        fs.add_dir("/src/include/sub/deeper");
        fs
    }

    fn resolver() -> RecursiveSearchPathResolver {
        RecursiveSearchPathResolver::new(&BuildConfig::default()).unwrap()
    }

    #[test]
    fn test_expands_sorted_with_exclusions() {
        let fs = tree();
        let resolved = resolver().expand("include/**", Utf8Path::new("/src"), &fs);

        assert_eq!(resolved.source, RetrievalSource::New);
        assert_eq!(
            resolved.paths,
            vec![
                Utf8PathBuf::from("/src/include"),
                Utf8PathBuf::from("/src/include/sub"),
                Utf8PathBuf::from("/src/include/sub/deeper"),
            ]
        );
    }

    #[test]
    fn test_only_one_cached_result() {
        let fs = tree();
        let resolver = resolver();
        let scope = Utf8Path::new("/src");

        let first = resolver.expand("include/**", scope, &fs);
        let second = resolver.expand("include/**", scope, &fs);

        assert_eq!(first.source, RetrievalSource::New);
        assert_eq!(second.source, RetrievalSource::InMemoryCache);
        assert_eq!(first.paths, second.paths);
        assert_eq!(resolver.cached().len(), 1);
    }

    #[test]
    fn test_parallel_lookups_keep_one_entry_per_key() {
        use rayon::prelude::*;

        let fs = tree();
        let resolver = resolver();
        let scope = Utf8Path::new("/src");

        let results: Vec<Vec<Utf8PathBuf>> = (0..16)
            .into_par_iter()
            .map(|i| {
                let expression = if i % 2 == 0 { "include/**" } else { "include/sub/**" };
                resolver.expand(expression, scope, &fs).paths
            })
            .collect();

        assert_eq!(resolver.cached().len(), 2);
        assert!(results.iter().step_by(2).all(|paths| *paths == results[0]));
        assert!(results.iter().skip(1).step_by(2).all(|paths| *paths == results[1]));
        assert_eq!(results[1][0], Utf8PathBuf::from("/src/include/sub"));
    }

    #[test]
    fn test_change_on_disk_invalidates() {
        let fs = tree();
        let resolver = resolver();
        let scope = Utf8Path::new("/src");

        resolver.expand("include/**", scope, &fs);
        fs.add_dir("/src/include/sub/new");
        let again = resolver.expand("include/**", scope, &fs);

        assert_eq!(again.source, RetrievalSource::New);
        assert!(again.paths.contains(&Utf8PathBuf::from("/src/include/sub/new")));
        assert_eq!(resolver.cached().len(), 1);

        let third = resolver.expand("include/**", scope, &fs);
        assert_eq!(third.source, RetrievalSource::InMemoryCache);
    }

    #[test]
    fn test_is_current_tracks_visited_directories() {
        let fs = tree();
        let resolver = resolver();
        let cached = resolver
            .expand("include/**", Utf8Path::new("/src"), &fs)
            .cached
            .unwrap();

        assert!(resolver.is_current(&cached, &fs));
        fs.add_file("/src/include/sub/c.h", "");
        assert!(!resolver.is_current(&cached, &fs));
    }

    #[test]
    fn test_scope_is_part_of_the_key() {
        let fs = tree();
        fs.add_dir("/other/include");
        let resolver = resolver();

        resolver.expand("include/**", Utf8Path::new("/src"), &fs);
        let other = resolver.expand("include/**", Utf8Path::new("/other"), &fs);

        assert_eq!(other.source, RetrievalSource::New);
        assert_eq!(other.paths, vec![Utf8PathBuf::from("/other/include")]);
        assert_eq!(resolver.cached().len(), 2);
    }

    #[test]
    fn test_limit_warns() {
        let fs = tree();
        let config = BuildConfig {
            recursive_search_path_limit: 2,
            ..BuildConfig::default()
        };
        let resolver = RecursiveSearchPathResolver::new(&config).unwrap();

        let resolved = resolver.expand("/src/include/**", Utf8Path::new("/"), &fs);

        assert_eq!(resolved.paths.len(), 2);
        assert_eq!(resolved.diagnostics.len(), 1);
        assert!(resolved.diagnostics[0].message.contains("more than 2 directories"));
    }

    #[test]
    fn test_plain_paths_pass_through() {
        let fs = tree();
        let resolver = resolver();
        let resolved = resolver.expand("include/../lib", Utf8Path::new("/src"), &fs);

        assert_eq!(resolved.paths, vec![Utf8PathBuf::from("/src/lib")]);
        assert!(resolver.cached().is_empty());
    }
}
