//! Build description cache.
//!
//! Constructing a description plans every target of a workspace, so it is
//! done once per distinct request and shared afterwards. Descriptions live
//! in memory under an eviction policy and, when a cache root is configured,
//! on disk as `<root>/<signature>.swbdata/{description.swbd,manifest.json}`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;

use crate::config::{BuildConfig, EvictionPolicy};
use crate::core::Hash32;
use crate::description::{
    BuildDescription, BuildDescriptionBuilder, RecursiveSearchPathResolver, RetrievalSource, serial,
};
use crate::error::{CacheError, SerialError};
use crate::fs::FileSystem;
use crate::planner::TaskPlanner;
use crate::workspace::BuildRequest;

const DESCRIPTION_FILE: &str = "description.swbd";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct Retrieved {
    pub description: Arc<BuildDescription>,
    pub source: RetrievalSource,
}

#[derive(Debug)]
struct Cached {
    description: Arc<BuildDescription>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<Hash32, Cached>,
    clock: u64,
    /// One lock per signature, so concurrent requests for the same
    /// description construct it once while other signatures proceed.
    slots: BTreeMap<Hash32, Arc<Mutex<()>>>,
}

#[derive(Debug)]
pub struct DescriptionCacheManager {
    config: BuildConfig,
    fs: Arc<dyn FileSystem>,
    resolver: RecursiveSearchPathResolver,
    state: Mutex<State>,
}

impl DescriptionCacheManager {
    pub fn new(config: BuildConfig, fs: Arc<dyn FileSystem>) -> Result<Self, glob::PatternError> {
        Ok(Self {
            resolver: RecursiveSearchPathResolver::new(&config)?,
            config,
            fs,
            state: Mutex::new(State::default()),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Plans `request` or reuses an earlier description of it.
    pub fn description_for(&self, request: &BuildRequest) -> Result<Retrieved, CacheError> {
        let signature = self.signature_for(request);

        self.get_or_construct(signature, || {
            let plan = TaskPlanner::new(self.fs.as_ref(), &self.resolver).plan(request)?;
            let description = BuildDescriptionBuilder::from_plan(&self.config, signature, plan).construct()?;
            Ok(description)
        })
    }

    /// Cache key of the description for `request` under this configuration.
    pub fn signature_for(&self, request: &BuildRequest) -> Hash32 {
        Hash32::of(
            "build-description",
            &(
                request.signature(),
                serial::FORMAT_VERSION,
                self.config.file_system_mode,
                self.config.perform_ownership_analysis,
                self.config.recursive_search_path_limit,
                &self.config.excluded_recursive_search_subdirectories,
            ),
        )
    }

    /// Returns the description stored under `signature`, from memory, from
    /// disk, or by calling `construct`. Concurrent callers with the same
    /// signature wait for a single construction.
    pub fn get_or_construct<F>(&self, signature: Hash32, construct: F) -> Result<Retrieved, CacheError>
    where
        F: FnOnce() -> anyhow::Result<BuildDescription>,
    {
        let slot = self.lock().slots.entry(signature).or_default().clone();
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.retrieve(signature, construct)
        };

        // Slots only live while someone is working on their signature. Clones
        // are taken and dropped under the state lock, so the last user sees 1.
        let mut state = self.lock();
        drop(slot);
        if state.slots.get(&signature).is_some_and(|held| Arc::strong_count(held) == 1) {
            state.slots.remove(&signature);
        }
        result
    }

    fn retrieve<F>(&self, signature: Hash32, construct: F) -> Result<Retrieved, CacheError>
    where
        F: FnOnce() -> anyhow::Result<BuildDescription>,
    {
        if let Some(description) = self.touch(signature) {
            tracing::info!("build description {signature} retrieved from memory");
            return Ok(Retrieved {
                description,
                source: RetrievalSource::InMemoryCache,
            });
        }

        if let Some(description) = self.load(signature) {
            tracing::info!("build description {signature} retrieved from disk");
            let description = Arc::new(description);
            self.insert(signature, description.clone());
            return Ok(Retrieved {
                description,
                source: RetrievalSource::OnDiskCache,
            });
        }

        let description = construct().map_err(CacheError::Construction)?;
        self.store(signature, &description)?;

        tracing::info!("build description {signature} constructed");
        let description = Arc::new(description);
        self.insert(signature, description.clone());
        Ok(Retrieved {
            description,
            source: RetrievalSource::New,
        })
    }

    /// Signatures held in memory, least recently used first.
    pub fn cached_signatures(&self) -> Vec<Hash32> {
        let state = self.lock();
        let mut entries: Vec<(&Hash32, &Cached)> = state.entries.iter().collect();
        entries.sort_by_key(|(_, cached)| cached.last_used);
        entries.into_iter().map(|(signature, _)| *signature).collect()
    }

    /// Forgets every in-memory description. Files on disk stay.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A cached description is only usable while the directories its search
    /// paths were expanded from are unchanged.
    fn is_current(&self, description: &BuildDescription) -> bool {
        description
            .search_paths
            .iter()
            .all(|cached| self.resolver.is_current(cached, self.fs.as_ref()))
    }

    fn touch(&self, signature: Hash32) -> Option<Arc<BuildDescription>> {
        let mut state = self.lock();
        state.clock += 1;
        let now = state.clock;

        let cached = state.entries.get_mut(&signature)?;
        cached.last_used = now;
        let description = cached.description.clone();
        drop(state);

        if self.is_current(&description) {
            Some(description)
        } else {
            tracing::debug!("build description {signature} has stale search paths");
            self.lock().entries.remove(&signature);
            None
        }
    }

    fn insert(&self, signature: Hash32, description: Arc<BuildDescription>) {
        let mut state = self.lock();
        state.clock += 1;
        let last_used = state.clock;
        state.entries.insert(signature, Cached { description, last_used });
        evict(&mut state, self.config.description_cache, signature);
    }

    fn directory(&self, signature: Hash32) -> Option<Utf8PathBuf> {
        let root = self.config.cache_root.as_ref()?;
        Some(root.join(format!("{signature}.swbdata")))
    }

    fn load(&self, signature: Hash32) -> Option<BuildDescription> {
        let path = self.directory(signature)?.join(DESCRIPTION_FILE);
        if !self.fs.exists(&path) {
            return None;
        }

        let bytes = match self.fs.read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("couldn't read cached build description {path}: {e}");
                return None;
            }
        };

        match BuildDescription::from_bytes(&bytes) {
            Ok(description) if self.is_current(&description) => Some(description),
            Ok(_) => {
                tracing::debug!("cached build description {path} has stale search paths");
                None
            }
            Err(SerialError::Version { found, expected }) => {
                tracing::warn!("discarding cached build description {path}: format version {found}, expected {expected}");
                None
            }
            Err(e) => {
                tracing::warn!("discarding cached build description {path}: {e}");
                None
            }
        }
    }

    fn store(&self, signature: Hash32, description: &BuildDescription) -> Result<(), CacheError> {
        let Some(dir) = self.directory(signature) else {
            return Ok(());
        };

        self.fs
            .create_dir_all(&dir)
            .map_err(|e| CacheError::Io(dir.clone(), e))?;

        // The description file goes last, its presence marks a complete entry.
        let manifest = dir.join(MANIFEST_FILE);
        self.fs
            .write(&manifest, description.manifest()?.as_bytes())
            .map_err(|e| CacheError::Io(manifest, e))?;

        let path = dir.join(DESCRIPTION_FILE);
        self.fs
            .write(&path, &description.to_bytes()?)
            .map_err(|e| CacheError::Io(path, e))?;

        tracing::debug!("stored build description {signature} in {dir}");
        Ok(())
    }
}

/// Drops least recently used entries until `policy` is satisfied. The entry
/// `keep` was just inserted and always stays.
fn evict(state: &mut State, policy: EvictionPolicy, keep: Hash32) {
    loop {
        let over = match policy {
            EvictionPolicy::Never => false,
            EvictionPolicy::Lru { capacity } => state.entries.len() > capacity,
            EvictionPolicy::TaskBudget { max_tasks } => {
                state
                    .entries
                    .values()
                    .map(|cached| cached.description.tasks.len())
                    .sum::<usize>()
                    > max_tasks
            }
        };
        if !over {
            return;
        }

        let victim = state
            .entries
            .iter()
            .filter(|(signature, _)| **signature != keep)
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(signature, _)| *signature);
        let Some(victim) = victim else {
            return;
        };

        state.entries.remove(&victim);
        tracing::debug!("evicted build description {victim}");
    }
}
