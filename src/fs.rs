//! Filesystem proxy used by task actions and the search path resolver.
//!
//! Actions only ever touch the filesystem through [`FileSystem`], so they can
//! be exercised against [`PseudoFs`] without a real disk.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::{self, ErrorKind};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

/// Subset of file metadata relevant for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileInfo {
    pub kind: FileKind,
    pub size: u64,
    pub modified_nanos: u128,
    pub inode: u64,
    pub device: u64,
    pub permissions: u32,
}

pub trait FileSystem: Send + Sync + Debug {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>>;

    /// Writes a file, replacing any existing content. The parent directory
    /// must already exist.
    fn write(&self, path: &Utf8Path, contents: &[u8]) -> io::Result<()>;

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()>;

    fn exists(&self, path: &Utf8Path) -> bool;

    fn is_dir(&self, path: &Utf8Path) -> bool;

    fn is_symlink(&self, path: &Utf8Path) -> bool;

    /// Names of the entries in a directory, sorted.
    fn read_dir(&self, path: &Utf8Path) -> io::Result<Vec<String>>;

    /// Removes a file, symlink or whole directory tree.
    fn remove(&self, path: &Utf8Path) -> io::Result<()>;

    fn symlink(&self, destination: &Utf8Path, link: &Utf8Path) -> io::Result<()>;

    fn read_link(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf>;

    fn set_permissions(&self, path: &Utf8Path, mode: u32) -> io::Result<()>;

    /// Metadata without following a final symlink.
    fn stat(&self, path: &Utf8Path) -> io::Result<FileInfo>;
}

/// Recursively copies `source` to `destination`, which must not exist.
pub fn copy_tree(fs: &dyn FileSystem, source: &Utf8Path, destination: &Utf8Path) -> io::Result<()> {
    if fs.is_symlink(source) {
        let target = fs.read_link(source)?;
        return fs.symlink(&target, destination);
    }

    if fs.is_dir(source) {
        if destination.starts_with(source) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot copy '{source}' into itself"),
            ));
        }
        fs.create_dir_all(destination)?;
        for name in fs.read_dir(source)? {
            copy_tree(fs, &source.join(&name), &destination.join(&name))?;
        }
        return Ok(());
    }

    let data = fs.read(source)?;
    fs.write(destination, &data)?;
    let info = fs.stat(source)?;
    fs.set_permissions(destination, info.permissions)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        path.is_dir()
    }

    fn is_symlink(&self, path: &Utf8Path) -> bool {
        path.is_symlink()
    }

    fn read_dir(&self, path: &Utf8Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in path.read_dir_utf8()? {
            names.push(entry?.file_name().to_owned());
        }
        names.sort();
        Ok(names)
    }

    fn remove(&self, path: &Utf8Path) -> io::Result<()> {
        let meta = std::fs::symlink_metadata(path)?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }

    #[cfg(unix)]
    fn symlink(&self, destination: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
        std::os::unix::fs::symlink(destination, link)
    }

    #[cfg(not(unix))]
    fn symlink(&self, _: &Utf8Path, _: &Utf8Path) -> io::Result<()> {
        Err(io::Error::new(ErrorKind::Unsupported, "symlinks are not supported on this platform"))
    }

    fn read_link(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf> {
        path.read_link_utf8()
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &Utf8Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_permissions(&self, path: &Utf8Path, mode: u32) -> io::Result<()> {
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_readonly(mode & 0o222 == 0);
        std::fs::set_permissions(path, permissions)
    }

    fn stat(&self, path: &Utf8Path) -> io::Result<FileInfo> {
        let meta = std::fs::symlink_metadata(path)?;
        let kind = if meta.file_type().is_symlink() {
            FileKind::Symlink
        } else if meta.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };

        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|duration| duration.as_nanos())
            .unwrap_or_default();

        #[cfg(unix)]
        let (inode, device, permissions) = {
            use std::os::unix::fs::MetadataExt;
            (meta.ino(), meta.dev(), meta.mode() & 0o7777)
        };

        #[cfg(not(unix))]
        let (inode, device, permissions) = (0, 0, if meta.permissions().readonly() { 0o444 } else { 0o644 });

        Ok(FileInfo {
            kind,
            size: meta.len(),
            modified_nanos,
            inode,
            device,
            permissions,
        })
    }
}

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mode: u32 },
    Directory,
    Symlink(Utf8PathBuf),
}

#[derive(Debug, Clone)]
struct Stamped {
    entry: Entry,
    stamp: u128,
    inode: u64,
}

#[derive(Debug, Default)]
struct PseudoState {
    entries: BTreeMap<Utf8PathBuf, Stamped>,
    clock: u128,
    next_inode: u64,
}

impl PseudoState {
    fn tick(&mut self) -> u128 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, path: &Utf8Path, entry: Entry) {
        let stamp = self.tick();
        let inode = match self.entries.get(path) {
            Some(existing) => existing.inode,
            None => {
                self.next_inode += 1;
                self.next_inode
            }
        };

        self.entries.insert(path.to_owned(), Stamped { entry, stamp, inode });
        self.touch_parent(path);
    }

    fn touch_parent(&mut self, path: &Utf8Path) {
        if let Some(parent) = path.parent() {
            let stamp = self.tick();
            if let Some(parent) = self.entries.get_mut(parent) {
                parent.stamp = stamp;
            }
        }
    }

    fn ensure_parent(&self, path: &Utf8Path) -> io::Result<()> {
        match path.parent() {
            None => Ok(()),
            Some(parent) if parent.as_str().is_empty() || parent == "/" => Ok(()),
            Some(parent) => match self.entries.get(parent).map(|e| &e.entry) {
                Some(Entry::Directory) => Ok(()),
                Some(_) => Err(io::Error::new(ErrorKind::Other, format!("not a directory: {parent}"))),
                None => Err(io::Error::new(ErrorKind::NotFound, format!("no such directory: {parent}"))),
            },
        }
    }
}

/// In-memory filesystem with deterministic modification stamps.
///
/// Every mutation advances a logical clock, and a directory's stamp moves
/// whenever one of its direct children is added, replaced or removed.
#[derive(Debug, Default)]
pub struct PseudoFs {
    state: Mutex<PseudoState>,
}

impl PseudoFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PseudoState> {
        // A poisoned lock only means another test thread panicked mid-write;
        // the map itself is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Convenience for tests: creates parents and writes the file.
    pub fn add_file(&self, path: impl AsRef<Utf8Path>, contents: impl AsRef<[u8]>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = self.create_dir_all(parent);
        }
        let mut state = self.lock();
        state.insert(
            path,
            Entry::File {
                data: contents.as_ref().to_vec(),
                mode: 0o644,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Utf8Path>) {
        let _ = self.create_dir_all(path.as_ref());
    }
}

impl FileSystem for PseudoFs {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        let state = self.lock();
        match state.entries.get(path).map(|e| &e.entry) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory) => Err(io::Error::new(ErrorKind::Other, format!("is a directory: {path}"))),
            Some(Entry::Symlink(target)) => {
                let target = resolve_link(path, target);
                drop(state);
                self.read(&target)
            }
            None => Err(io::Error::new(ErrorKind::NotFound, format!("no such file: {path}"))),
        }
    }

    fn write(&self, path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        state.ensure_parent(path)?;
        let mode = match state.entries.get(path).map(|e| &e.entry) {
            Some(Entry::Directory) => {
                return Err(io::Error::new(ErrorKind::Other, format!("is a directory: {path}")));
            }
            Some(Entry::File { mode, .. }) => *mode,
            _ => 0o644,
        };
        state.insert(
            path,
            Entry::File {
                data: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()> {
        let mut state = self.lock();
        let mut current = Utf8PathBuf::new();
        for component in path.components() {
            current.push(component);
            if current == "/" || current.as_str().is_empty() {
                continue;
            }
            match state.entries.get(&current).map(|e| &e.entry) {
                Some(Entry::Directory) => {}
                Some(_) => {
                    return Err(io::Error::new(ErrorKind::AlreadyExists, format!("not a directory: {current}")));
                }
                None => state.insert(&current, Entry::Directory),
            }
        }
        Ok(())
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.lock().entries.contains_key(path)
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        let state = self.lock();
        match state.entries.get(path).map(|e| &e.entry) {
            Some(Entry::Directory) => true,
            Some(Entry::Symlink(target)) => {
                let target = resolve_link(path, target);
                matches!(state.entries.get(&target).map(|e| &e.entry), Some(Entry::Directory))
            }
            _ => false,
        }
    }

    fn is_symlink(&self, path: &Utf8Path) -> bool {
        matches!(self.lock().entries.get(path).map(|e| &e.entry), Some(Entry::Symlink(_)))
    }

    fn read_dir(&self, path: &Utf8Path) -> io::Result<Vec<String>> {
        let state = self.lock();
        match state.entries.get(path).map(|e| &e.entry) {
            Some(Entry::Directory) => {}
            Some(_) => return Err(io::Error::new(ErrorKind::Other, format!("not a directory: {path}"))),
            None => return Err(io::Error::new(ErrorKind::NotFound, format!("no such directory: {path}"))),
        }

        // BTreeMap ordering keeps the listing sorted.
        Ok(state
            .entries
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .filter_map(|candidate| candidate.file_name().map(str::to_owned))
            .collect())
    }

    fn remove(&self, path: &Utf8Path) -> io::Result<()> {
        let mut state = self.lock();
        if !state.entries.contains_key(path) {
            return Err(io::Error::new(ErrorKind::NotFound, format!("no such file: {path}")));
        }
        state
            .entries
            .retain(|candidate, _| candidate != path && !candidate.starts_with(path));
        state.touch_parent(path);
        Ok(())
    }

    fn symlink(&self, destination: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
        let mut state = self.lock();
        state.ensure_parent(link)?;
        if state.entries.contains_key(link) {
            return Err(io::Error::new(ErrorKind::AlreadyExists, format!("file exists: {link}")));
        }
        state.insert(link, Entry::Symlink(destination.to_owned()));
        Ok(())
    }

    fn read_link(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf> {
        match self.lock().entries.get(path).map(|e| &e.entry) {
            Some(Entry::Symlink(target)) => Ok(target.clone()),
            _ => Err(io::Error::new(ErrorKind::InvalidInput, format!("not a symlink: {path}"))),
        }
    }

    fn set_permissions(&self, path: &Utf8Path, new_mode: u32) -> io::Result<()> {
        let mut state = self.lock();
        let stamp = state.tick();
        match state.entries.get_mut(path) {
            Some(Stamped {
                entry: Entry::File { mode, .. },
                stamp: entry_stamp,
                ..
            }) => {
                *mode = new_mode & 0o7777;
                *entry_stamp = stamp;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(io::Error::new(ErrorKind::NotFound, format!("no such file: {path}"))),
        }
    }

    fn stat(&self, path: &Utf8Path) -> io::Result<FileInfo> {
        let state = self.lock();
        let stamped = state
            .entries
            .get(path)
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("no such file: {path}")))?;

        let (kind, size, permissions) = match &stamped.entry {
            Entry::File { data, mode } => (FileKind::File, data.len() as u64, *mode),
            Entry::Directory => (FileKind::Directory, 0, 0o755),
            Entry::Symlink(target) => (FileKind::Symlink, target.as_str().len() as u64, 0o755),
        };

        Ok(FileInfo {
            kind,
            size,
            modified_nanos: stamped.stamp,
            inode: stamped.inode,
            device: 1,
            permissions,
        })
    }
}

fn resolve_link(link: &Utf8Path, target: &Utf8Path) -> Utf8PathBuf {
    if target.is_absolute() {
        target.to_owned()
    } else {
        link.parent()
            .map(|parent| parent.join(target))
            .unwrap_or_else(|| target.to_owned())
    }
}
