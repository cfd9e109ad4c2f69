//! In-memory host for tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use pathwarp_types::FileIdentity;

use super::{DirHandle, HostFs};

const MEMORY_DEV: u64 = 0x4d;

/// A path → identity map with a working directory, open descriptors, and
/// an invalidation log.
#[derive(Debug)]
pub struct MemoryHost {
    entries: RwLock<HashMap<String, FileIdentity>>,
    cwd: RwLock<String>,
    fds: RwLock<HashMap<i32, String>>,
    invalidated: Mutex<Vec<String>>,
    failing: RwLock<HashSet<String>>,
    next_ino: AtomicU64,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// A host containing only `/`.
    pub fn new() -> Self {
        let host = Self {
            entries: RwLock::new(HashMap::new()),
            cwd: RwLock::new("/".to_string()),
            fds: RwLock::new(HashMap::new()),
            invalidated: Mutex::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
            next_ino: AtomicU64::new(2),
        };
        host.entries
            .write()
            .insert("/".to_string(), FileIdentity::new(MEMORY_DEV, 1));
        host
    }

    /// Create `path` and any missing ancestors. Returns its identity.
    pub fn add(&self, path: &str) -> FileIdentity {
        let mut entries = self.entries.write();
        let mut prefix = String::new();
        let mut identity = FileIdentity::new(MEMORY_DEV, 1);
        for component in path.split('/').filter(|c| !c.is_empty()) {
            prefix.push('/');
            prefix.push_str(component);
            identity = *entries.entry(prefix.clone()).or_insert_with(|| {
                FileIdentity::new(MEMORY_DEV, self.next_ino.fetch_add(1, Ordering::Relaxed))
            });
        }
        identity
    }

    /// Remove `path` and everything below it.
    pub fn remove(&self, path: &str) {
        let below = format!("{}/", path);
        self.entries
            .write()
            .retain(|p, _| p != path && !p.starts_with(&below));
    }

    pub fn set_cwd(&self, path: &str) {
        *self.cwd.write() = path.to_string();
    }

    /// Register `fd` as an open handle on `path`.
    pub fn open_dir(&self, fd: i32, path: &str) {
        self.fds.write().insert(fd, path.to_string());
    }

    /// Make `invalidate` fail for `path` with a permission error.
    pub fn fail_invalidate(&self, path: &str) {
        self.failing.write().insert(path.to_string());
    }

    /// Paths successfully invalidated so far, in call order.
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().clone()
    }
}

impl HostFs for MemoryHost {
    fn identity(&self, path: &str) -> io::Result<FileIdentity> {
        self.entries
            .read()
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn directory_path(&self, dir: DirHandle) -> io::Result<String> {
        match dir {
            DirHandle::Cwd => Ok(self.cwd.read().clone()),
            DirHandle::Fd(fd) => self.fds.read().get(&fd).cloned().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("bad descriptor {}", fd))
            }),
        }
    }

    fn invalidate(&self, path: &str) -> io::Result<()> {
        if self.failing.read().contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, path.to_string()));
        }
        self.identity(path)?;
        self.invalidated.lock().push(path.to_string());
        Ok(())
    }
}
