//! Host filesystem seam.
//!
//! Everything the engine needs from the filesystem underneath it goes
//! through [`HostFs`]: resolving a path to its identity, naming an open
//! directory, and dropping cached resolution state. The engine always
//! calls these with its recursion guard held.

use std::io;

use pathwarp_types::FileIdentity;

#[cfg(unix)]
mod local;
#[cfg(any(test, feature = "test-mock"))]
mod memory;

#[cfg(unix)]
pub use local::LocalHost;
#[cfg(any(test, feature = "test-mock"))]
pub use memory::MemoryHost;

/// The directory a relative name is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirHandle {
    /// The caller's working directory.
    Cwd,
    /// An open directory descriptor.
    Fd(i32),
}

/// Filesystem operations the engine performs on its own behalf.
pub trait HostFs: Send + Sync {
    // ========================================================================
    // Resolution
    // ========================================================================

    /// Identity of the object at `path`, following symlinks.
    fn identity(&self, path: &str) -> io::Result<FileIdentity>;

    /// Whether anything exists at `path`.
    fn exists(&self, path: &str) -> bool {
        self.identity(path).is_ok()
    }

    /// Absolute path of a directory handle.
    fn directory_path(&self, dir: DirHandle) -> io::Result<String>;

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Drop any cached resolution for `path`. Fails with `NotFound` when
    /// nothing is cached for it.
    fn invalidate(&self, path: &str) -> io::Result<()>;
}
