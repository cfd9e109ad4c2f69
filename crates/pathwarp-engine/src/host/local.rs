//! Host backed by the running system.

use std::io;

use pathwarp_types::FileIdentity;

use super::{DirHandle, HostFs};

/// Resolves against the real filesystem of this process.
///
/// User space has no handle on the kernel's name cache, so `invalidate`
/// re-resolves the path: a fresh lookup replaces whatever was cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

fn into_string(path: std::path::PathBuf) -> io::Result<String> {
    path.into_os_string()
        .into_string()
        .map_err(|p| io::Error::new(io::ErrorKind::InvalidData, format!("non-UTF-8 path: {:?}", p)))
}

impl HostFs for LocalHost {
    #[allow(clippy::unnecessary_cast)]
    fn identity(&self, path: &str) -> io::Result<FileIdentity> {
        let stat = rustix::fs::stat(path)?;
        Ok(FileIdentity::new(stat.st_dev as u64, stat.st_ino as u64))
    }

    fn directory_path(&self, dir: DirHandle) -> io::Result<String> {
        match dir {
            DirHandle::Cwd => into_string(std::env::current_dir()?),
            DirHandle::Fd(fd) if fd >= 0 => {
                into_string(std::fs::read_link(format!("/proc/self/fd/{}", fd))?)
            }
            DirHandle::Fd(fd) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad descriptor {}", fd),
            )),
        }
    }

    fn invalidate(&self, path: &str) -> io::Result<()> {
        rustix::fs::stat(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_identity_of_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("target");
        std::fs::write(&file, b"x").unwrap();

        let host = LocalHost::new();
        let id = host.identity(file.to_str().unwrap()).unwrap();
        assert!(id.is_valid());
        assert_eq!(id, host.identity(file.to_str().unwrap()).unwrap());
        assert!(host.exists(dir.path().to_str().unwrap()));
    }

    #[test]
    fn test_missing_path() {
        let host = LocalHost::new();
        let err = host.identity("/definitely/not/here/pathwarp").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(host.invalidate("/definitely/not/here/pathwarp").is_err());
    }

    #[test]
    fn test_directory_path_from_fd() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let handle = std::fs::File::open(&canonical).unwrap();

        let host = LocalHost::new();
        let resolved = host.directory_path(DirHandle::Fd(handle.as_raw_fd())).unwrap();
        assert_eq!(resolved, canonical.to_str().unwrap());
        assert!(host.directory_path(DirHandle::Fd(-1)).is_err());
        assert!(host.directory_path(DirHandle::Cwd).unwrap().starts_with('/'));
    }
}
