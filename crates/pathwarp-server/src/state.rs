//! Persisted enable switch.
//!
//! The file holds `1` or `0`. Writes go to a sibling temp file first and
//! are renamed into place.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored switch, or `None` when nothing was stored yet.
    pub fn load(&self) -> io::Result<Option<bool>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match text.trim() {
                "1" => Ok(Some(true)),
                "0" => Ok(Some(false)),
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad state {:?} in {}", other, self.path.display()),
                )),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn store(&self, enabled: bool) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, if enabled { "1\n" } else { "0\n" })?;
        std::fs::rename(&tmp, &self.path)
    }
}
