//! Metadata spoofers: filesystem type and security label.

use thiserror::Error;

use crate::config::{EngineConfig, LabelRule};
use crate::path::has_component_prefix;

/// Why a label request was not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LabelError {
    /// Not an attribute or object this engine labels; pass through.
    #[error("not applicable")]
    NotApplicable,

    /// The caller's buffer is too small for the label.
    #[error("buffer too small, need {0} bytes")]
    Range(usize),
}

/// Reports a fixed filesystem type for redirected system-area paths.
#[derive(Debug, Clone)]
pub struct FsTypeSpoofer {
    prefixes: Vec<String>,
    fs_type: u64,
}

impl FsTypeSpoofer {
    pub fn new(prefixes: Vec<String>, fs_type: u64) -> Self {
        Self { prefixes, fs_type }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.system_prefixes.clone(), config.spoofed_fs_type)
    }

    pub fn fs_type(&self) -> u64 {
        self.fs_type
    }

    /// Whether either spelling of a redirected path lies in a system area.
    /// The raw path matters because canonicalization strips the alias root.
    pub fn applies(&self, raw: &str, canonical: &str) -> bool {
        self.prefixes
            .iter()
            .any(|p| has_component_prefix(raw, p) || has_component_prefix(canonical, p))
    }
}

/// Ordered prefix → label table with a rooted fallback.
#[derive(Debug, Clone)]
pub struct LabelTable {
    attribute: String,
    rules: Vec<LabelRule>,
    fallback: String,
}

impl LabelTable {
    pub fn new(attribute: impl Into<String>, rules: Vec<LabelRule>, fallback: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            rules,
            fallback: fallback.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.label_attribute.clone(),
            config.labels.clone(),
            config.fallback_label.clone(),
        )
    }

    /// Whether `name` is the one attribute this table answers.
    pub fn answers(&self, name: &str) -> bool {
        name == self.attribute
    }

    /// Label for a virtual path. First matching prefix wins; any other
    /// absolute path gets the fallback.
    pub fn label_for(&self, virtual_path: &str) -> Option<&str> {
        if !virtual_path.starts_with('/') {
            return None;
        }
        let label = self
            .rules
            .iter()
            .find(|r| has_component_prefix(virtual_path, &r.prefix))
            .map_or(self.fallback.as_str(), |r| r.label.as_str());
        Some(label)
    }
}

/// Copy `label` and a NUL terminator into `buf`.
///
/// An empty `buf` is a size query and returns the length needed.
pub fn copy_label(label: &str, buf: &mut [u8]) -> Result<usize, LabelError> {
    let needed = label.len() + 1;
    if buf.is_empty() {
        return Ok(needed);
    }
    if buf.len() < needed {
        return Err(LabelError::Range(needed));
    }
    buf[..label.len()].copy_from_slice(label.as_bytes());
    buf[label.len()] = 0;
    Ok(needed)
}
