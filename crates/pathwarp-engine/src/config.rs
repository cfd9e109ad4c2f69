//! Engine configuration.
//!
//! Every field has a default matching a stock Android layout, so an empty
//! TOML document (or no file at all) yields a working engine.
//!
//! ```toml
//! alias_root = "/system"
//! filter_bits = 20
//! start_enabled = true
//!
//! [[labels]]
//! prefix = "/vendor"
//! label = "u:object_r:vendor_file:s0"
//! ```

use std::path::Path;

use pathwarp_types::MAX_LIST_BYTES;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::filter::{MAX_FILTER_BITS, MIN_FILTER_BITS};

/// Read-only compressed image filesystem magic.
pub const EROFS_SUPER_MAGIC: u64 = 0xE0F5_E1E2;

/// Maps a virtual-path prefix to a security label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRule {
    pub prefix: String,
    pub label: String,
}

impl LabelRule {
    fn new(prefix: &str, label: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            label: label.to_string(),
        }
    }
}

/// Tunables for one [`Engine`](crate::Engine) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root that is mounted a second time at `/`; stripped during
    /// normalization.
    pub alias_root: String,
    /// log2 of the membership filter size in bits.
    pub filter_bits: u8,
    /// Byte bound on the rule listing.
    pub list_limit: usize,
    /// Caller names starting with any of these always bypass the engine.
    pub critical_prefixes: Vec<String>,
    /// Redirected paths under these prefixes report `spoofed_fs_type`.
    pub system_prefixes: Vec<String>,
    pub spoofed_fs_type: u64,
    /// The only extended attribute the label spoofer answers.
    pub label_attribute: String,
    /// First matching prefix wins.
    pub labels: Vec<LabelRule>,
    /// Label for any rooted path no entry in `labels` matches.
    pub fallback_label: String,
    /// Directories callers may traverse (execute-only) to reach a
    /// redirection target.
    pub traversal_roots: Vec<String>,
    pub start_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alias_root: "/system".to_string(),
            filter_bits: 20,
            list_limit: MAX_LIST_BYTES,
            critical_prefixes: vec!["ini".into(), "uev".into(), "vol".into()],
            system_prefixes: vec![
                "/system".into(),
                "/vendor".into(),
                "/product".into(),
                "/odm".into(),
            ],
            spoofed_fs_type: EROFS_SUPER_MAGIC,
            label_attribute: "security.selinux".to_string(),
            labels: vec![
                LabelRule::new("/lib64", "u:object_r:system_lib_file:s0"),
                LabelRule::new("/lib", "u:object_r:system_lib_file:s0"),
                LabelRule::new("/bin", "u:object_r:system_file:s0"),
                LabelRule::new("/fonts", "u:object_r:system_file:s0"),
                LabelRule::new("/framework", "u:object_r:system_file:s0"),
                LabelRule::new("/etc", "u:object_r:system_file:s0"),
                LabelRule::new("/vendor", "u:object_r:vendor_file:s0"),
                LabelRule::new("/product", "u:object_r:system_file:s0"),
            ],
            fallback_label: "u:object_r:system_file:s0".to_string(),
            traversal_roots: vec!["/data/adb".into(), "/data/adb/modules".into()],
            start_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        Ok(config.bounded())
    }

    /// This config with sizes pulled into the ranges the engine supports:
    /// the filter between its minimum and maximum size, and the listing no
    /// larger than one control frame can carry.
    pub fn bounded(mut self) -> Self {
        self.filter_bits = self.filter_bits.clamp(MIN_FILTER_BITS, MAX_FILTER_BITS);
        self.list_limit = self.list_limit.min(MAX_LIST_BYTES);
        self
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
