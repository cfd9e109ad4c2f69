//! Daemon configuration.

use std::path::{Path, PathBuf};

use pathwarp_engine::EngineConfig;

use crate::constants::{
    DEFAULT_ADMIN_UID, DEFAULT_ENGINE_CONFIG, DEFAULT_SOCKET_PATH, DEFAULT_STATE_FILE,
};
use crate::error::ServerResult;

/// Where the daemon listens and what it persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Uid allowed on the socket besides root.
    pub admin_uid: u32,
    /// Persists the enable switch when set.
    pub state_file: Option<PathBuf>,
    /// Engine TOML; defaults apply when unset or missing.
    pub engine_config: Option<PathBuf>,
}

impl ServerConfig {
    /// Standard on-device locations.
    pub fn production() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            admin_uid: DEFAULT_ADMIN_UID,
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            engine_config: Some(PathBuf::from(DEFAULT_ENGINE_CONFIG)),
        }
    }

    /// Everything under `dir`, administered by `admin_uid` (for testing).
    pub fn ephemeral(dir: &Path, admin_uid: u32) -> Self {
        Self {
            socket_path: dir.join("pathwarp.sock"),
            admin_uid,
            state_file: Some(dir.join("enabled")),
            engine_config: None,
        }
    }

    /// Engine configuration from `engine_config`, or defaults if the file
    /// is unset or absent.
    pub fn load_engine_config(&self) -> ServerResult<EngineConfig> {
        match &self.engine_config {
            Some(path) if path.exists() => Ok(EngineConfig::load(path)?),
            _ => Ok(EngineConfig::default()),
        }
    }
}
