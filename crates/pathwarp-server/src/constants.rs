//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Default control socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/dev/pathwarp.sock";

/// Control socket permissions: owner read/write only.
pub const SOCKET_MODE: u32 = 0o600;

/// Uid allowed on the control socket besides root.
pub const DEFAULT_ADMIN_UID: u32 = 0;

/// Where the enable switch is persisted across daemon restarts.
pub const DEFAULT_STATE_FILE: &str = "/data/adb/pathwarp/enabled";

/// Default engine configuration file, read if present.
pub const DEFAULT_ENGINE_CONFIG: &str = "/data/adb/pathwarp/engine.toml";
