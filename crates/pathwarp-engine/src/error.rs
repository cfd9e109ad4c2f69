//! Engine error types.
//!
//! Only the administrative side ever produces these. Interception hooks
//! absorb every failure and fall back to pass-through.

use std::io;

use pathwarp_types::ControlError;
use thiserror::Error;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An active rule already covers this virtual path, or the identity is
    /// already blocked.
    #[error("already exists: {0}")]
    Duplicate(String),

    /// No rule or blocked identity matched.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path is empty, relative, or exceeds the length limits.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A working buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Create a Duplicate error.
    pub fn duplicate(what: impl Into<String>) -> Self {
        Self::Duplicate(what.into())
    }

    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }
}

impl From<std::collections::TryReserveError> for EngineError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Map to the wire-level error reported to the controller.
impl From<EngineError> for ControlError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Duplicate(msg) => ControlError::Duplicate(msg),
            EngineError::NotFound(msg) => ControlError::NotFound(msg),
            EngineError::InvalidPath(msg) => ControlError::InvalidPath(msg),
            EngineError::OutOfMemory => ControlError::OutOfMemory,
            EngineError::Config(e) => ControlError::Malformed(e.to_string()),
            EngineError::Io(e) => ControlError::Io(e.to_string()),
        }
    }
}

/// Engine result type.
pub type EngineResult<T> = Result<T, EngineError>;
