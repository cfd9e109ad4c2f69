//! Server error types.

use std::io;

use pathwarp_engine::EngineError;
use pathwarp_types::{ControlError, FrameError};
use thiserror::Error;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error on the socket or the state file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Engine setup failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The daemon answered with an error.
    #[error("request failed: {0}")]
    Control(#[from] ControlError),

    /// The peer's uid may not use the control socket.
    #[error("peer uid {0} not allowed")]
    PeerRejected(u32),

    /// The daemon answered with a response of the wrong kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Connection closed before a reply arrived.
    #[error("connection closed")]
    Closed,
}

/// Server result type.
pub type ServerResult<T> = Result<T, ServerError>;
