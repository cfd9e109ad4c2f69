//! Control-channel wire protocol.
//!
//! Each message travels as one frame: a little-endian `u32` body length
//! followed by the `postcard` encoding of a [`ControlRequest`] or a
//! [`ControlResult`]. One request, one reply.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Version reported by `GetVersion`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on the serialized rule listing.
pub const MAX_LIST_BYTES: usize = 64 * 1024;

/// Upper bound on one frame body. Large enough for a full listing.
pub const MAX_FRAME_LEN: usize = MAX_LIST_BYTES + 4096;

/// One administrative command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    AddRule {
        virtual_path: String,
        real_path: String,
        flags: u32,
    },
    DelRule {
        virtual_path: String,
    },
    ClearAll,
    AddUid(u32),
    DelUid(u32),
    ListRules,
    Enable,
    Disable,
    Refresh,
    GetStatus,
    GetVersion,
}

impl ControlRequest {
    /// Whether the command may be issued without elevated privilege.
    pub fn is_unprivileged(&self) -> bool {
        matches!(self, ControlRequest::GetVersion)
    }

    /// Short command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::AddRule { .. } => "add_rule",
            ControlRequest::DelRule { .. } => "del_rule",
            ControlRequest::ClearAll => "clear_all",
            ControlRequest::AddUid(_) => "add_uid",
            ControlRequest::DelUid(_) => "del_uid",
            ControlRequest::ListRules => "list_rules",
            ControlRequest::Enable => "enable",
            ControlRequest::Disable => "disable",
            ControlRequest::Refresh => "refresh",
            ControlRequest::GetStatus => "get_status",
            ControlRequest::GetVersion => "get_version",
        }
    }
}

/// Successful reply to a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    Done,
    Version(u32),
    /// 1 when the engine is enabled, 0 otherwise.
    Status(u32),
    /// Newline-separated `real->virtual` records. `truncated` is set when
    /// the listing hit [`MAX_LIST_BYTES`] and is therefore incomplete.
    Listing { text: String, truncated: bool },
}

/// Administrative failures, each distinguishable by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ControlError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// What the daemon sends back for every request.
pub type ControlResult = Result<ControlResponse, ControlError>;

/// Frame encoding/decoding failure.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Serialize `msg` into a length-prefixed frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    let body = postcard::to_stdvec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Body length announced by a frame header.
pub fn frame_body_len(header: [u8; 4]) -> Result<usize, FrameError> {
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}

/// Deserialize a frame body read separately from its header.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    Ok(postcard::from_bytes(body)?)
}
