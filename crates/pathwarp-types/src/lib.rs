//! Shared types for pathwarp.
//!
//! Leaf crate with no internal dependencies: file identities, rule flags,
//! directory entry kinds, and the control-channel wire protocol spoken
//! between the daemon and its clients.
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------|
//! | Type               | Purpose                                     |
//! |--------------------|---------------------------------------------|
//! | [`FileIdentity`]   | (device, inode) of a backing object         |
//! | [`RuleFlags`]      | Flag bits carried by a redirection rule     |
//! | [`EntryKind`]      | Directory or regular synthetic entry        |
//! | [`ControlRequest`] | One administrative command                  |
//! | [`ControlResponse`]| The daemon's answer to a command            |
//! | [`ControlError`]   | Distinguishable administrative failures     |
//! |--------------------|---------------------------------------------|

pub mod identity;
pub mod protocol;
pub mod rule;

pub use identity::{FileIdentity, Uid};
pub use protocol::{
    ControlError, ControlRequest, ControlResponse, ControlResult, FrameError, MAX_FRAME_LEN,
    MAX_LIST_BYTES, PROTOCOL_VERSION, decode_body, encode_frame, frame_body_len,
};
pub use rule::{EntryKind, RuleFlags, RuleRecord};
