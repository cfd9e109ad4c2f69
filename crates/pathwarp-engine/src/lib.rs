//! # pathwarp-engine
//!
//! Path redirection and virtual directory injection.
//!
//! An [`Engine`] owns every piece of redirection state for a process and
//! exposes two surfaces:
//!
//! - **Hooks**, called in-line from path resolution on arbitrary threads:
//!   [`Engine::resolve_path`], [`Engine::substitute_path`],
//!   [`Engine::build_absolute_path`], [`Engine::inject_entries`],
//!   [`Engine::virtual_path_for`], [`Engine::is_traversal_allowed`],
//!   [`Engine::spoof_fs_type`], [`Engine::spoof_label`]. They never fail;
//!   when the engine cannot help, the caller's original operation proceeds
//!   untouched.
//! - **Administration**, driven by a trusted controller through
//!   [`Controller`]: add and remove rules, block uids, switch the engine
//!   on and off, refresh, list.
//!
//! Lookups never wait on administration: tables are published as
//! snapshots (see [`snapshot`]) and retired ones are freed only after
//! their last reader lets go.

pub mod config;
pub mod control;
pub mod dirent;
pub mod engine;
pub mod error;
pub mod filter;
pub mod gate;
pub mod host;
pub mod inject;
pub mod path;
pub mod rules;
pub mod snapshot;
pub mod spoof;

pub use config::{EROFS_SUPER_MAGIC, EngineConfig, LabelRule};
pub use control::{Controller, Credentials};
pub use dirent::{Dirent, DirentBuffer, DirentLayout, DirentSink};
pub use engine::{Engine, OpenDir, RefreshReport};
pub use error::{EngineError, EngineResult};
pub use filter::MembershipFilter;
pub use gate::{Access, Caller};
pub use host::{DirHandle, HostFs};
pub use inject::LISTING_CURSOR_BASE;
pub use path::Normalizer;
pub use rules::{Listing, Rule, RuleStore};
pub use spoof::LabelError;

#[cfg(unix)]
pub use host::LocalHost;
#[cfg(any(test, feature = "test-mock"))]
pub use host::MemoryHost;
