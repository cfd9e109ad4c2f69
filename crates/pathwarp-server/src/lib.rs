//! pathwarp server library
//!
//! Control daemon and client for the redirection engine.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod server;
pub mod state;

pub use client::ControlClient;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::ControlServer;
pub use state::StateFile;
