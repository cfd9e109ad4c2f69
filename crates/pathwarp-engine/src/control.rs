//! Administrative control surface.
//!
//! Maps one [`ControlRequest`] onto the engine and reports the outcome as a
//! [`ControlResult`]. The privilege check happens here, before any engine
//! state is touched.

use std::sync::Arc;

use pathwarp_types::{ControlError, ControlRequest, ControlResponse, ControlResult, Uid};
use tracing::debug;

use crate::engine::Engine;

/// Who is issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Uid,
    pub privileged: bool,
}

impl Credentials {
    /// Root and `admin_uid` are privileged.
    pub fn for_uid(uid: Uid, admin_uid: Uid) -> Self {
        Self {
            uid,
            privileged: uid == 0 || uid == admin_uid,
        }
    }
}

/// Executes control requests against one engine.
#[derive(Debug, Clone)]
pub struct Controller {
    engine: Arc<Engine>,
}

impl Controller {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn handle(&self, creds: &Credentials, request: ControlRequest) -> ControlResult {
        if !request.is_unprivileged() && !creds.privileged {
            debug!(uid = creds.uid, command = request.name(), "rejected unprivileged request");
            return Err(ControlError::PermissionDenied);
        }

        let engine = &self.engine;
        match request {
            ControlRequest::AddRule {
                virtual_path,
                real_path,
                flags,
            } => engine.add_rule(&virtual_path, &real_path, flags)?,
            ControlRequest::DelRule { virtual_path } => engine.remove_rule(&virtual_path)?,
            ControlRequest::ClearAll => engine.clear(),
            ControlRequest::AddUid(uid) => engine.block_uid(uid)?,
            ControlRequest::DelUid(uid) => engine.unblock_uid(uid)?,
            ControlRequest::ListRules => {
                let listing = engine.list();
                return Ok(ControlResponse::Listing {
                    text: listing.text,
                    truncated: listing.truncated,
                });
            }
            ControlRequest::Enable => engine.enable(),
            ControlRequest::Disable => engine.disable(),
            ControlRequest::Refresh => {
                engine.refresh();
            }
            ControlRequest::GetStatus => return Ok(ControlResponse::Status(engine.status())),
            ControlRequest::GetVersion => return Ok(ControlResponse::Version(engine.version())),
        }
        Ok(ControlResponse::Done)
    }
}
