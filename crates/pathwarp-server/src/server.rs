//! Control daemon.
//!
//! Serves the control protocol on a local stream socket. Each connection
//! is checked once against the peer's credentials, then carries any
//! number of request/reply frames until the client hangs up.
//!
//! ```text
//! client ──frame──▶ read header ─▶ read body ─▶ decode ─▶ Controller
//!    ▲                                                        │
//!    └──────────────────────frame◀── encode ◀─────────────────┘
//! ```

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use pathwarp_engine::{Controller, Credentials, Engine};
use pathwarp_types::{
    ControlError, ControlRequest, ControlResult, decode_body, encode_frame, frame_body_len,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::constants::SOCKET_MODE;
use crate::error::{ServerError, ServerResult};
use crate::state::StateFile;

/// Whether `uid` may talk to the daemon at all.
pub fn peer_allowed(uid: u32, admin_uid: u32) -> bool {
    uid == 0 || uid == admin_uid
}

/// The control daemon for one engine.
#[derive(Debug)]
pub struct ControlServer {
    config: ServerConfig,
    controller: Controller,
    state: Option<StateFile>,
}

impl ControlServer {
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        let state = config.state_file.clone().map(StateFile::new);
        Self {
            config,
            controller: Controller::new(engine),
            state,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Apply the persisted enable switch, if one was stored.
    pub fn restore_state(&self) -> ServerResult<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        match state.load()? {
            Some(true) => {
                info!(path = %state.path().display(), "restoring enabled state");
                self.controller.engine().enable();
            }
            Some(false) => self.controller.engine().disable(),
            None => {}
        }
        Ok(())
    }

    /// Bind the control socket, replacing a stale one, and restrict it to
    /// its owner.
    pub fn bind(&self) -> ServerResult<UnixListener> {
        let path = &self.config.socket_path;
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
        info!(path = %path.display(), "control socket listening");
        Ok(listener)
    }

    /// Restore state, bind, and serve until the listener fails.
    pub async fn run(self) -> ServerResult<()> {
        self.restore_state()?;
        let listener = self.bind()?;
        Arc::new(self).serve(listener).await
    }

    /// Accept connections on `listener` forever.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) -> ServerResult<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!(error = %e, "control connection ended");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: UnixStream) -> ServerResult<()> {
        let uid = stream.peer_cred()?.uid();
        if !peer_allowed(uid, self.config.admin_uid) {
            warn!(uid, "rejecting control peer");
            return Err(ServerError::PeerRejected(uid));
        }
        let creds = Credentials::for_uid(uid, self.config.admin_uid);

        loop {
            let mut header = [0u8; 4];
            match stream.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            let len = frame_body_len(header)?;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;

            let result = match decode_body::<ControlRequest>(&body) {
                Ok(request) => {
                    let server = Arc::clone(&self);
                    tokio::task::spawn_blocking(move || server.dispatch(&creds, request))
                        .await
                        .unwrap_or_else(|e| Err(ControlError::Io(e.to_string())))
                }
                Err(e) => Err(ControlError::Malformed(e.to_string())),
            };

            let frame = match encode_frame(&result) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "reply does not fit in a frame");
                    let fallback: ControlResult = Err(ControlError::OutOfMemory);
                    encode_frame(&fallback)?
                }
            };
            stream.write_all(&frame).await?;
        }
    }

    /// Run one request and persist the switch when it changes.
    pub fn dispatch(&self, creds: &Credentials, request: ControlRequest) -> ControlResult {
        let command = request.name();
        let persist = match request {
            ControlRequest::Enable => Some(true),
            ControlRequest::Disable => Some(false),
            _ => None,
        };

        let result = self.controller.handle(creds, request);
        match &result {
            Ok(_) => debug!(uid = creds.uid, command, "ok"),
            Err(e) => debug!(uid = creds.uid, command, error = %e, "failed"),
        }

        if let (Ok(_), Some(enabled), Some(state)) = (&result, persist, &self.state) {
            if let Err(e) = state.store(enabled) {
                warn!(path = %state.path().display(), error = %e, "cannot persist state");
            }
        }
        result
    }
}
