//! Control client.

use std::path::Path;

use pathwarp_types::{
    ControlRequest, ControlResponse, ControlResult, RuleRecord, decode_body, encode_frame,
    frame_body_len,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::{ServerError, ServerResult};

/// One connection to the control daemon.
#[derive(Debug)]
pub struct ControlClient {
    stream: UnixStream,
}

fn unexpected(response: ControlResponse) -> ServerError {
    ServerError::UnexpectedResponse(format!("{:?}", response))
}

impl ControlClient {
    pub async fn connect(path: impl AsRef<Path>) -> ServerResult<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Send one request and wait for its reply.
    pub async fn request(&mut self, request: &ControlRequest) -> ServerResult<ControlResponse> {
        let frame = encode_frame(request)?;
        self.stream.write_all(&frame).await?;

        let mut header = [0u8; 4];
        match self.stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ServerError::Closed);
            }
            Err(e) => return Err(e.into()),
        }
        let mut body = vec![0u8; frame_body_len(header)?];
        self.stream.read_exact(&mut body).await?;

        let result: ControlResult = decode_body(&body)?;
        Ok(result?)
    }

    async fn expect_done(&mut self, request: ControlRequest) -> ServerResult<()> {
        match self.request(&request).await? {
            ControlResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn add_rule(&mut self, virtual_path: &str, real_path: &str, flags: u32) -> ServerResult<()> {
        self.expect_done(ControlRequest::AddRule {
            virtual_path: virtual_path.to_string(),
            real_path: real_path.to_string(),
            flags,
        })
        .await
    }

    pub async fn del_rule(&mut self, virtual_path: &str) -> ServerResult<()> {
        self.expect_done(ControlRequest::DelRule {
            virtual_path: virtual_path.to_string(),
        })
        .await
    }

    pub async fn clear(&mut self) -> ServerResult<()> {
        self.expect_done(ControlRequest::ClearAll).await
    }

    pub async fn block_uid(&mut self, uid: u32) -> ServerResult<()> {
        self.expect_done(ControlRequest::AddUid(uid)).await
    }

    pub async fn unblock_uid(&mut self, uid: u32) -> ServerResult<()> {
        self.expect_done(ControlRequest::DelUid(uid)).await
    }

    pub async fn enable(&mut self) -> ServerResult<()> {
        self.expect_done(ControlRequest::Enable).await
    }

    pub async fn disable(&mut self) -> ServerResult<()> {
        self.expect_done(ControlRequest::Disable).await
    }

    pub async fn refresh(&mut self) -> ServerResult<()> {
        self.expect_done(ControlRequest::Refresh).await
    }

    /// Registered rules in registration order, and whether the daemon
    /// cut the listing short.
    pub async fn list(&mut self) -> ServerResult<(Vec<RuleRecord>, bool)> {
        match self.request(&ControlRequest::ListRules).await? {
            ControlResponse::Listing { text, truncated } => {
                Ok((RuleRecord::parse_listing(&text), truncated))
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&mut self) -> ServerResult<bool> {
        match self.request(&ControlRequest::GetStatus).await? {
            ControlResponse::Status(s) => Ok(s != 0),
            other => Err(unexpected(other)),
        }
    }

    pub async fn version(&mut self) -> ServerResult<u32> {
        match self.request(&ControlRequest::GetVersion).await? {
            ControlResponse::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }
}
