//! Relayed transport.
//!
//! A broker task performs the upstream request and republishes each frame as
//! a `RelayMessage`. The messages are serde-tagged JSON so the same protocol
//! can run over a real process boundary; in-process it rides a tokio mpsc
//! channel. A channel that closes before `done` is a dropped link.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::TransportMode;
use crate::error::{CoreResult, PaperStreamError};
use crate::frame::{Frame, RawFrame};
use crate::model::TurnRequest;
use crate::transport::{FrameSource, Transport, TurnCtx};

/// One message on the relay link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Upstream accepted the request; frames follow.
    Opened,
    Frame { data: String },
    Done,
    /// Upstream refused the request; nothing was streamed.
    Error(RelayError),
    /// Upstream link dropped mid-stream.
    Disconnected { reason: String },
}

impl RelayMessage {
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| PaperStreamError::Other(e.into()))
    }

    pub fn from_json(s: &str) -> CoreResult<Self> {
        serde_json::from_str(s).map_err(|e| PaperStreamError::Other(e.into()))
    }
}

/// Open failure carried across the relay with enough detail to rebuild the
/// same `PaperStreamError` variant on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayError {
    #[serde(default = "default_error_kind")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn default_error_kind() -> String {
    "transport".into()
}

impl From<&PaperStreamError> for RelayError {
    fn from(e: &PaperStreamError) -> Self {
        let mut out = RelayError {
            kind: e.kind().to_string(),
            message: e.to_string(),
            status: None,
            retry_after: None,
            code: None,
        };
        match e {
            PaperStreamError::Validation(m) => out.message = m.clone(),
            PaperStreamError::Transport { message } | PaperStreamError::Backend { message } => {
                out.message = message.clone()
            }
            PaperStreamError::Unauthorized { status } | PaperStreamError::Unavailable { status } => {
                out.status = Some(*status)
            }
            PaperStreamError::RateLimited { retry_after } => out.retry_after = *retry_after,
            PaperStreamError::Http { code, message } => {
                out.code = Some(code.clone());
                out.message = message.clone();
            }
            _ => out.kind = default_error_kind(),
        }
        out
    }
}

impl From<RelayError> for PaperStreamError {
    fn from(e: RelayError) -> Self {
        match e.kind.as_str() {
            "validation" => PaperStreamError::Validation(e.message),
            "backend" => PaperStreamError::backend(e.message),
            "unauthorized" => PaperStreamError::Unauthorized {
                status: e.status.unwrap_or(401),
            },
            "rate_limited" => PaperStreamError::RateLimited {
                retry_after: e.retry_after,
            },
            "unavailable" => PaperStreamError::Unavailable {
                status: e.status.unwrap_or(503),
            },
            "http" => PaperStreamError::Http {
                code: e.code.unwrap_or_default(),
                message: e.message,
            },
            _ => PaperStreamError::transport(e.message),
        }
    }
}

/// Relays turns through a broker task in front of another transport.
pub struct RelayTransport {
    upstream: Arc<dyn Transport>,
    buffer: usize,
}

impl RelayTransport {
    pub fn new(upstream: Arc<dyn Transport>, buffer: usize) -> Self {
        Self {
            upstream,
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Relay
    }

    async fn open(&self, req: &TurnRequest, ctx: &TurnCtx) -> CoreResult<FrameSource> {
        let (tx, mut rx) = mpsc::channel(self.buffer);
        tokio::spawn(run_broker(
            self.upstream.clone(),
            req.clone(),
            ctx.clone(),
            tx,
        ));

        match rx.recv().await {
            Some(RelayMessage::Opened) => Ok(frames_from_relay(rx)),
            Some(RelayMessage::Error(e)) => Err(e.into()),
            Some(other) => {
                tracing::warn!(?other, "relay spoke before opening");
                Err(PaperStreamError::transport("relay protocol violation"))
            }
            None => Err(PaperStreamError::transport("relay closed before opening")),
        }
    }
}

/// Broker side: open upstream and forward every frame until a terminal
/// message is sent or the receiving side goes away. A vanished receiver is
/// noticed even while upstream is silent, and dropping `frames` closes the
/// upstream connection.
pub async fn run_broker(
    upstream: Arc<dyn Transport>,
    req: TurnRequest,
    ctx: TurnCtx,
    tx: mpsc::Sender<RelayMessage>,
) {
    let opened = tokio::select! {
        _ = tx.closed() => {
            tracing::debug!(turn_id = %ctx.turn_id, "relay consumer gone before upstream opened");
            return;
        }
        opened = upstream.open(&req, &ctx) => opened,
    };
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(e) => {
            let _ = tx.send(RelayMessage::Error(RelayError::from(&e))).await;
            return;
        }
    };
    if tx.send(RelayMessage::Opened).await.is_err() {
        return;
    }

    loop {
        let item = tokio::select! {
            biased;
            _ = tx.closed() => {
                tracing::debug!(turn_id = %ctx.turn_id, "relay consumer gone; closing upstream");
                return;
            }
            item = frames.next() => item,
        };
        let Some(item) = item else { break };
        let msg = match item {
            Ok(Frame::Data(raw)) => RelayMessage::Frame {
                data: raw.into_string(),
            },
            Ok(Frame::Done) => RelayMessage::Done,
            Err(e) => RelayMessage::Disconnected {
                reason: e.to_string(),
            },
        };
        let terminal = !matches!(msg, RelayMessage::Frame { .. });
        if tx.send(msg).await.is_err() || terminal {
            return;
        }
    }
    let _ = tx.send(RelayMessage::Done).await;
}

/// Receiving side: turn relay messages back into frames.
pub fn frames_from_relay(rx: mpsc::Receiver<RelayMessage>) -> FrameSource {
    let stream = futures::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        loop {
            let item = match rx.recv().await {
                Some(RelayMessage::Frame { data }) => {
                    return Some((Ok(Frame::Data(RawFrame::new(data))), Some(rx)));
                }
                Some(RelayMessage::Opened) => continue,
                Some(RelayMessage::Done) => Ok(Frame::Done),
                Some(RelayMessage::Error(e)) => Err(e.into()),
                Some(RelayMessage::Disconnected { reason }) => {
                    Err(PaperStreamError::transport(format!("relay disconnected: {reason}")))
                }
                None => Err(PaperStreamError::transport("relay channel closed")),
            };
            return Some((item, None));
        }
    });
    Box::pin(stream)
}
