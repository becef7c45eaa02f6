//! In-memory transports for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;

use crate::config::TransportMode;
use crate::error::{CoreResult, PaperStreamError};
use crate::frame::{Frame, RawFrame};
use crate::model::TurnRequest;
use crate::transport::{FrameSource, Transport, TurnCtx};

#[derive(Debug, Clone)]
pub enum Script {
    Line(String),
    Done,
    /// Link drops with this reason; nothing follows.
    Drop(String),
    /// Never yields again (a hung connection).
    Hang,
}

impl Script {
    pub fn line(s: &str) -> Self {
        Self::Line(s.to_string())
    }

    pub fn delta(s: &str) -> Self {
        Self::Line(format!(
            "data: {}",
            serde_json::json!({"choices": [{"delta": {"content": s}}]})
        ))
    }
}

type Rejection = Box<dyn Fn() -> PaperStreamError + Send + Sync>;

/// Bumps a counter when the stream holding it is dropped (the connection closed).
struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replays a fixed script on every `open`.
pub struct ScriptedTransport {
    script: Vec<Script>,
    reject: Option<Rejection>,
    opens: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script,
            reject: None,
            opens: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every `open` fails with the error `make` builds.
    pub fn rejecting(make: impl Fn() -> PaperStreamError + Send + Sync + 'static) -> Self {
        Self {
            reject: Some(Box::new(make)),
            ..Self::new(Vec::new())
        }
    }

    pub fn refusing(message: &str) -> Self {
        let message = message.to_string();
        Self::rejecting(move || PaperStreamError::transport(message.clone()))
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of opened streams that have since been dropped.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Direct
    }

    async fn open(&self, _req: &TurnRequest, _ctx: &TurnCtx) -> CoreResult<FrameSource> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = &self.reject {
            return Err(make());
        }

        let mut items: Vec<CoreResult<Frame>> = Vec::new();
        let mut hang = false;
        for step in &self.script {
            match step {
                Script::Line(l) => items.push(Ok(Frame::Data(RawFrame::new(l.clone())))),
                Script::Done => items.push(Ok(Frame::Done)),
                Script::Drop(reason) => {
                    items.push(Err(PaperStreamError::transport(reason.clone())));
                    break;
                }
                Script::Hang => {
                    hang = true;
                    break;
                }
            }
        }

        let guard = CloseGuard(self.closed.clone());
        let head = futures::stream::iter(items).map(move |item| {
            let _open = &guard;
            item
        });
        if hang {
            Ok(Box::pin(head.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(head))
        }
    }
}
