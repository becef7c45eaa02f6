//! Turn lifecycle: one connection, one accumulator, one task per turn.
//!
//! `TurnRunner::start_turn` hands back a `TurnHandle` that is both an async
//! sequence of `TurnUpdate`s and a callback driver. Starting a turn supersedes
//! the previous one: its connection is closed and any frame it still delivers
//! is discarded by the generation check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::accumulator::{AccumulatorState, TurnStatus, TurnUpdate};
use crate::classify::classify;
use crate::config::{ChatCfg, Config};
use crate::error::{CoreResult, PaperStreamError};
use crate::frame::Frame;
use crate::model::TurnRequest;
use crate::normalizer::normalize_turn;
use crate::stream::{AudioSegment, StreamEvent};
use crate::telemetry::{self, KEY_ERROR_KIND, KEY_FRAMES_DROPPED, KEY_FRAMES_SEEN, KEY_LATENCY_MS, KEY_OUTCOME, TurnTrace};
use crate::transport::{self, Transport, TurnCtx};

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// `partial` is set when the link dropped after some text and the text was accepted.
    Completed { text: String, partial: bool },
    /// Finished cleanly without any content.
    Empty,
    Failed(PaperStreamError),
    Cancelled,
    /// A newer turn was started before this one finished.
    Superseded,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { partial: false, .. } => "completed",
            Self::Completed { partial: true, .. } => "partial",
            Self::Empty => "empty",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
            Self::Superseded => "superseded",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Turn the outcome into a result, surfacing `Empty` as `EmptyResponse`.
    pub fn into_result(self) -> CoreResult<String> {
        match self {
            Self::Completed { text, .. } => Ok(text),
            Self::Empty => Err(PaperStreamError::EmptyResponse),
            Self::Failed(e) => Err(e),
            Self::Cancelled => Err(PaperStreamError::transport("turn cancelled")),
            Self::Superseded => Err(PaperStreamError::transport("turn superseded")),
        }
    }
}

/// Callback surface for UI collaborators. Every method defaults to a no-op.
pub trait TurnObserver: Send {
    /// Receives the whole cumulative text; replace what was rendered.
    fn on_text_update(&mut self, _cumulative: &str) {}
    fn on_session_id(&mut self, _id: &str) {}
    fn on_audio_segment(&mut self, _segment: &AudioSegment) {}
    fn on_status(&mut self, _text: &str) {}
    fn on_complete(&mut self, _final_text: &str) {}
    fn on_empty_response(&mut self) {}
    /// Rendered partial text stays on screen; show the error next to it.
    fn on_error(&mut self, _message: &str) {}
}

/// Ignores every update.
impl TurnObserver for () {}

/// Starts turns against one transport, one live turn at a time.
pub struct TurnRunner {
    transport: Arc<dyn Transport>,
    chat_defaults: ChatCfg,
    generation: Arc<AtomicU64>,
    current: Mutex<Option<CancellationToken>>,
}

impl TurnRunner {
    pub fn new(transport: Arc<dyn Transport>, chat_defaults: ChatCfg) -> Self {
        Self {
            transport,
            chat_defaults,
            generation: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(None),
        }
    }

    /// Build the configured transport, reading the bearer token from `auth.token_env`.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let bearer = transport::bearer_from_env(cfg);
        let transport = transport::from_config(cfg, bearer)?;
        Ok(Self::new(transport, cfg.chat.clone()))
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new turn, superseding the one in flight. Must be called inside a tokio runtime.
    pub fn start_turn(&self, req: TurnRequest) -> TurnHandle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(prev) = current.replace(cancel.clone()) {
                prev.cancel();
            }
        }

        let turn_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!(
            "paperstream.turn",
            turn.id = %turn_id,
            turn.kind = req.kind().as_str(),
            turn.generation = generation,
            transport.mode = self.transport.mode().as_str(),
            turn.outcome = tracing::field::Empty,
            latency.ms = tracing::field::Empty,
            frames.seen = tracing::field::Empty,
            frames.dropped = tracing::field::Empty,
            error.kind = tracing::field::Empty,
        );

        let driver = TurnDriver {
            transport: self.transport.clone(),
            chat_defaults: self.chat_defaults.clone(),
            live_generation: self.generation.clone(),
            generation,
            ctx: TurnCtx {
                turn_id: turn_id.clone(),
                request_id: None,
            },
            cancel: cancel.clone(),
            tx,
        };
        let task = tokio::spawn(driver.run(req).instrument(span));

        TurnHandle {
            turn_id,
            generation,
            updates: rx,
            cancel,
            task: Some(task),
        }
    }
}

/// Caller's side of one turn. Dropping it tears the turn down.
pub struct TurnHandle {
    turn_id: String,
    generation: u64,
    updates: mpsc::UnboundedReceiver<TurnUpdate>,
    cancel: CancellationToken,
    task: Option<JoinHandle<TurnOutcome>>,
}

impl TurnHandle {
    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Next update in arrival order; `None` once the turn has ended.
    pub async fn next_update(&mut self) -> Option<TurnUpdate> {
        self.updates.recv().await
    }

    /// Close the connection. Cooperative: takes effect at the next I/O suspension.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the turn to end. Undelivered updates are discarded.
    pub async fn finish(mut self) -> TurnOutcome {
        let Some(task) = self.task.take() else {
            return TurnOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => TurnOutcome::Failed(PaperStreamError::Other(anyhow::anyhow!("turn task failed: {e}"))),
        }
    }

    /// Dispatch every update to `observer`, then return the outcome.
    pub async fn drive<O: TurnObserver + ?Sized>(mut self, observer: &mut O) -> TurnOutcome {
        while let Some(update) = self.next_update().await {
            dispatch(observer, &update);
        }
        self.finish().await
    }
}

/// Route one update to the matching observer callback.
pub fn dispatch<O: TurnObserver + ?Sized>(observer: &mut O, update: &TurnUpdate) {
    match update {
        TurnUpdate::Text(t) => observer.on_text_update(t),
        TurnUpdate::SessionId(id) => observer.on_session_id(id),
        TurnUpdate::Audio(seg) => observer.on_audio_segment(seg),
        TurnUpdate::Status(s) => observer.on_status(s),
        TurnUpdate::Complete(t) => observer.on_complete(t),
        TurnUpdate::EmptyResponse => observer.on_empty_response(),
        TurnUpdate::Error(m) => observer.on_error(m),
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

#[derive(Default)]
struct Counters {
    frames_seen: u64,
    frames_dropped: u64,
}

enum Stop {
    Finished,
    Cancelled,
    Superseded,
}

struct TurnDriver {
    transport: Arc<dyn Transport>,
    chat_defaults: ChatCfg,
    live_generation: Arc<AtomicU64>,
    generation: u64,
    ctx: TurnCtx,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<TurnUpdate>,
}

impl TurnDriver {
    fn is_stale(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) != self.generation
    }

    fn stopped(&self) -> Stop {
        if self.is_stale() {
            Stop::Superseded
        } else {
            Stop::Cancelled
        }
    }

    /// Forward an update; a vanished consumer counts as cancellation.
    fn send(&self, update: Option<TurnUpdate>) -> bool {
        match update {
            Some(u) => self.tx.send(u).is_ok(),
            None => true,
        }
    }

    /// Hand queued audio to the consumer in playback order.
    fn drain_audio(&self, acc: &mut AccumulatorState) -> bool {
        while let Some(seg) = acc.pop_audio() {
            if self.tx.send(TurnUpdate::Audio(seg)).is_err() {
                return false;
            }
        }
        true
    }

    async fn run(self, req: TurnRequest) -> TurnOutcome {
        let started = Instant::now();
        let kind = req.kind();
        let mut acc = match req.text_section() {
            Some(section) => AccumulatorState::with_section(section),
            None => AccumulatorState::new(),
        };
        let mut counters = Counters::default();

        let stop = self.stream_into(req, &mut acc, &mut counters).await;
        let outcome = match stop {
            Stop::Cancelled => TurnOutcome::Cancelled,
            Stop::Superseded => TurnOutcome::Superseded,
            Stop::Finished => match acc.status() {
                TurnStatus::Completed if acc.accumulated_text().is_empty() && acc.audio_received() == 0 => {
                    TurnOutcome::Empty
                }
                TurnStatus::Completed => TurnOutcome::Completed {
                    text: acc.accumulated_text().to_string(),
                    partial: acc.is_partial(),
                },
                _ => TurnOutcome::Failed(
                    acc.take_error()
                        .unwrap_or_else(|| PaperStreamError::transport("turn ended without a result")),
                ),
            },
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let span = tracing::Span::current();
        span.record(KEY_OUTCOME, outcome.as_str());
        span.record(KEY_LATENCY_MS, latency_ms);
        span.record(KEY_FRAMES_SEEN, counters.frames_seen);
        span.record(KEY_FRAMES_DROPPED, counters.frames_dropped);

        let mut trace = TurnTrace::new(
            self.ctx.turn_id.as_str(),
            kind.as_str(),
            self.transport.mode().as_str(),
            self.generation,
        )
        .latency_ms(latency_ms)
        .frames(counters.frames_seen, counters.frames_dropped)
        .output(acc.accumulated_text().chars().count() as u64, acc.audio_received() as u64)
        .outcome(outcome.as_str());
        if let TurnOutcome::Failed(e) = &outcome {
            span.record(KEY_ERROR_KIND, e.kind());
            trace = trace.error(e.kind(), &e.to_string());
            tracing::warn!(error = %e, "turn failed");
        } else {
            tracing::info!(outcome = outcome.as_str(), latency_ms, "turn finished");
        }
        telemetry::emit(trace);

        outcome
    }

    async fn stream_into(&self, req: TurnRequest, acc: &mut AccumulatorState, counters: &mut Counters) -> Stop {
        let req = match normalize_turn(req, &self.chat_defaults) {
            Ok(req) => req,
            Err(e) => {
                self.send(acc.fail(e));
                return Stop::Finished;
            }
        };

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return self.stopped(),
            opened = self.transport.open(&req, &self.ctx) => opened,
        };
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(e) => {
                self.send(acc.fail(e));
                return Stop::Finished;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stopped(),
                next = frames.next() => next,
            };
            if self.is_stale() {
                tracing::debug!(generation = self.generation, "discarding frame from superseded turn");
                return Stop::Superseded;
            }

            let update = match next {
                Some(Ok(Frame::Data(raw))) => {
                    counters.frames_seen += 1;
                    match classify(&raw) {
                        Some(event) => acc.apply(event),
                        None => {
                            counters.frames_dropped += 1;
                            None
                        }
                    }
                }
                // A clean end of stream counts as completion, like the sentinel.
                Some(Ok(Frame::Done)) | None => acc.apply(StreamEvent::Complete),
                Some(Err(e)) => acc.disconnect(Some(&e.to_string())),
            };
            if !self.send(update) || !self.drain_audio(acc) {
                tracing::debug!("turn consumer dropped; closing connection");
                return Stop::Cancelled;
            }
            if acc.status().is_terminal() {
                return Stop::Finished;
            }
        }
    }
}
