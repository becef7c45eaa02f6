//! Per-turn state machine folding `StreamEvent`s into cumulative output.
//!
//! `Idle → Streaming → {Completed, Failed}`. Terminal states absorb every
//! further event, so late or duplicated frames cannot change a finished turn.

use std::collections::VecDeque;

use crate::error::PaperStreamError;
use crate::stream::{AudioSegment, StreamEvent};

/// Message used when the link drops before anything useful arrived.
pub const CONNECTION_LOST: &str = "connection lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What the consumer should render after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// Whole cumulative text so far. Overwrite, do not append.
    Text(String),
    /// A new session id; repeated announcements of the same id are suppressed.
    SessionId(String),
    /// Next segment taken from the playback queue.
    Audio(AudioSegment),
    Status(String),
    /// Normal completion with the final text.
    Complete(String),
    /// Clean completion that carried no content at all.
    EmptyResponse,
    /// Terminal failure, human-readable.
    Error(String),
}

impl TurnUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::EmptyResponse | Self::Error(_))
    }
}

/// Cumulative state of one conversation turn.
#[derive(Debug)]
pub struct AccumulatorState {
    accumulated_text: String,
    session_id: Option<String>,
    status: TurnStatus,
    segments: Vec<StreamEvent>,
    audio_queue: VecDeque<AudioSegment>,
    audio_received: usize,
    section: Option<String>,
    partial: bool,
    error: Option<PaperStreamError>,
}

impl Default for AccumulatorState {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulatorState {
    pub fn new() -> Self {
        Self {
            accumulated_text: String::new(),
            session_id: None,
            status: TurnStatus::Idle,
            segments: Vec::new(),
            audio_queue: VecDeque::new(),
            audio_received: 0,
            section: None,
            partial: false,
            error: None,
        }
    }

    /// Only deltas of `section` (or unscoped deltas) are accumulated.
    pub fn with_section(section: impl Into<String>) -> Self {
        Self {
            section: Some(section.into()),
            ..Self::new()
        }
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn segments(&self) -> &[StreamEvent] {
        &self.segments
    }

    /// The accepted final text; `None` unless the turn completed.
    pub fn final_text(&self) -> Option<&str> {
        match self.status {
            TurnStatus::Completed => Some(&self.accumulated_text),
            _ => None,
        }
    }

    /// True when the turn was accepted from partial text after a dropped link.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn error(&self) -> Option<&PaperStreamError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<PaperStreamError> {
        self.error.take()
    }

    pub fn audio_received(&self) -> usize {
        self.audio_received
    }

    /// Take the next audio segment in playback (arrival) order.
    pub fn pop_audio(&mut self) -> Option<AudioSegment> {
        self.audio_queue.pop_front()
    }

    pub fn queued_audio(&self) -> usize {
        self.audio_queue.len()
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: StreamEvent) -> Option<TurnUpdate> {
        if self.status.is_terminal() {
            tracing::debug!(?event, "ignoring event after terminal state");
            return None;
        }
        self.segments.push(event.clone());

        match event {
            StreamEvent::TextDelta { content, section } => {
                if let (Some(wanted), Some(got)) = (&self.section, &section)
                    && wanted != got
                {
                    return None;
                }
                self.status = TurnStatus::Streaming;
                self.accumulated_text.push_str(&content);
                Some(TurnUpdate::Text(self.accumulated_text.clone()))
            }
            StreamEvent::SessionId(id) => {
                if self.session_id.as_deref() == Some(id.as_str()) {
                    return None;
                }
                self.session_id = Some(id.clone());
                Some(TurnUpdate::SessionId(id))
            }
            // Queued for playback; the consumer drains it with `pop_audio`.
            // `segments` shares the same buffer (`Bytes` clones are refcounted).
            StreamEvent::AudioChunk(seg) => {
                self.audio_received += 1;
                self.audio_queue.push_back(seg);
                None
            }
            StreamEvent::StatusUpdate(text) => {
                self.status = TurnStatus::Streaming;
                Some(TurnUpdate::Status(text))
            }
            StreamEvent::Complete => {
                self.status = TurnStatus::Completed;
                if self.accumulated_text.is_empty() && self.audio_received == 0 {
                    Some(TurnUpdate::EmptyResponse)
                } else {
                    Some(TurnUpdate::Complete(self.accumulated_text.clone()))
                }
            }
            StreamEvent::Error(message) => {
                self.status = TurnStatus::Failed;
                self.error = Some(PaperStreamError::backend(message.clone()));
                Some(TurnUpdate::Error(message))
            }
        }
    }

    /// The link dropped before a terminal event. Partial text is accepted as
    /// complete; with no text the turn fails with a transport error.
    pub fn disconnect(&mut self, reason: Option<&str>) -> Option<TurnUpdate> {
        if self.status.is_terminal() {
            return None;
        }
        if !self.accumulated_text.is_empty() {
            tracing::info!(
                reason = reason.unwrap_or(CONNECTION_LOST),
                chars = self.accumulated_text.len(),
                "link dropped; accepting partial text"
            );
            self.partial = true;
            self.status = TurnStatus::Completed;
            return Some(TurnUpdate::Complete(self.accumulated_text.clone()));
        }
        self.status = TurnStatus::Failed;
        let message = match reason {
            Some(r) => format!("{CONNECTION_LOST}: {r}"),
            None => CONNECTION_LOST.to_string(),
        };
        self.error = Some(PaperStreamError::transport(message.clone()));
        Some(TurnUpdate::Error(message))
    }

    /// Fail the turn before any stream was opened (e.g. the request was refused).
    pub fn fail(&mut self, err: PaperStreamError) -> Option<TurnUpdate> {
        if self.status.is_terminal() {
            return None;
        }
        self.status = TurnStatus::Failed;
        let update = TurnUpdate::Error(err.to_string());
        self.error = Some(err);
        Some(update)
    }
}
