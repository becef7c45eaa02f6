//! Semantic events decoded from the backend stream.
//!
//! Contract:
//! - A turn sees 0..n non-terminal events (`TextDelta`, `SessionId`, `AudioChunk`,
//!   `StatusUpdate`) followed by at most one terminal event (`Complete` or `Error`).
//! - Events are a pure function of one frame; ordering is the arrival order.

use bytes::Bytes;

/// One decoded audio segment of a podcast turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub bytes: Bytes,
    pub segment_id: Option<String>,
    /// Backend-supplied timestamp. Informational only; playback follows arrival order.
    pub timestamp: Option<serde_json::Value>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Partial text. Empty content is valid and must not be treated as an error.
    TextDelta {
        content: String,
        /// Section discriminator of sectioned streams (e.g. `final_resume`).
        section: Option<String>,
    },
    /// Backend conversation identifier.
    SessionId(String),
    AudioChunk(AudioSegment),
    StatusUpdate(String),
    /// `[DONE]` sentinel, or a clean end of stream.
    Complete,
    /// Error payload sent by the backend; the turn ends after this.
    Error(String),
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::TextDelta {
            content: content.into(),
            section: None,
        }
    }

    /// Returns true if this event terminates the turn (`Complete` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }

    /// Convenience accessor for `TextDelta` contents.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta { content, .. } => Some(content.as_str()),
            _ => None,
        }
    }
}
