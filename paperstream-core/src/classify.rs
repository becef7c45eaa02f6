//! Frame → `StreamEvent` classification.
//!
//! Rules are checked in a fixed order against the frame's JSON payload; the
//! first match wins. Anything unrecognized is dropped, never raised.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreResult, PaperStreamError};
use crate::frame::RawFrame;
use crate::stream::{AudioSegment, StreamEvent};

// ---- Wire struct (permissive; every field optional and loosely typed) ----
// A field with an unexpected JSON type must not reject the whole frame, so
// everything is read as `Value` and interpreted per rule below.
#[derive(Deserialize, Default)]
struct WireFrame {
    #[serde(default)]
    choices: Option<Value>,
    #[serde(default)]
    chat_id: Option<Value>,
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    section: Option<Value>,
    #[serde(default)]
    segment_id: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Classify one frame, logging and dropping anything that does not map to an event.
pub fn classify(frame: &RawFrame) -> Option<StreamEvent> {
    match try_classify(frame) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::debug!(error = %e, frame = %truncate(frame.as_str(), 200), "dropping frame");
            None
        }
    }
}

/// Like [`classify`] but reports why a frame was rejected.
pub fn try_classify(frame: &RawFrame) -> CoreResult<StreamEvent> {
    let payload = frame.payload().trim();
    let wire: WireFrame = serde_json::from_str(payload)
        .map_err(|e| PaperStreamError::FrameParse(format!("invalid json: {e}")))?;

    // 1. OpenAI-style chat completion chunk. A delta without content (role-only
    //    or finish chunks) is a zero-length delta.
    if let Some(delta) = wire
        .choices
        .as_ref()
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("delta"))
        .filter(|d| d.is_object())
    {
        match delta.get("content") {
            Some(Value::String(s)) => return Ok(StreamEvent::text(s.clone())),
            None | Some(Value::Null) => return Ok(StreamEvent::text("")),
            Some(_) => {}
        }
    }

    // 2. Conversation id announcement.
    if let Some(id) = wire.chat_id.as_ref().and_then(scalar_string) {
        return Ok(StreamEvent::SessionId(id));
    }

    match wire.kind.as_ref().and_then(Value::as_str) {
        // 3. Podcast audio, base64 encoded.
        Some("audio") => {
            let encoded = wire
                .content
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| PaperStreamError::FrameParse("audio frame without content".into()))?;
            let decoded = STANDARD
                .decode(encoded.trim())
                .map_err(|e| PaperStreamError::FrameParse(format!("bad base64 audio: {e}")))?;
            return Ok(StreamEvent::AudioChunk(AudioSegment {
                bytes: Bytes::from(decoded),
                segment_id: wire.segment_id.as_ref().and_then(scalar_string),
                timestamp: wire.timestamp,
            }));
        }
        // 4. Text segment; sectioned for resume streams, plain for podcast transcripts.
        Some("text") => {
            return Ok(StreamEvent::TextDelta {
                content: content_string(wire.content.as_ref()),
                section: wire.section.as_ref().and_then(scalar_string),
            });
        }
        // 5. Progress status.
        Some("status") => {
            return Ok(StreamEvent::StatusUpdate(content_string(wire.content.as_ref())));
        }
        // 6a. Typed error.
        Some("error") => {
            let message = wire
                .error
                .as_ref()
                .and_then(error_message)
                .or_else(|| wire.message.as_ref().and_then(error_message))
                .or_else(|| wire.content.as_ref().and_then(scalar_string))
                .unwrap_or_else(|| "unknown backend error".to_string());
            return Ok(StreamEvent::Error(message));
        }
        _ => {}
    }

    // 6b. Top-level error field.
    if let Some(message) = wire.error.as_ref().and_then(error_message) {
        return Ok(StreamEvent::Error(message));
    }

    Err(PaperStreamError::FrameParse("unrecognized frame shape".into()))
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn content_string(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn error_message(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| v.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    } else {
        s.to_string()
    }
}
