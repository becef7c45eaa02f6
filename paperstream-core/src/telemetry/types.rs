use serde::{Deserialize, Serialize};

/// Provider-agnostic summary of one finished turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TurnTrace {
    pub turn_id: String,

    /// "chat", "podcast" or "resume".
    pub kind: String,

    /// "direct" or "relay".
    pub transport: String,

    pub generation: u64,

    pub latency_ms: u64,

    pub frames_seen: u64,
    /// Frames the classifier could not map to an event.
    pub frames_dropped: u64,

    pub text_chars: u64,
    pub audio_segments: u64,

    /// "completed", "partial", "empty", "failed", "cancelled" or "superseded".
    pub outcome: String,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl TurnTrace {
    pub fn new(turn_id: impl Into<String>, kind: &str, transport: &str, generation: u64) -> Self {
        Self {
            turn_id: turn_id.into(),
            kind: kind.to_string(),
            transport: transport.to_string(),
            generation,
            ..Default::default()
        }
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn frames(mut self, seen: u64, dropped: u64) -> Self {
        self.frames_seen = seen;
        self.frames_dropped = dropped;
        self
    }

    pub fn output(mut self, text_chars: u64, audio_segments: u64) -> Self {
        self.text_chars = text_chars;
        self.audio_segments = audio_segments;
        self
    }

    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = outcome.to_string();
        self
    }

    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_trace_serializes() {
        let trace = TurnTrace::new("turn-123", "chat", "relay", 3)
            .latency_ms(42)
            .frames(10, 1)
            .output(120, 0)
            .outcome("failed")
            .error("transport", "connection lost");

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["turn_id"], json!("turn-123"));
        assert_eq!(as_json["transport"], json!("relay"));
        assert_eq!(as_json["generation"], json!(3));
        assert_eq!(as_json["frames_dropped"], json!(1));
        assert_eq!(as_json["outcome"], json!("failed"));
        assert_eq!(as_json["error_kind"], json!("transport"));
    }
}
