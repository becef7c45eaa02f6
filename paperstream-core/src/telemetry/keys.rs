//! Span/Log attribute keys recorded when a turn ends.
//! Keep these stable; changing them is a breaking change for dashboards.
//! Identity fields (`turn.id`, `turn.kind`, `turn.generation`, `transport.mode`)
//! are set as literals when the `paperstream.turn` span opens.

pub const KEY_OUTCOME: &str = "turn.outcome";
pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_FRAMES_SEEN: &str = "frames.seen";
pub const KEY_FRAMES_DROPPED: &str = "frames.dropped";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
