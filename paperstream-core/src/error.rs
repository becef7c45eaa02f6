use thiserror::Error;

/// Core error type for paperstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum PaperStreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A single frame could not be understood. Never escapes the classifier.
    #[error("unparseable frame: {0}")]
    FrameParse(String),

    /// Connection-level failure: refused, reset, or a relay link that dropped.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Explicit error payload sent by the backend inside the stream.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// The turn finished cleanly but carried no content.
    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("not authorized by backend (status {status})")]
    Unauthorized { status: u16 },

    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<u64> },

    #[error("backend unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("backend http error: {code} {message}")]
    Http { code: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PaperStreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Short stable label used in telemetry records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::FrameParse(_) => "frame_parse",
            Self::Transport { .. } => "transport",
            Self::Backend { .. } => "backend",
            Self::EmptyResponse => "empty_response",
            Self::Unauthorized { .. } => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Http { .. } => "http",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, PaperStreamError>;
