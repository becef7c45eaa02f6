use serde::{Deserialize, Serialize};

/// Section of a resume stream that carries the final text.
pub const FINAL_RESUME_SECTION: &str = "final_resume";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub arxiv_paper_url: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Which backend stream a turn talks to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Chat,
    Podcast,
    Resume,
}

impl TurnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Podcast => "podcast",
            Self::Resume => "resume",
        }
    }
}

/// One user action: a chat message, a podcast generation or a resume generation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TurnRequest {
    Chat(ChatRequest),
    Podcast { arxiv_paper_url: String },
    Resume { arxiv_paper_url: String },
}

impl TurnRequest {
    pub fn kind(&self) -> TurnKind {
        match self {
            Self::Chat(_) => TurnKind::Chat,
            Self::Podcast { .. } => TurnKind::Podcast,
            Self::Resume { .. } => TurnKind::Resume,
        }
    }

    pub fn arxiv_paper_url(&self) -> &str {
        match self {
            Self::Chat(c) => &c.arxiv_paper_url,
            Self::Podcast { arxiv_paper_url } | Self::Resume { arxiv_paper_url } => arxiv_paper_url,
        }
    }

    /// Text section kept by the accumulator, if the stream is sectioned.
    pub fn text_section(&self) -> Option<&'static str> {
        match self {
            Self::Resume { .. } => Some(FINAL_RESUME_SECTION),
            _ => None,
        }
    }

    /// JSON body POSTed to the backend.
    pub fn wire_body(&self) -> serde_json::Value {
        match self {
            Self::Chat(c) => serde_json::to_value(WireChatReq {
                model: &c.model,
                messages: &c.messages,
                arxiv_paper_url: &c.arxiv_paper_url,
                stream: true,
                max_tokens: c.max_tokens,
                temperature: c.temperature,
            })
            .unwrap_or(serde_json::Value::Null),
            Self::Podcast { arxiv_paper_url } | Self::Resume { arxiv_paper_url } => {
                serde_json::json!({ "arxiv_paper_url": arxiv_paper_url })
            }
        }
    }
}

// ---- Wire struct (chat completions endpoint) ----
#[derive(Serialize)]
struct WireChatReq<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    arxiv_paper_url: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}
