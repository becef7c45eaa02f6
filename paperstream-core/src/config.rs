use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::model::TurnKind;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendCfg {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_podcast_path")]
    pub podcast_path: String,
    #[serde(default = "default_resume_path")]
    pub resume_path: String,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_path: default_chat_path(),
            podcast_path: default_podcast_path(),
            resume_path: default_resume_path(),
        }
    }
}

impl BackendCfg {
    /// Absolute endpoint URL for a turn kind.
    pub fn endpoint(&self, kind: TurnKind) -> String {
        let path = match kind {
            TurnKind::Chat => &self.chat_path,
            TurnKind::Podcast => &self.podcast_path,
            TurnKind::Resume => &self.resume_path,
        };
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8051".into()
}
fn default_chat_path() -> String {
    "/openai/chat/completions".into()
}
fn default_podcast_path() -> String {
    "/podcast/podcast/generate/stream".into()
}
fn default_resume_path() -> String {
    "/resume/resume/generate/stream".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthCfg {
    /// Name of the environment variable that contains the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthCfg {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
        }
    }
}

fn default_token_env() -> String {
    "PAPERSTREAM_TOKEN".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Direct,
    Relay,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Relay => "relay",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TransportCfg {
    #[serde(default)]
    pub mode: TransportMode,
    /// Capacity of the relay's message channel.
    #[serde(default = "default_relay_buffer")]
    pub relay_buffer: usize,
}

impl Default for TransportCfg {
    fn default() -> Self {
        Self {
            mode: TransportMode::Direct,
            relay_buffer: default_relay_buffer(),
        }
    }
}

fn default_relay_buffer() -> usize {
    64
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatCfg {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ChatCfg {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_model() -> String {
    "local-model".into()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Idle timeout between reads in milliseconds. Off by default: a stream
    /// may stay quiet while the backend generates, and its total length is unbounded.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: None,
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendCfg,
    #[serde(default)]
    pub auth: AuthCfg,
    #[serde(default)]
    pub transport: TransportCfg,
    #[serde(default)]
    pub chat: ChatCfg,
    /// HTTP client configuration (timeouts, pooling).
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::PaperStreamError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::PaperStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::PaperStreamError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::PaperStreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::PaperStreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::PaperStreamError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}
