use unicode_normalization::UnicodeNormalization;

use crate::config::ChatCfg;
use crate::error::{CoreResult, PaperStreamError};
use crate::model::{ChatRequest, TurnRequest};

const MAX_TOKENS_CAP: u32 = 32_000;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

fn clamp_round_f32(x: f32, lo: f32, hi: f32, dp: u32) -> f32 {
    let clamped = x.clamp(lo, hi);
    let p = 10f32.powi(dp as i32);
    (clamped * p).round() / p
}

pub fn normalize_chat(mut req: ChatRequest, defaults: &ChatCfg) -> ChatRequest {
    for msg in &mut req.messages {
        msg.content = clean_text(&msg.content);
    }
    req.messages.retain(|m| !m.content.is_empty());
    if req.model.trim().is_empty() {
        req.model = defaults.model.clone();
    }
    req.arxiv_paper_url = req.arxiv_paper_url.trim().to_string();
    req.temperature = Some(match req.temperature {
        Some(t) => clamp_round_f32(t, 0.0, 2.0, 3),
        None => defaults.temperature,
    });
    req.max_tokens = Some(
        req.max_tokens
            .unwrap_or(defaults.max_tokens)
            .clamp(1, MAX_TOKENS_CAP),
    );
    req
}

/// Normalize and validate a turn before any connection is opened.
pub fn normalize_turn(req: TurnRequest, defaults: &ChatCfg) -> CoreResult<TurnRequest> {
    match req {
        TurnRequest::Chat(chat) => {
            let chat = normalize_chat(chat, defaults);
            if chat.messages.is_empty() {
                return Err(PaperStreamError::Validation(
                    "chat turn needs at least one non-empty message".into(),
                ));
            }
            Ok(TurnRequest::Chat(chat))
        }
        TurnRequest::Podcast { arxiv_paper_url } => Ok(TurnRequest::Podcast {
            arxiv_paper_url: require_url(&arxiv_paper_url)?,
        }),
        TurnRequest::Resume { arxiv_paper_url } => Ok(TurnRequest::Resume {
            arxiv_paper_url: require_url(&arxiv_paper_url)?,
        }),
    }
}

fn require_url(url: &str) -> CoreResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PaperStreamError::Validation(
            "an arXiv paper URL is required".into(),
        ));
    }
    Ok(url.to_string())
}
