//! Multi-turn chat over one paper.
//!
//! A `ChatSession` owns the running conversation: each user message is
//! appended before its turn starts, and the assistant reply is appended once
//! the turn ends with text (a reply kept after a dropped link included). The
//! whole history goes out with every chat turn.

use serde::{Deserialize, Serialize};

use crate::accumulator::TurnUpdate;
use crate::error::{CoreResult, PaperStreamError};
use crate::model::{ChatMessage, ChatRequest, TurnRequest};
use crate::turn::{TurnObserver, TurnOutcome, TurnRunner, dispatch};

/// Serializable snapshot of a conversation, for saving and restoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    arxiv_paper_url: String,
    /// Empty means the configured default model.
    model: String,
    state: ChatState,
}

impl ChatSession {
    pub fn new(arxiv_paper_url: impl Into<String>) -> Self {
        Self {
            arxiv_paper_url: arxiv_paper_url.into(),
            model: String::new(),
            state: ChatState::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn paper_url(&self) -> &str {
        &self.arxiv_paper_url
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.state.messages
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.state.chat_id.as_deref()
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Replace the conversation, e.g. with one loaded from disk.
    pub fn restore(&mut self, state: ChatState) {
        self.state = state;
    }

    pub fn clear(&mut self) {
        self.state = ChatState::default();
    }

    /// Append `message` and build the chat turn carrying the full history.
    /// The user message stays in the history even if the turn later fails.
    pub fn begin_turn(&mut self, message: &str) -> CoreResult<TurnRequest> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PaperStreamError::Validation("chat message is empty".into()));
        }
        self.state.messages.push(ChatMessage::user(message));
        Ok(TurnRequest::Chat(ChatRequest {
            model: self.model.clone(),
            messages: self.state.messages.clone(),
            arxiv_paper_url: self.arxiv_paper_url.clone(),
            max_tokens: None,
            temperature: None,
        }))
    }

    /// Track the chat id the backend announces.
    pub fn observe(&mut self, update: &TurnUpdate) {
        if let TurnUpdate::SessionId(id) = update {
            self.state.chat_id = Some(id.clone());
        }
    }

    /// Append the assistant reply if the turn produced any text.
    pub fn record_outcome(&mut self, outcome: &TurnOutcome) {
        if let Some(text) = outcome.text()
            && !text.trim().is_empty()
        {
            self.state.messages.push(ChatMessage::assistant(text));
        }
    }

    /// Send `message` as the next turn, forwarding updates to `observer`.
    pub async fn send<O: TurnObserver + ?Sized>(
        &mut self,
        runner: &TurnRunner,
        message: &str,
        observer: &mut O,
    ) -> CoreResult<TurnOutcome> {
        let req = self.begin_turn(message)?;
        let mut handle = runner.start_turn(req);
        while let Some(update) = handle.next_update().await {
            self.observe(&update);
            dispatch(observer, &update);
        }
        let outcome = handle.finish().await;
        self.record_outcome(&outcome);
        tracing::debug!(
            outcome = outcome.as_str(),
            messages = self.state.messages.len(),
            "chat turn recorded"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatCfg;
    use crate::model::Role;
    use crate::test_util::{Script, ScriptedTransport};
    use crate::transport::DirectTransport;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use std::sync::Arc;

    const PAPER: &str = "https://arxiv.org/abs/1706.03762";

    fn runner(script: Vec<Script>) -> TurnRunner {
        TurnRunner::new(Arc::new(ScriptedTransport::new(script)), ChatCfg::default())
    }

    #[tokio::test]
    async fn history_grows_with_replies_and_chat_id() {
        let r = runner(vec![
            Script::line(r#"{"chat_id":"c-1"}"#),
            Script::delta("Self-attention."),
            Script::Done,
        ]);
        let mut session = ChatSession::new(PAPER);
        let outcome = session.send(&r, "What is new?", &mut ()).await.unwrap();
        assert_eq!(outcome.text(), Some("Self-attention."));
        assert_eq!(session.chat_id(), Some("c-1"));
        assert_eq!(
            session.messages(),
            &[
                ChatMessage::user("What is new?"),
                ChatMessage::assistant("Self-attention.")
            ]
        );

        let next = session.begin_turn("  And the cost?  ").unwrap();
        match next {
            TurnRequest::Chat(req) => {
                assert_eq!(req.arxiv_paper_url, PAPER);
                assert_eq!(req.messages.len(), 3);
                assert_eq!(req.messages[2], ChatMessage::user("And the cost?"));
            }
            other => panic!("expected chat turn, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn partial_reply_is_kept_after_drop() {
        let r = runner(vec![Script::delta("Half"), Script::Drop("reset".into())]);
        let mut session = ChatSession::new(PAPER);
        session.send(&r, "q", &mut ()).await.unwrap();
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].role, Role::Assistant);
        assert_eq!(session.messages()[1].content, "Half");
    }

    #[tokio::test]
    async fn failed_or_empty_turn_keeps_only_user_message() {
        let mut session = ChatSession::new(PAPER);
        let failed = runner(vec![Script::Drop("refused".into())]);
        let outcome = session.send(&failed, "one", &mut ()).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed(_)));

        let empty = runner(vec![Script::delta("  "), Script::Done]);
        session.send(&empty, "two", &mut ()).await.unwrap();
        assert_eq!(
            session.messages(),
            &[ChatMessage::user("one"), ChatMessage::user("two")]
        );
    }

    #[test]
    fn blank_message_is_rejected_without_touching_history() {
        let mut session = ChatSession::new(PAPER);
        assert!(matches!(
            session.begin_turn(" \n"),
            Err(PaperStreamError::Validation(_))
        ));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn state_round_trips_and_clears() {
        let mut session = ChatSession::new(PAPER).with_model("local-model");
        session.restore(
            serde_json::from_value(json!({
                "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}],
                "chat_id": "c-9"
            }))
            .unwrap(),
        );
        assert_eq!(session.chat_id(), Some("c-9"));
        assert_eq!(session.messages().len(), 2);
        let saved = serde_json::to_value(session.state()).unwrap();
        assert_eq!(saved["chat_id"], "c-9");

        session.clear();
        assert_eq!(session.state(), &ChatState::default());
        assert_eq!(session.paper_url(), PAPER);
    }

    #[tokio::test]
    async fn full_history_is_posted_to_backend() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/openai/chat/completions")
                .json_body_partial(
                    r#"{"messages":[{"role":"user","content":"first"},{"role":"assistant","content":"one"},{"role":"user","content":"second"}]}"#,
                );
            then.status(200)
                .body("data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\ndata: [DONE]\n");
        });

        let transport = Arc::new(DirectTransport::new_for_tests(&server.base_url(), None));
        let r = TurnRunner::new(transport, ChatCfg::default());
        let mut session = ChatSession::new(PAPER);
        session.restore(ChatState {
            messages: vec![ChatMessage::user("first"), ChatMessage::assistant("one")],
            chat_id: None,
        });
        let outcome = session.send(&r, "second", &mut ()).await.unwrap();
        assert_eq!(outcome.text(), Some("two"));
        assert_eq!(session.messages().len(), 4);
        m.assert();
    }
}
