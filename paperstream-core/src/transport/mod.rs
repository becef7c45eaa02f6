//! Transport adapters: one connection per turn, frames delivered in arrival order.
//!
//! `direct` streams the HTTP response body itself; `relay` has a broker task
//! do that and republish every frame as a discrete message. Neither retries.

pub mod direct;
pub mod relay;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::Stream;
use secrecy::SecretString;

pub use direct::DirectTransport;
pub use relay::{RelayMessage, RelayTransport};

use crate::config::{Config, TransportMode};
use crate::error::CoreResult;
use crate::frame::Frame;
use crate::model::TurnRequest;

/// Decoded frames of one turn. An `Err` item means the link dropped; nothing
/// follows it.
pub type FrameSource = Pin<Box<dyn Stream<Item = CoreResult<Frame>> + Send>>;

/// Correlation data attached to an outgoing turn.
#[derive(Debug, Clone, Default)]
pub struct TurnCtx {
    pub turn_id: String,
    pub request_id: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Open the connection for `req`. Errors here mean nothing was streamed.
    async fn open(&self, req: &TurnRequest, ctx: &TurnCtx) -> CoreResult<FrameSource>;
}

/// Build the transport selected by configuration.
pub fn from_config(cfg: &Config, bearer: Option<SecretString>) -> CoreResult<Arc<dyn Transport>> {
    let direct = DirectTransport::from_config(cfg, bearer)?;
    Ok(match cfg.transport.mode {
        TransportMode::Direct => Arc::new(direct),
        TransportMode::Relay => Arc::new(RelayTransport::new(
            Arc::new(direct),
            cfg.transport.relay_buffer,
        )),
    })
}

/// Read the bearer credential named by `auth.token_env`, if set.
pub fn bearer_from_env(cfg: &Config) -> Option<SecretString> {
    std::env::var(&cfg.auth.token_env)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .map(|t| SecretString::new(t.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_selects_transport() {
        let mut cfg = Config::default();
        assert_eq!(from_config(&cfg, None).unwrap().mode(), TransportMode::Direct);
        cfg.transport.mode = TransportMode::Relay;
        assert_eq!(from_config(&cfg, None).unwrap().mode(), TransportMode::Relay);
    }

    #[test]
    fn blank_token_is_ignored() {
        let mut cfg = Config::default();
        cfg.auth.token_env = "PAPERSTREAM_TEST_UNSET_TOKEN_VAR".into();
        assert!(bearer_from_env(&cfg).is_none());
    }
}
