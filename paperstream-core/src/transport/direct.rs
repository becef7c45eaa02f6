use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::{BackendCfg, Config, TransportMode};
use crate::error::CoreResult;
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::TurnRequest;
use crate::transport::{FrameSource, Transport, TurnCtx};

/// Streams the backend's HTTP response body in-process.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    http: HttpClient,
    backend: BackendCfg,
    bearer: Option<SecretString>,
}

impl DirectTransport {
    pub fn new(http: HttpClient, backend: BackendCfg, bearer: Option<SecretString>) -> Self {
        Self {
            http,
            backend,
            bearer,
        }
    }

    pub fn from_config(cfg: &Config, bearer: Option<SecretString>) -> CoreResult<Self> {
        Ok(Self::new(
            HttpClient::from_cfg(&cfg.http)?,
            cfg.backend.clone(),
            bearer,
        ))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str, token: Option<&str>) -> Self {
        let backend = BackendCfg {
            base_url: server_base.to_string(),
            ..BackendCfg::default()
        };
        DirectTransport::new(
            HttpClient::new_default().unwrap(),
            backend,
            token.map(|t| SecretString::new(t.into())),
        )
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Direct
    }

    async fn open(&self, req: &TurnRequest, ctx: &TurnCtx) -> CoreResult<FrameSource> {
        let url = self.backend.endpoint(req.kind());
        let body = req.wire_body();
        let rctx = RequestCtx {
            request_id: ctx.request_id.as_deref(),
            turn_id: Some(ctx.turn_id.as_str()),
            bearer: self.bearer.as_ref(),
        };
        tracing::debug!(%url, kind = req.kind().as_str(), "opening direct stream");
        self.http.post_stream(&url, &body, &rctx).await
    }
}
