use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, PaperStreamError};
use crate::frame::FrameStream;
use crate::transport::FrameSource;

/// Request context carries tracing IDs and the caller's opaque credential.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub turn_id: Option<&'a str>,
    pub bearer: Option<&'a SecretString>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        // No total timeout: it would also bound the body, cutting off long streams.
        let mut builder = Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(ms) = cfg.read_timeout_ms {
            builder = builder.read_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| PaperStreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: format!("paperstream/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// POST JSON and return the response body as a stream of decoded frames.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<FrameSource> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        if let Some(token) = ctx.bearer {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(tid) = ctx.turn_id {
            req = req.header("X-Turn-Id", tid);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PaperStreamError::transport(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }

        Ok(Box::pin(FrameStream::new(Box::pin(resp.bytes_stream()))))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> PaperStreamError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaperStreamError::Unauthorized {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => PaperStreamError::RateLimited { retry_after },
        s if s.is_server_error() => PaperStreamError::Unavailable { status: s.as_u16() },
        s => PaperStreamError::Http {
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use futures::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_stream_sends_headers_and_decodes_frames() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/openai/chat/completions")
                .header("authorization", "Bearer s3cret")
                .header("accept", "text/event-stream")
                .header("x-turn-id", "t-1");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: {\"chat_id\":\"c1\"}\n\ndata: [DONE]\n");
        });

        let client = HttpClient::new_default().unwrap();
        let token = SecretString::new("s3cret".into());
        let ctx = RequestCtx {
            request_id: None,
            turn_id: Some("t-1"),
            bearer: Some(&token),
        };
        let url = server.url("/openai/chat/completions");
        let frames: Vec<_> = client
            .post_stream(&url, &json!({"stream": true}), &ctx)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Ok(Frame::Data(_))));
        assert!(matches!(frames[1], Ok(Frame::Done)));
        m.assert();
    }

    #[tokio::test]
    async fn slow_backend_is_not_cut_off_by_default() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/resume");
            then.status(200)
                .delay(std::time::Duration::from_millis(300))
                .body("data: {\"type\":\"status\",\"content\":\"slow\"}\n");
        });
        let client = HttpClient::from_cfg(&HttpCfg {
            connect_timeout_ms: 100,
            ..HttpCfg::default()
        })
        .expect("client");
        let frames: Vec<_> = client
            .post_stream(&server.url("/resume"), &json!({}), &RequestCtx::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Ok(Frame::Data(_))));
    }

    #[tokio::test]
    async fn configured_read_timeout_is_a_transport_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/resume");
            then.status(200).delay(std::time::Duration::from_secs(2)).body("");
        });
        let client = HttpClient::from_cfg(&HttpCfg {
            read_timeout_ms: Some(100),
            ..HttpCfg::default()
        })
        .expect("client");
        let err = client
            .post_stream(&server.url("/resume"), &json!({}), &RequestCtx::default())
            .await
            .err()
            .expect("idle backend should time out");
        assert!(matches!(err, PaperStreamError::Transport { .. }));
    }

    #[tokio::test]
    async fn status_401_maps_to_unauthorized() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(401).body("no token");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(&server.url("/chat"), &json!({}), &RequestCtx::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, PaperStreamError::Unauthorized { status: 401 }));
    }

    #[tokio::test]
    async fn status_429_keeps_retry_after() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(429).header("Retry-After", "2").body("slow down");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(&server.url("/chat"), &json!({}), &RequestCtx::default())
            .await
            .err()
            .expect("should fail");
        match err {
            PaperStreamError::RateLimited { retry_after } => assert_eq!(retry_after, Some(2)),
            other => panic!("expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_503_maps_to_unavailable() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503).body("oops");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(&server.url("/chat"), &json!({}), &RequestCtx::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, PaperStreamError::Unavailable { status: 503 }));
    }

    #[tokio::test]
    async fn status_422_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(422).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(&server.url("/chat"), &json!({}), &RequestCtx::default())
            .await
            .err()
            .expect("should fail");
        match err {
            PaperStreamError::Http { code, message } => {
                assert_eq!(code, "422");
                assert!(message.ends_with("..."));
                assert!(message.len() <= 303);
            }
            other => panic!("expected Http error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_transport() {
        // Port 9 (discard) is typically closed.
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream("http://127.0.0.1:9/chat", &json!({}), &RequestCtx::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, PaperStreamError::Transport { .. }));
    }
}
