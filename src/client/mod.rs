//! Upstream Store Client
//!
//! Stateless HTTP client for the authoritative backend. Each call carries the
//! request's correlation headers (`X-Request-ID`, trace context), is bounded
//! by the shorter of the configured per-request timeout and the caller's
//! deadline, and maps the upstream's status to a closed error taxonomy.


use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ctx::Ctx;
use crate::http::protocol::{Body, encode_key};
use crate::http::request_id::{
    REQUEST_ID_HEADER, RequestMeta, TRACEPARENT_HEADER, TRACESTATE_HEADER,
};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The upstream reported authoritative absence (404).
    #[error("key {0}: not found upstream")]
    NotFound(String),

    /// The upstream failed internally (500).
    #[error("upstream internal error")]
    UpstreamInternal,

    /// The upstream answered outside its contract.
    #[error("unexpected upstream response: status {status}: {body}")]
    Protocol { status: u16, body: String },

    /// I/O failure, timeout, or a cancelled request context.
    #[error("transport failure: {detail}")]
    Transport { detail: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport {
            detail: err.to_string(),
        }
    }
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// The upstream contract the service layer composes against.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(
        &self,
        ctx: &Ctx,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<serde_json::Value, ClientError>;

    /// Returns the upstream's status code (200/201/204) on success.
    async fn set(
        &self,
        ctx: &Ctx,
        key: &str,
        value: &serde_json::Value,
        meta: &RequestMeta,
    ) -> Result<u16, ClientError>;

    async fn delete(&self, ctx: &Ctx, key: &str, meta: &RequestMeta) -> Result<(), ClientError>;
}

pub struct HttpBackend {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl HttpBackend {
    /// `base` is the full storage URL of the backend tier, e.g.
    /// `http://backend:8080/storage`.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let base = base.into();
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/{}", self.base, encode_key(key))
    }

    /// The caller's remaining deadline caps the configured request budget.
    fn effective_timeout(&self, ctx: &Ctx) -> Duration {
        match ctx.remaining() {
            Some(remaining) => remaining.min(self.timeout),
            None => self.timeout,
        }
    }

    fn prepare(
        &self,
        builder: reqwest::RequestBuilder,
        ctx: &Ctx,
        meta: &RequestMeta,
    ) -> reqwest::RequestBuilder {
        let builder = builder
            .timeout(self.effective_timeout(ctx))
            .header(REQUEST_ID_HEADER, &meta.request_id)
            .header(TRACEPARENT_HEADER, &meta.traceparent);
        match &meta.tracestate {
            Some(state) => builder.header(TRACESTATE_HEADER, state),
            None => builder,
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get(
        &self,
        ctx: &Ctx,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<serde_json::Value, ClientError> {
        if let Some(err) = ctx.err() {
            return Err(ClientError::Transport {
                detail: err.to_string(),
            });
        }

        let response = self
            .prepare(self.http.get(self.key_url(key)), ctx, meta)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(key.to_string()));
        }
        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ClientError::UpstreamInternal);
        }

        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Protocol {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        match serde_json::from_slice::<Body>(&bytes) {
            Ok(body) => Ok(body.value),
            Err(_) => Err(scan_legacy_body(status.as_u16(), &bytes, key)),
        }
    }

    async fn set(
        &self,
        ctx: &Ctx,
        key: &str,
        value: &serde_json::Value,
        meta: &RequestMeta,
    ) -> Result<u16, ClientError> {
        if let Some(err) = ctx.err() {
            return Err(ClientError::Transport {
                detail: err.to_string(),
            });
        }

        let body = Body {
            key: key.to_string(),
            value: value.clone(),
        };
        let response = self
            .prepare(self.http.put(&self.base).json(&body), ctx, meta)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(key.to_string()));
        }
        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ClientError::UpstreamInternal);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        Ok(status.as_u16())
    }

    async fn delete(&self, ctx: &Ctx, key: &str, meta: &RequestMeta) -> Result<(), ClientError> {
        if let Some(err) = ctx.err() {
            return Err(ClientError::Transport {
                detail: err.to_string(),
            });
        }

        let response = self
            .prepare(self.http.delete(self.key_url(key)), ctx, meta)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(key.to_string()));
        }
        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ClientError::UpstreamInternal);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Legacy compatibility branch: an upstream revision answered 2xx with a
/// plain-text error payload instead of JSON. Recognize the known phrases and
/// map them onto the error kinds; anything else is a protocol violation.
fn scan_legacy_body(status: u16, bytes: &[u8], key: &str) -> ClientError {
    let text = String::from_utf8_lossy(bytes);

    if text.contains("not found") {
        return ClientError::NotFound(key.to_string());
    }
    if text.contains("internal server error") {
        return ClientError::UpstreamInternal;
    }
    if text.contains("malformed request") {
        return ClientError::Protocol {
            status,
            body: text.into_owned(),
        };
    }

    ClientError::Protocol {
        status,
        body: text.into_owned(),
    }
}
