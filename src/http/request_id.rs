//! Request Correlation Middleware
//!
//! Every request gets an `X-Request-ID` (taken from the caller or assigned
//! here) and a W3C trace context (captured from the caller or minted here).
//! Both travel in the request extensions as [`RequestMeta`] together with the
//! request's [`Ctx`], and the request ID is mirrored on the response so
//! callers can correlate.

use axum::extract::Request;
use axum::http::{HeaderValue, header::HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

use super::trace;
use crate::ctx::Ctx;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Per-request correlation data, carried in request extensions and injected
/// into outbound upstream calls.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub traceparent: String,
    pub tracestate: Option<String>,
}

impl RequestMeta {
    /// A fresh meta with generated IDs, for callers outside the HTTP path.
    pub fn generate() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            traceparent: trace::mint_traceparent(),
            tracestate: None,
        }
    }
}

fn header_str(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

pub async fn request_meta_middleware(mut req: Request, next: Next) -> Response {
    let request_id =
        header_str(&req, REQUEST_ID_HEADER).unwrap_or_else(|| Uuid::new_v4().to_string());

    let traceparent = header_str(&req, TRACEPARENT_HEADER)
        .filter(|v| trace::is_valid_traceparent(v))
        .unwrap_or_else(trace::mint_traceparent);
    let tracestate = header_str(&req, TRACESTATE_HEADER);

    let meta = RequestMeta {
        request_id: request_id.clone(),
        traceparent,
        tracestate,
    };

    req.extensions_mut().insert(meta);
    req.extensions_mut().insert(Ctx::background());

    // The request span is the crate's per-call logger: everything the
    // handler, service, and client log inherits these fields.
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = async {
        let response = next.run(req).await;
        tracing::info!("request finished with status {}", response.status());
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}
