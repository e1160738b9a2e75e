//! Storage API Handlers
//!
//! HTTP endpoints for both tiers. The API tier's handlers go through the
//! service layer (cache + upstream); the backend tier's handlers call the
//! store directly. Both enforce the same surface: path keys must be
//! URL-encoded, bodies are `{key, value}` JSON, and the store's set outcome
//! is what picks the success status.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, OriginalUri, Path};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::protocol::{Body, ENDPOINT_STORAGE, key_is_url_encoded};
use super::request_id::RequestMeta;
use crate::cache::{Cache, CacheError, CacheValue};
use crate::ctx::Ctx;
use crate::service::Service;

/// Validates the path key: present, and properly URL-encoded on the wire.
fn key_from_path(uri: &Uri, decoded: &str) -> Result<String, &'static str> {
    if decoded.is_empty() {
        return Err("no key provided");
    }

    let prefix = format!("{}/", ENDPOINT_STORAGE);
    let raw_tail = uri.path().strip_prefix(prefix.as_str()).unwrap_or(decoded);
    if !key_is_url_encoded(raw_tail, decoded) {
        return Err("key must be URL-encoded");
    }

    Ok(decoded.to_string())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// ============================================================
// API TIER (service-backed)
// ============================================================

pub async fn handle_api_get(
    Extension(svc): Extension<Arc<Service>>,
    Extension(meta): Extension<RequestMeta>,
    Extension(ctx): Extension<Ctx>,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
) -> Response {
    let key = match key_from_path(&uri, &key) {
        Ok(key) => key,
        Err(message) => {
            tracing::error!("malformed request: {}", message);
            return bad_request(message);
        }
    };

    match svc.get(&ctx, &key, &meta).await {
        Ok(value) => (StatusCode::OK, Json(Body { key, value })).into_response(),
        Err(e) if e.is_not_found() => {
            tracing::warn!("key {} not found", key);
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::error!("failed to get key {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn handle_api_put(
    Extension(svc): Extension<Arc<Service>>,
    Extension(meta): Extension<RequestMeta>,
    Extension(ctx): Extension<Ctx>,
    body: Result<Json<Body>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if body.key.is_empty() {
        tracing::error!("malformed request: no key provided");
        return bad_request("no key provided");
    }

    tracing::debug!("request key {}", body.key);

    match svc.set(&ctx, &body.key, &body.value, &meta).await {
        Ok(status) => {
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK).into_response()
        }
        Err(e) => {
            tracing::error!("failed to set key {}: {}", body.key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn handle_api_delete(
    Extension(svc): Extension<Arc<Service>>,
    Extension(meta): Extension<RequestMeta>,
    Extension(ctx): Extension<Ctx>,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
) -> Response {
    let key = match key_from_path(&uri, &key) {
        Ok(key) => key,
        Err(message) => {
            tracing::error!("malformed request: {}", message);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match svc.delete(&ctx, &key, &meta).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!("failed to delete key {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================
// BACKEND TIER (store-backed)
// ============================================================

/// Maps a store failure to the backend tier's HTTP surface. Absence and
/// expiry both read as 404 outside the store stack; validation failures are
/// the caller's fault.
fn storage_error_status(err: &CacheError) -> StatusCode {
    match err {
        CacheError::NotFound { .. } | CacheError::Expired { .. } => StatusCode::NOT_FOUND,
        CacheError::EmptyKey { .. } | CacheError::NullValue { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_storage_get(
    Extension(store): Extension<Arc<dyn Cache>>,
    Extension(ctx): Extension<Ctx>,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
) -> Response {
    let key = match key_from_path(&uri, &key) {
        Ok(key) => key,
        Err(message) => {
            tracing::error!("malformed request: {}", message);
            return bad_request(message);
        }
    };

    match store.get(&ctx, &key).await {
        Ok(value) => {
            let body = Body {
                key,
                value: value.into_inner(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            let status = storage_error_status(&e);
            if status == StatusCode::NOT_FOUND {
                tracing::warn!("key {} not found", key);
            } else {
                tracing::error!("failed to get key {}: {}", key, e);
            }
            status.into_response()
        }
    }
}

pub async fn handle_storage_put(
    Extension(store): Extension<Arc<dyn Cache>>,
    Extension(ctx): Extension<Ctx>,
    body: Result<Json<Body>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if body.key.is_empty() {
        tracing::error!("malformed request: no key provided");
        return bad_request("no key provided");
    }

    tracing::debug!("request key {}", body.key);

    match store
        .set(&ctx, &body.key, CacheValue::Plain(body.value))
        .await
    {
        Ok(outcome) => StatusCode::from_u16(outcome.status_code())
            .unwrap_or(StatusCode::OK)
            .into_response(),
        Err(e) => {
            let status = storage_error_status(&e);
            tracing::error!("failed to set key {}: {}", body.key, e);
            status.into_response()
        }
    }
}

pub async fn handle_storage_delete(
    Extension(store): Extension<Arc<dyn Cache>>,
    Extension(ctx): Extension<Ctx>,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
) -> Response {
    let key = match key_from_path(&uri, &key) {
        Ok(key) => key,
        Err(message) => {
            tracing::error!("malformed request: {}", message);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match store.delete(&ctx, &key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!("failed to delete key {}: {}", key, e);
            storage_error_status(&e).into_response()
        }
    }
}
