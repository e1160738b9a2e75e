//! Read-Through / Write-Through Service Layer
//!
//! Composes the local cache with the authoritative upstream. The cache is an
//! accelerator only: reads consult it first and populate it on a miss, writes
//! update it opportunistically, and a cache fault of any kind downgrades to a
//! miss plus an upstream round trip instead of failing the request.


use std::sync::Arc;

use crate::cache::{Cache, CacheValue};
use crate::client::{Backend, ClientError};
use crate::ctx::Ctx;
use crate::http::request_id::RequestMeta;

pub struct Service {
    cache: Arc<dyn Cache>,
    backend: Arc<dyn Backend>,
}

impl Service {
    pub fn new(cache: Arc<dyn Cache>, backend: Arc<dyn Backend>) -> Self {
        Self { cache, backend }
    }

    /// Read-through get: cache first, upstream on a miss, with best-effort
    /// population of the fetched value.
    pub async fn get(
        &self,
        ctx: &Ctx,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<serde_json::Value, ClientError> {
        match self.cache.get(ctx, key).await {
            Ok(value) => {
                tracing::debug!("cache hit for key {}", key);
                Ok(value.into_inner())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("cache miss for key {}", key);
                self.fetch_and_populate(ctx, key, meta).await
            }
            Err(e) => {
                // Expired, typecast, closed: anything the cache reports is
                // demoted to a miss so the request can still succeed.
                tracing::warn!("cache error for key {}, treating as miss: {}", key, e);
                self.fetch_and_populate(ctx, key, meta).await
            }
        }
    }

    /// Write-through set. The upstream is authoritative: its status is what
    /// the caller sees, and a failed local write must not fail the request.
    pub async fn set(
        &self,
        ctx: &Ctx,
        key: &str,
        value: &serde_json::Value,
        meta: &RequestMeta,
    ) -> Result<u16, ClientError> {
        if let Err(e) = self
            .cache
            .set(ctx, key, CacheValue::Plain(value.clone()))
            .await
        {
            tracing::error!("could not update cache for key {}: {}", key, e);
        }

        self.backend.set(ctx, key, value, meta).await
    }

    /// Mirror of `set`: best-effort local delete, authoritative upstream
    /// delete.
    pub async fn delete(
        &self,
        ctx: &Ctx,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<(), ClientError> {
        if let Err(e) = self.cache.delete(ctx, key).await {
            tracing::error!("could not delete key {} from cache: {}", key, e);
        }

        self.backend.delete(ctx, key, meta).await
    }

    async fn fetch_and_populate(
        &self,
        ctx: &Ctx,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<serde_json::Value, ClientError> {
        let value = self.backend.get(ctx, key, meta).await?;

        if let Err(e) = self
            .cache
            .set(ctx, key, CacheValue::Plain(value.clone()))
            .await
        {
            tracing::warn!("could not populate cache for key {}: {}", key, e);
        }

        Ok(value)
    }
}
