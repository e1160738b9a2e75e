//! Composable Key/Value Store Stack
//!
//! The store is assembled from layers that all speak the same [`Cache`]
//! trait: a synchronized map at the bottom, a TTL expiration layer wrapping
//! it, and a sharded layer spreading keys over several TTL instances to cut
//! lock contention.
//!
//! ## Layering
//! - **`sync_map`**: the bottom store. Thread-safe point operations over a
//!   concurrent map, with a close-once guard and deadline-aware enumeration.
//! - **`ttl`**: wraps a store, stamping every value with a jittered absolute
//!   expiration and sweeping expired keys on a timer.
//! - **`sharded`**: wraps N stores, routing each key to a shard by hash and
//!   fanning enumeration out in parallel.
//!
//! Each layer exclusively owns what it wraps; `close` walks the ownership
//! tree top-down, quiescing background work before closing children.

pub mod errors;
pub mod sharded;
pub mod sync_map;
pub mod ttl;
pub mod validate;


use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::ctx::Ctx;
pub use errors::CacheError;
pub use sharded::ShardedCache;
pub use sync_map::{SyncMapParams, SyncMapStore};
pub use ttl::{TtlCache, TtlParams};

/// A value as the store stack holds it.
///
/// The TTL layer writes `Entry` into its inner store and hands `Plain` back
/// to callers; bare stores hold `Plain` directly. A layer reading a shape it
/// did not write reports [`CacheError::TypeCast`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Plain(serde_json::Value),
    Entry(TtlEntry),
}

/// An opaque payload plus its absolute expiration instant.
///
/// Equality includes the expiration stamp, so two TTL-layer writes of the
/// same payload never compare equal (each write re-stamps with jitter).
#[derive(Debug, Clone, PartialEq)]
pub struct TtlEntry {
    pub value: serde_json::Value,
    pub expires_at: Instant,
}

impl CacheValue {
    /// Unwraps to the opaque payload, regardless of shape.
    pub fn into_inner(self) -> serde_json::Value {
        match self {
            CacheValue::Plain(value) => value,
            CacheValue::Entry(entry) => entry.value,
        }
    }

    /// True for a JSON `null` payload, which the stores reject on `set`.
    pub fn is_null(&self) -> bool {
        match self {
            CacheValue::Plain(value) => value.is_null(),
            CacheValue::Entry(entry) => entry.value.is_null(),
        }
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Plain(value)
    }
}

/// What a `set` did, and the HTTP status advertising it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The key was absent.
    Created,
    /// The key existed with a different value.
    Updated,
    /// The key existed with an equal value; nothing was written.
    Unchanged,
}

impl SetOutcome {
    pub fn status_code(self) -> u16 {
        match self {
            SetOutcome::Created => 201,
            SetOutcome::Updated => 200,
            SetOutcome::Unchanged => 204,
        }
    }
}

/// The store contract every layer implements.
///
/// All operations except `close` fail with [`CacheError::Closed`] once the
/// handle is closed; `close` itself is idempotent and returns `Ok` on repeat
/// calls.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, ctx: &Ctx, key: &str) -> Result<CacheValue, CacheError>;
    async fn set(&self, ctx: &Ctx, key: &str, value: CacheValue)
        -> Result<SetOutcome, CacheError>;
    async fn delete(&self, ctx: &Ctx, key: &str) -> Result<(), CacheError>;
    /// Point-in-time best-effort snapshot of the keys.
    async fn keys(&self, ctx: &Ctx) -> Result<Vec<String>, CacheError>;
    async fn len(&self) -> Result<usize, CacheError>;
    async fn close(&self, ctx: &Ctx) -> Result<(), CacheError>;
}

/// The API tier's cache: a sharded layer over TTL-wrapped sync-map stores.
///
/// Requires a tokio runtime; every TTL shard spawns its own sweeper task.
pub fn sharded_ttl_stack(shard_count: usize, ttl: TtlParams) -> Arc<dyn Cache> {
    ShardedCache::new(
        move || {
            let store: Arc<dyn Cache> = Arc::new(SyncMapStore::default());
            TtlCache::new(store, ttl) as Arc<dyn Cache>
        },
        shard_count,
    )
}
