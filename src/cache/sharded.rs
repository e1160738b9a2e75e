//! Sharded Store Layer
//!
//! Spreads keys over a fixed set of independent shards to reduce lock
//! contention. Routing is deterministic: a 64-bit hash of the key modulo the
//! shard count, with the empty key pinned to shard 0 as a fallback.
//!
//! Point operations take a shared lease on the shard table and forward to one
//! shard after re-validation, so validation errors surface uniformly across
//! layers. Enumeration fans out one task per shard and joins them all; close
//! takes the exclusive lease, closes every shard, and clears the table.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use super::validate::{ctx_live, key_non_empty, not_closed, validate_input, value_not_null};
use super::{Cache, CacheError, CacheValue, SetOutcome};
use crate::ctx::Ctx;

pub const DEFAULT_SHARD_COUNT: usize = 10;
const FALLBACK_SHARD: usize = 0;

pub struct ShardedCache {
    shard_count: usize,
    shards: RwLock<Vec<Arc<dyn Cache>>>,
    closed: AtomicBool,
    close_started: AtomicBool,
}

impl ShardedCache {
    /// Builds `shard_count` shards from the factory. A non-positive count is
    /// replaced with the default. The shard count is immutable afterwards.
    pub fn new<F>(init: F, shard_count: usize) -> Arc<Self>
    where
        F: Fn() -> Arc<dyn Cache>,
    {
        let shard_count = if shard_count == 0 {
            DEFAULT_SHARD_COUNT
        } else {
            shard_count
        };

        let shards: Vec<Arc<dyn Cache>> = (0..shard_count).map(|_| init()).collect();

        Arc::new(Self {
            shard_count,
            shards: RwLock::new(shards),
            closed: AtomicBool::new(false),
            close_started: AtomicBool::new(false),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

/// Maps a key to its shard. Deterministic for the life of the process, which
/// is the scope an in-memory store needs.
pub fn shard_of(key: &str, shard_count: usize) -> usize {
    if key.is_empty() {
        return FALLBACK_SHARD;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shard_count as u64) as usize
}

#[async_trait]
impl Cache for ShardedCache {
    async fn get(&self, ctx: &Ctx, key: &str) -> Result<CacheValue, CacheError> {
        const OP: &str = "sharded/get";

        let shards = self.shards.read().await;
        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
        ])?;

        shards[shard_of(key, self.shard_count)].get(ctx, key).await
    }

    async fn set(
        &self,
        ctx: &Ctx,
        key: &str,
        value: CacheValue,
    ) -> Result<SetOutcome, CacheError> {
        const OP: &str = "sharded/set";

        let shards = self.shards.read().await;
        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
            value_not_null(&value, OP),
        ])?;

        shards[shard_of(key, self.shard_count)]
            .set(ctx, key, value)
            .await
    }

    async fn delete(&self, ctx: &Ctx, key: &str) -> Result<(), CacheError> {
        const OP: &str = "sharded/delete";

        let shards = self.shards.read().await;
        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
        ])?;

        shards[shard_of(key, self.shard_count)]
            .delete(ctx, key)
            .await
    }

    async fn keys(&self, ctx: &Ctx) -> Result<Vec<String>, CacheError> {
        const OP: &str = "sharded/keys";

        let shards = self.shards.read().await;
        validate_input([not_closed(&self.closed, OP), ctx_live(ctx, OP)])?;

        let (result_tx, mut result_rx) = mpsc::channel::<Vec<String>>(self.shard_count);
        let (err_tx, mut err_rx) = mpsc::channel::<CacheError>(self.shard_count);

        let mut workers = Vec::with_capacity(self.shard_count);
        for (idx, shard) in shards.iter().enumerate() {
            let shard = shard.clone();
            let ctx = ctx.clone();
            let result_tx = result_tx.clone();
            let err_tx = err_tx.clone();

            workers.push(tokio::spawn(async move {
                match shard.keys(&ctx).await {
                    Ok(keys) => {
                        let _ = result_tx.send(keys).await;
                    }
                    Err(source) => {
                        let _ = err_tx
                            .send(CacheError::Shard {
                                op: OP,
                                shard: idx,
                                source: Box::new(source),
                            })
                            .await;
                    }
                }
            }));
        }
        drop(result_tx);
        drop(err_tx);

        for worker in workers {
            let _ = worker.await;
        }

        if let Some(err) = err_rx.recv().await {
            return Err(err);
        }

        let mut all = Vec::new();
        while let Some(mut keys) = result_rx.recv().await {
            all.append(&mut keys);
        }
        Ok(all)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        const OP: &str = "sharded/len";

        let shards = self.shards.read().await;
        validate_input([not_closed(&self.closed, OP)])?;

        let mut total = 0;
        for (idx, shard) in shards.iter().enumerate() {
            total += shard.len().await.map_err(|source| CacheError::Shard {
                op: OP,
                shard: idx,
                source: Box::new(source),
            })?;
        }
        Ok(total)
    }

    async fn close(&self, ctx: &Ctx) -> Result<(), CacheError> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut shards = self.shards.write().await;

        let mut failures = Vec::new();
        for (idx, shard) in shards.iter().enumerate() {
            if let Err(e) = shard.close(ctx).await {
                failures.push(format!("shard {}: {}", idx, e));
            }
        }

        shards.clear();
        self.closed.store(true, Ordering::SeqCst);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::CloseFailed {
                failures: failures.join("; "),
            })
        }
    }
}
