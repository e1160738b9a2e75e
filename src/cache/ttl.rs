//! TTL Expiration Layer
//!
//! Wraps a store, stamping every value with an absolute expiration and
//! refusing to return entries past it. A background sweeper walks the keys on
//! a timer and deletes entries whose expiration has passed, re-reading each
//! one first so a concurrent refresh is never thrown away.
//!
//! Expirations are skewed by a uniform random offset so a burst of writes
//! does not translate into a burst of simultaneous expirations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;

use super::validate::{ctx_live, key_non_empty, not_closed, validate_input, value_not_null};
use super::{Cache, CacheError, CacheValue, SetOutcome, TtlEntry};
use crate::ctx::Ctx;

const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_TICKER_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_GET_BUDGET: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_DELETE_BUDGET: Duration = Duration::from_secs(1);
const DEFAULT_SKEW_PERCENT: i64 = 10;

/// TTL layer knobs. Zero durations and a negative skew fall back to the
/// defaults; a zero skew is honored and disables jitter.
#[derive(Debug, Clone, Copy)]
pub struct TtlParams {
    /// Nominal entry lifetime.
    pub ttl: Duration,
    /// Sweeper wake-up period.
    pub ticker_period: Duration,
    /// Per-tick deadline for listing keys.
    pub sweep_get_budget: Duration,
    /// Per-key deadline for the re-read + delete pair.
    pub sweep_delete_budget: Duration,
    /// Expiration jitter, in percent of `ttl`, applied as ±.
    pub skew_percent: i64,
}

impl Default for TtlParams {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            ticker_period: DEFAULT_TICKER_PERIOD,
            sweep_get_budget: DEFAULT_SWEEP_GET_BUDGET,
            sweep_delete_budget: DEFAULT_SWEEP_DELETE_BUDGET,
            skew_percent: DEFAULT_SKEW_PERCENT,
        }
    }
}

impl TtlParams {
    pub(crate) fn normalized(self) -> Self {
        let d = |value: Duration, fallback: Duration| {
            if value.is_zero() { fallback } else { value }
        };
        Self {
            ttl: d(self.ttl, DEFAULT_TTL),
            ticker_period: d(self.ticker_period, DEFAULT_TICKER_PERIOD),
            sweep_get_budget: d(self.sweep_get_budget, DEFAULT_SWEEP_GET_BUDGET),
            sweep_delete_budget: d(self.sweep_delete_budget, DEFAULT_SWEEP_DELETE_BUDGET),
            skew_percent: if self.skew_percent < 0 {
                DEFAULT_SKEW_PERCENT
            } else {
                self.skew_percent
            },
        }
    }
}

pub struct TtlCache {
    inner: Arc<dyn Cache>,
    params: TtlParams,
    closed: AtomicBool,
    close_started: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl TtlCache {
    /// Wraps `inner` and spawns the sweeper. Requires a tokio runtime.
    pub fn new(inner: Arc<dyn Cache>, params: TtlParams) -> Arc<Self> {
        let params = params.normalized();
        let (stop_tx, stop_rx) = watch::channel(false);

        let cache = Arc::new(Self {
            inner: inner.clone(),
            params,
            closed: AtomicBool::new(false),
            close_started: AtomicBool::new(false),
            stop_tx,
        });

        tokio::spawn(sweep_loop(inner, params, stop_rx));

        cache
    }

    /// Absolute expiration for a value stored now: `now + ttl ± jitter`.
    fn stamp(&self) -> Instant {
        let nominal = Instant::now() + self.params.ttl;
        let skew_range = self.params.ttl.as_nanos() as i64 * self.params.skew_percent / 100;
        if skew_range == 0 {
            return nominal;
        }
        let skew = rand::thread_rng().gen_range(-skew_range..=skew_range);
        if skew >= 0 {
            nominal + Duration::from_nanos(skew as u64)
        } else {
            nominal - Duration::from_nanos((-skew) as u64)
        }
    }
}

#[async_trait]
impl Cache for TtlCache {
    async fn get(&self, ctx: &Ctx, key: &str) -> Result<CacheValue, CacheError> {
        const OP: &str = "ttl/get";

        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
        ])?;

        let entry = match self.inner.get(ctx, key).await? {
            CacheValue::Entry(entry) => entry,
            CacheValue::Plain(_) => {
                return Err(CacheError::TypeCast {
                    op: OP,
                    key: key.to_string(),
                });
            }
        };

        if Instant::now() >= entry.expires_at {
            return Err(CacheError::Expired {
                op: OP,
                key: key.to_string(),
            });
        }

        Ok(CacheValue::Plain(entry.value))
    }

    async fn set(
        &self,
        ctx: &Ctx,
        key: &str,
        value: CacheValue,
    ) -> Result<SetOutcome, CacheError> {
        const OP: &str = "ttl/set";

        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
            value_not_null(&value, OP),
        ])?;

        let entry = TtlEntry {
            value: value.into_inner(),
            expires_at: self.stamp(),
        };
        self.inner.set(ctx, key, CacheValue::Entry(entry)).await
    }

    async fn delete(&self, ctx: &Ctx, key: &str) -> Result<(), CacheError> {
        const OP: &str = "ttl/delete";

        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
        ])?;

        self.inner.delete(ctx, key).await
    }

    async fn keys(&self, ctx: &Ctx) -> Result<Vec<String>, CacheError> {
        const OP: &str = "ttl/keys";

        validate_input([not_closed(&self.closed, OP), ctx_live(ctx, OP)])?;
        self.inner.keys(ctx).await
    }

    async fn len(&self) -> Result<usize, CacheError> {
        const OP: &str = "ttl/len";

        validate_input([not_closed(&self.closed, OP)])?;
        self.inner.len().await
    }

    async fn close(&self, ctx: &Ctx) -> Result<(), CacheError> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        self.inner.close(ctx).await
    }
}

/// Sweeper task: wakes every `ticker_period`, exits when the stop signal
/// fires. Sharing the stop channel with the close path keeps shutdown
/// idempotent.
async fn sweep_loop(inner: Arc<dyn Cache>, params: TtlParams, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(params.ticker_period);
    // interval fires immediately; the first sweep should wait a full period.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep_once(&inner, &params).await,
            changed = stop_rx.changed() => {
                // A dropped sender means the handle is gone; stop either way.
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// One sweep pass: list keys under the get budget, then re-check each key
/// under the delete budget. A pass that overruns a budget is abandoned; the
/// next tick retries.
async fn sweep_once(inner: &Arc<dyn Cache>, params: &TtlParams) {
    let ctx = Ctx::with_timeout(params.sweep_get_budget);
    let keys = match inner.keys(&ctx).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("sweep: failed to list keys: {}", e);
            return;
        }
    };

    for key in keys {
        delete_if_expired(inner, params, &key).await;
    }
}

async fn delete_if_expired(inner: &Arc<dyn Cache>, params: &TtlParams, key: &str) {
    let ctx = Ctx::with_timeout(params.sweep_delete_budget);

    // Re-read before deleting: a concurrent set may have refreshed the entry
    // since the keys were listed.
    let entry = match inner.get(&ctx, key).await {
        Ok(CacheValue::Entry(entry)) => entry,
        Ok(CacheValue::Plain(_)) => {
            tracing::error!("sweep: key {} holds an unexpected stored shape", key);
            return;
        }
        Err(CacheError::NotFound { .. }) => return,
        Err(e) => {
            tracing::warn!("sweep: failed to get key {}: {}", key, e);
            return;
        }
    };

    if Instant::now() < entry.expires_at {
        return;
    }

    if let Err(e) = inner.delete(&ctx, key).await {
        tracing::warn!("sweep: failed to delete key {}: {}", key, e);
    }
}
