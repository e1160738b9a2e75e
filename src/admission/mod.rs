//! Bounded Admission Control
//!
//! Caps the number of concurrently running requests at `N` and the number of
//! requests in the system (running + queued) at `N + W`. Arrivals beyond the
//! cap are rejected immediately with a retry hint; arrivals within it either
//! run at once or queue for a token.
//!
//! The bound is on concurrency, not rate: a token is held for the life of a
//! request and released when it departs. Counters are plain atomics mirrored
//! into registered Prometheus series for scraping; the admission decision
//! itself uses the semaphore plus the single add that registered the
//! arrival, never a separate counter read.

pub mod metrics;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::Registry;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::ctx::Ctx;

const DEFAULT_MAX_RUNNING: i64 = 100;
const DEFAULT_MAX_WAITING: i64 = 100;
const DEFAULT_RETRY_AFTER_SECS: i64 = 1;

/// Admission knobs. Anything below 1 is replaced with its default.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionParams {
    pub max_running: i64,
    pub max_waiting: i64,
    pub retry_after_secs: i64,
}

impl Default for AdmissionParams {
    fn default() -> Self {
        Self {
            max_running: DEFAULT_MAX_RUNNING,
            max_waiting: DEFAULT_MAX_WAITING,
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        }
    }
}

impl AdmissionParams {
    pub(crate) fn normalized(self) -> Self {
        let mut p = self;
        if p.max_running < 1 {
            tracing::warn!(
                "max_running {} is below 1, using default {}",
                p.max_running,
                DEFAULT_MAX_RUNNING
            );
            p.max_running = DEFAULT_MAX_RUNNING;
        }
        if p.max_waiting < 1 {
            tracing::warn!(
                "max_waiting {} is below 1, using default {}",
                p.max_waiting,
                DEFAULT_MAX_WAITING
            );
            p.max_waiting = DEFAULT_MAX_WAITING;
        }
        if p.retry_after_secs < 1 {
            tracing::warn!(
                "retry_after {} is below 1, using default {}",
                p.retry_after_secs,
                DEFAULT_RETRY_AFTER_SECS
            );
            p.retry_after_secs = DEFAULT_RETRY_AFTER_SECS;
        }
        p
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Running plus queued requests already fill `N + W`.
    #[error("too many requests")]
    TooMany,
    /// The request's context ended while it was queued for a token.
    #[error("timed out waiting for an admission token")]
    WaitTimeout,
}

/// Observability counters at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub running: i64,
    pub in_system: i64,
    pub rejected: i64,
    pub timed_out: i64,
    pub total_seen: i64,
}

pub struct RateLimiter {
    semaphore: Semaphore,
    max_running: i64,
    max_waiting: i64,
    retry_after_secs: i64,

    running: AtomicI64,
    in_system: AtomicI64,
    rejected: AtomicI64,
    timed_out: AtomicI64,
    total_seen: AtomicI64,

    registry: Registry,
    metrics: metrics::AdmissionMetrics,
}

impl RateLimiter {
    pub fn new(params: AdmissionParams) -> Arc<Self> {
        let params = params.normalized();
        let registry = Registry::new();
        let metrics = metrics::AdmissionMetrics::register(&registry);

        Arc::new(Self {
            semaphore: Semaphore::new(params.max_running as usize),
            max_running: params.max_running,
            max_waiting: params.max_waiting,
            retry_after_secs: params.retry_after_secs,
            running: AtomicI64::new(0),
            in_system: AtomicI64::new(0),
            rejected: AtomicI64::new(0),
            timed_out: AtomicI64::new(0),
            total_seen: AtomicI64::new(0),
            registry,
            metrics,
        })
    }

    /// Admits, queues, or rejects one request.
    ///
    /// The returned permit releases the token and settles the counters when
    /// dropped; hold it for the life of the request.
    pub async fn admit(&self, ctx: &Ctx) -> Result<AdmissionPermit<'_>, AdmissionError> {
        self.total_seen.fetch_add(1, Ordering::Relaxed);
        self.metrics.total.inc();

        // Register the arrival. The value returned by this add is the
        // admission decision input; departures (including rejects) are the
        // entry guard's drop.
        let in_system = self.in_system.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.in_system.inc();
        let entry = EntryGuard { limiter: self };

        if in_system > self.max_running + self.max_waiting {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            self.metrics.rejected.inc();
            return Err(AdmissionError::TooMany);
        }

        let permit = match ctx.remaining() {
            Some(remaining) => {
                match tokio::time::timeout(remaining, self.semaphore.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    // The semaphore is never closed while the limiter lives.
                    Ok(Err(_)) | Err(_) => {
                        self.timed_out.fetch_add(1, Ordering::Relaxed);
                        self.metrics.timed_out.inc();
                        return Err(AdmissionError::WaitTimeout);
                    }
                }
            }
            None => {
                if ctx.is_done() {
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                    self.metrics.timed_out.inc();
                    return Err(AdmissionError::WaitTimeout);
                }
                match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.timed_out.fetch_add(1, Ordering::Relaxed);
                        self.metrics.timed_out.inc();
                        return Err(AdmissionError::WaitTimeout);
                    }
                }
            }
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        self.metrics.running.inc();

        Ok(AdmissionPermit {
            limiter: self,
            _permit: permit,
            _entry: entry,
        })
    }

    pub fn retry_after_secs(&self) -> i64 {
        self.retry_after_secs
    }

    /// The registry the `/metrics` handler gathers from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn max_running(&self) -> i64 {
        self.max_running
    }

    pub fn max_waiting(&self) -> i64 {
        self.max_waiting
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            running: self.running.load(Ordering::SeqCst),
            in_system: self.in_system.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            total_seen: self.total_seen.load(Ordering::Relaxed),
        }
    }
}

/// Departure bookkeeping: decrements the in-system gauge when the request
/// leaves, whether it ran or was rejected.
struct EntryGuard<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.limiter.in_system.fetch_sub(1, Ordering::SeqCst);
        self.limiter.metrics.in_system.dec();
    }
}

/// Held for the duration of an admitted request. Dropping it releases the
/// token, decrements the running gauge, and registers the departure.
pub struct AdmissionPermit<'a> {
    limiter: &'a RateLimiter,
    _permit: SemaphorePermit<'a>,
    _entry: EntryGuard<'a>,
}

impl std::fmt::Debug for AdmissionPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish()
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.limiter.running.fetch_sub(1, Ordering::SeqCst);
        self.limiter.metrics.running.dec();
    }
}

/// Axum middleware translating both rejection kinds to `429` with the
/// advertised `Retry-After` hint.
pub async fn admission_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let ctx = req
        .extensions()
        .get::<Ctx>()
        .cloned()
        .unwrap_or_else(Ctx::background);

    match limiter.admit(&ctx).await {
        Ok(_permit) => next.run(req).await,
        Err(err) => {
            tracing::warn!(
                "request rejected: {}: retry after {}s",
                err,
                limiter.retry_after_secs()
            );
            too_many_requests(limiter.retry_after_secs())
        }
    }
}

fn too_many_requests(retry_after_secs: i64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
    )
        .into_response()
}
