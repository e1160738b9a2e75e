//! Admission Metrics
//!
//! The limiter's five series, registered in the limiter's own registry so
//! independent limiters never collide, and served in the Prometheus text
//! exposition format by the `/metrics` handler. In-system and running are
//! gauges (they go down when requests depart); rejections, wait timeouts and
//! the total-seen count only ever grow.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use super::RateLimiter;

/// The registered series. Incremented alongside the limiter's atomics; the
/// atomics stay the source for admission decisions and snapshots.
pub(super) struct AdmissionMetrics {
    pub(super) running: IntGauge,
    pub(super) in_system: IntGauge,
    pub(super) rejected: IntCounter,
    pub(super) timed_out: IntCounter,
    pub(super) total: IntCounter,
}

impl AdmissionMetrics {
    /// Builds the series and registers them in `registry`. The descriptors
    /// are static and the registry is fresh per limiter, so registration
    /// cannot fail at runtime.
    pub(super) fn register(registry: &Registry) -> Self {
        Self {
            running: gauge(
                registry,
                "rate_limiter_running_requests",
                "Number of currently running requests",
            ),
            in_system: gauge(
                registry,
                "rate_limiter_running_plus_waiting_requests",
                "Total number of queued + running requests",
            ),
            rejected: counter(
                registry,
                "rate_limiter_rejected_requests",
                "Total number of requests rejected due to rate limits",
            ),
            timed_out: counter(
                registry,
                "rate_limiter_timeout_requests",
                "Total number of requests that timed out waiting",
            ),
            total: counter(
                registry,
                "rate_limiter_total_requests_static",
                "Total number of requests",
            ),
        }
    }
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge descriptor");
    registry
        .register(Box::new(metric.clone()))
        .expect("unique gauge registration");
    metric
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter descriptor");
    registry
        .register(Box::new(metric.clone()))
        .expect("unique counter registration");
    metric
}

pub async fn handle_metrics(Extension(limiter): Extension<Arc<RateLimiter>>) -> Response {
    let encoder = TextEncoder::new();
    let families = limiter.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}
