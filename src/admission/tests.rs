use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{AdmissionError, AdmissionParams, RateLimiter};
use crate::ctx::Ctx;

fn params(max_running: i64, max_waiting: i64) -> AdmissionParams {
    AdmissionParams {
        max_running,
        max_waiting,
        retry_after_secs: 1,
    }
}

// ============================================================
// PARAMETER NORMALIZATION
// ============================================================

#[tokio::test]
async fn test_params_below_one_fall_back_to_defaults() {
    let normalized = AdmissionParams {
        max_running: 0,
        max_waiting: -3,
        retry_after_secs: 0,
    }
    .normalized();

    let defaults = AdmissionParams::default();
    assert_eq!(normalized.max_running, defaults.max_running);
    assert_eq!(normalized.max_waiting, defaults.max_waiting);
    assert_eq!(normalized.retry_after_secs, defaults.retry_after_secs);
}

#[tokio::test]
async fn test_valid_params_are_kept() {
    let p = params(7, 3).normalized();
    assert_eq!(p.max_running, 7);
    assert_eq!(p.max_waiting, 3);
}

// ============================================================
// ADMIT / DEPART
// ============================================================

#[tokio::test]
async fn test_admit_and_depart_settle_counters() {
    let limiter = RateLimiter::new(params(2, 2));
    let ctx = Ctx::background();

    let permit = limiter.admit(&ctx).await.unwrap();
    let snap = limiter.snapshot();
    assert_eq!(snap.running, 1);
    assert_eq!(snap.in_system, 1);
    assert_eq!(snap.total_seen, 1);

    drop(permit);
    let snap = limiter.snapshot();
    assert_eq!(snap.running, 0);
    assert_eq!(snap.in_system, 0);
    assert_eq!(snap.rejected, 0);
    assert_eq!(snap.timed_out, 0);
}

#[tokio::test]
async fn test_full_system_rejects_with_too_many() {
    let limiter = RateLimiter::new(params(1, 1));
    let ctx = Ctx::background();

    // One running.
    let running = limiter.admit(&ctx).await.unwrap();

    // One queued.
    let queued = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let permit = limiter.admit(&Ctx::background()).await;
            assert!(permit.is_ok());
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(limiter.snapshot().in_system, 2);

    // The third arrival finds N + W occupied.
    let err = limiter.admit(&ctx).await.unwrap_err();
    assert_eq!(err, AdmissionError::TooMany);
    assert_eq!(limiter.snapshot().rejected, 1);

    // Rejection departed immediately; the queued request is still in.
    assert_eq!(limiter.snapshot().in_system, 2);

    drop(running);
    queued.await.unwrap();
    assert_eq!(limiter.snapshot().in_system, 0);
}

#[tokio::test]
async fn test_deadline_while_queued_is_wait_timeout() {
    let limiter = RateLimiter::new(params(1, 5));
    let ctx = Ctx::background();

    let _running = limiter.admit(&ctx).await.unwrap();

    let waiting = Ctx::with_timeout(Duration::from_millis(30));
    let err = limiter.admit(&waiting).await.unwrap_err();
    assert_eq!(err, AdmissionError::WaitTimeout);

    let snap = limiter.snapshot();
    assert_eq!(snap.timed_out, 1);
    assert_eq!(snap.running, 1);
    assert_eq!(snap.in_system, 1);
}

#[tokio::test]
async fn test_queued_request_runs_after_release() {
    let limiter = RateLimiter::new(params(1, 1));

    let first = limiter.admit(&Ctx::background()).await.unwrap();

    let second = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let _permit = limiter.admit(&Ctx::background()).await.unwrap();
            limiter.snapshot().running
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(first);
    let running_when_second_ran = second.await.unwrap();
    assert_eq!(running_when_second_ran, 1);
}

// ============================================================
// ADMISSION BOUND UNDER LOAD
// ============================================================

#[tokio::test]
async fn test_bounds_hold_under_concurrent_load() {
    const N: i64 = 3;
    const W: i64 = 5;

    let limiter = RateLimiter::new(params(N, W));
    let max_running = Arc::new(AtomicI64::new(0));
    let max_in_system = Arc::new(AtomicI64::new(0));
    let admitted = Arc::new(AtomicI64::new(0));
    let rejected = Arc::new(AtomicI64::new(0));

    let mut tasks = Vec::new();
    for _ in 0..30 {
        let limiter = limiter.clone();
        let max_running = max_running.clone();
        let max_in_system = max_in_system.clone();
        let admitted = admitted.clone();
        let rejected = rejected.clone();

        tasks.push(tokio::spawn(async move {
            match limiter.admit(&Ctx::background()).await {
                Ok(_permit) => {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    let snap = limiter.snapshot();
                    max_running.fetch_max(snap.running, Ordering::SeqCst);
                    max_in_system.fetch_max(snap.in_system, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(AdmissionError::TooMany) => {
                    rejected.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected admission error: {}", e),
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(max_running.load(Ordering::SeqCst) <= N);
    assert!(max_in_system.load(Ordering::SeqCst) <= N + W);
    assert_eq!(
        admitted.load(Ordering::SeqCst) + rejected.load(Ordering::SeqCst),
        30
    );

    // Everyone departed.
    let snap = limiter.snapshot();
    assert_eq!(snap.running, 0);
    assert_eq!(snap.in_system, 0);
    assert_eq!(snap.total_seen, 30);
}

// ============================================================
// SCRAPE FORMAT
// ============================================================

#[tokio::test]
async fn test_metrics_registry_exposes_all_counters() {
    let limiter = RateLimiter::new(params(1, 1));
    let _permit = limiter.admit(&Ctx::background()).await.unwrap();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&limiter.registry().gather(), &mut buffer)
        .unwrap();
    let body = String::from_utf8(buffer).unwrap();

    for name in [
        "rate_limiter_running_requests",
        "rate_limiter_running_plus_waiting_requests",
        "rate_limiter_rejected_requests",
        "rate_limiter_timeout_requests",
        "rate_limiter_total_requests_static",
    ] {
        assert!(body.contains(&format!("# TYPE {}", name)), "{}", name);
    }

    assert!(body.contains("rate_limiter_running_requests 1"));
    assert!(body.contains("rate_limiter_total_requests_static 1"));
}

#[tokio::test]
async fn test_metrics_track_rejections_and_departures() {
    let limiter = RateLimiter::new(params(1, 1));

    let running = limiter.admit(&Ctx::background()).await.unwrap();
    let queued = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let _permit = limiter.admit(&Ctx::background()).await.unwrap();
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let _ = limiter.admit(&Ctx::background()).await.unwrap_err();

    drop(running);
    queued.await.unwrap();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&limiter.registry().gather(), &mut buffer)
        .unwrap();
    let body = String::from_utf8(buffer).unwrap();

    // Gauges settle back to zero; the monotonic series keep their totals.
    assert!(body.contains("rate_limiter_running_requests 0"));
    assert!(body.contains("rate_limiter_running_plus_waiting_requests 0"));
    assert!(body.contains("rate_limiter_rejected_requests 1"));
    assert!(body.contains("rate_limiter_total_requests_static 3"));
}
