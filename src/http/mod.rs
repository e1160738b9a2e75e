//! HTTP Transport
//!
//! Router assembly and server lifecycle for both tiers. The middleware order
//! is the same everywhere: request correlation runs first, then admission
//! control; the `/metrics` scrape route sits outside the admission layer so a
//! saturated limiter can still be observed.

pub mod handlers;
pub mod protocol;
pub mod request_id;
pub mod trace;

#[cfg(test)]
mod tests;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, put};
use axum::{Extension, Router, middleware};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::admission::{RateLimiter, admission_middleware, metrics};
use crate::cache::Cache;
use crate::service::Service;
use protocol::{ENDPOINT_METRICS, ENDPOINT_STORAGE, ENDPOINT_STORAGE_KEY};
use request_id::request_meta_middleware;

/// API tier routes: storage endpoints through the service layer.
pub fn api_router(service: Arc<Service>, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route(
            ENDPOINT_STORAGE_KEY,
            get(handlers::handle_api_get).delete(handlers::handle_api_delete),
        )
        .route(ENDPOINT_STORAGE, put(handlers::handle_api_put))
        .layer(middleware::from_fn_with_state(
            limiter.clone(),
            admission_middleware,
        ))
        .route(ENDPOINT_METRICS, get(metrics::handle_metrics))
        .layer(middleware::from_fn(request_meta_middleware))
        .layer(Extension(service))
        .layer(Extension(limiter))
}

/// Backend tier routes: the same storage surface straight onto the store.
pub fn backend_router(store: Arc<dyn Cache>, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route(
            ENDPOINT_STORAGE_KEY,
            get(handlers::handle_storage_get).delete(handlers::handle_storage_delete),
        )
        .route(ENDPOINT_STORAGE, put(handlers::handle_storage_put))
        .layer(middleware::from_fn_with_state(
            limiter.clone(),
            admission_middleware,
        ))
        .route(ENDPOINT_METRICS, get(metrics::handle_metrics))
        .layer(middleware::from_fn(request_meta_middleware))
        .layer(Extension(store))
        .layer(Extension(limiter))
}

/// Runs the server until a shutdown signal arrives, then drains in-flight
/// requests for at most `shutdown_timeout`.
pub async fn serve_until_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_timeout: Duration,
) -> anyhow::Result<()> {
    let (signal_tx, signal_rx) = watch::channel(false);
    let drain_rx = signal_tx.subscribe();

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = signal_tx.send(true);
    });

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(wait_for(signal_rx))
        .into_future();

    tokio::select! {
        result = server => {
            result?;
            tracing::info!("server stopped");
        }
        _ = async {
            wait_for(drain_rx).await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("graceful drain exceeded {:?}, stopping", shutdown_timeout);
        }
    }

    Ok(())
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Completes on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
