//! API Tier Entrypoint
//!
//! Fronts the backend tier with a sharded TTL cache: reads populate the
//! cache on miss, writes go through to the backend, and the admission
//! controller bounds concurrency. Exits 0 on signal-driven shutdown, 1 on
//! any init failure.

use std::sync::Arc;

use tierkv::admission::RateLimiter;
use tierkv::cache::{TtlParams, sharded::DEFAULT_SHARD_COUNT, sharded_ttl_stack};
use tierkv::client::HttpBackend;
use tierkv::conf;
use tierkv::ctx::Ctx;
use tierkv::http;
use tierkv::logging;
use tierkv::service::Service;

const ERR_EXIT: i32 = 1;

#[tokio::main]
async fn main() {
    let conf = match conf::load_api_config() {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("failed to initialize config: {:#}", e);
            std::process::exit(ERR_EXIT);
        }
    };

    logging::init(&conf.log);
    tracing::info!("config initialized");
    tracing::debug!("{:?}", conf);
    tracing::info!(
        "trace export endpoint {} (flush budget {:?})",
        conf.otel.endpoint,
        conf.otel.shutdown_timeout
    );

    let cache = sharded_ttl_stack(DEFAULT_SHARD_COUNT, TtlParams::default());
    tracing::info!("cache initialized with {} shards", DEFAULT_SHARD_COUNT);

    let backend = Arc::new(HttpBackend::new(
        conf.backend_client.endpoint.clone(),
        conf.backend_client.request_timeout,
    ));
    tracing::info!("backend client for {}", conf.backend_client.endpoint);

    let service = Arc::new(Service::new(cache.clone(), backend));
    let limiter = RateLimiter::new(conf.rate_limiter.admission_params());
    let router = http::api_router(service, limiter);

    let listener = match tokio::net::TcpListener::bind(conf.http.endpoint()).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", conf.http.endpoint(), e);
            std::process::exit(ERR_EXIT);
        }
    };
    tracing::info!(
        "http server listening on {} (read {:?}, write {:?}, idle {:?})",
        conf.http.endpoint(),
        conf.http.read_timeout,
        conf.http.write_timeout,
        conf.http.idle_timeout
    );

    if let Err(e) = http::serve_until_shutdown(listener, router, conf.http.shutdown_timeout).await {
        tracing::error!("server failed: {}", e);
        std::process::exit(ERR_EXIT);
    }

    // Closing the cache stops every shard's sweeper.
    let close_ctx = Ctx::with_timeout(conf.http.shutdown_timeout);
    if let Err(e) = cache.close(&close_ctx).await {
        tracing::error!("failed to close cache: {}", e);
    }
    tracing::info!("cache closed, exiting");
}
