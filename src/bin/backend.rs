//! Backend Tier Entrypoint
//!
//! The authoritative store behind the API tier: a bare synchronized-map
//! store exposed over the storage HTTP surface, guarded by the admission
//! controller. Exits 0 on signal-driven shutdown, 1 on any init failure.

use std::sync::Arc;

use tierkv::admission::RateLimiter;
use tierkv::cache::{Cache, SyncMapStore};
use tierkv::conf;
use tierkv::ctx::Ctx;
use tierkv::http;
use tierkv::logging;

const ERR_EXIT: i32 = 1;

#[tokio::main]
async fn main() {
    let conf = match conf::load_backend_config() {
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

    let store: Arc<dyn Cache> = Arc::new(SyncMapStore::default());
    tracing::info!("storage initialized");

    let limiter = RateLimiter::new(conf.rate_limiter.admission_params());
    let router = http::backend_router(store.clone(), limiter);

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

    let close_ctx = Ctx::with_timeout(conf.http.shutdown_timeout);
    if let Err(e) = store.close(&close_ctx).await {
        tracing::error!("failed to close storage: {}", e);
    }
    tracing::info!("storage closed, exiting");
}
