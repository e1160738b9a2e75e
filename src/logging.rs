//! Process-Wide Logging
//!
//! Structured logging through `tracing`, configured once at startup. Format
//! and level come from the environment (`log_format`, `log_level`); the
//! request middleware attaches per-request fields via spans, so nothing else
//! holds logger state.

use tracing_subscriber::EnvFilter;

use crate::conf::{LogFormat, LoggingConf};

pub fn init(conf: &LoggingConf) {
    let filter = EnvFilter::try_new(&conf.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match conf.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}
