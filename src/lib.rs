//! Two-Tier HTTP Key/Value Service Library
//!
//! This library crate defines the subsystems shared by the two binaries
//! (`tierkv-api` and `tierkv-backend`).
//!
//! ## Architecture Modules
//!
//! - **`cache`**: the composable in-memory store stack. A synchronized map at
//!   the bottom, a TTL expiration layer with a background sweeper wrapping
//!   it, and a sharded layer routing keys by hash across several instances.
//! - **`admission`**: the bounded admission controller. Caps running and
//!   queued requests, rejects the rest with a retry hint, and exports its
//!   counters for scraping.
//! - **`client`**: the API tier's HTTP client for the authoritative backend,
//!   mapping upstream statuses onto a closed error taxonomy.
//! - **`service`**: the read-through / write-through composition of the local
//!   cache and the upstream client.
//! - **`http`**: routers, storage handlers, request correlation middleware,
//!   and the server lifecycle with graceful shutdown.
//! - **`conf`**: environment-driven configuration with validation.
//! - **`ctx`**: the deadline/cancellation value threaded through operations.

pub mod admission;
pub mod cache;
pub mod client;
pub mod conf;
pub mod ctx;
pub mod http;
pub mod logging;
pub mod service;
