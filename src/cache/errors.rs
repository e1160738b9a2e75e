//! Store Error Taxonomy
//!
//! A closed sum of everything the store stack can report. Callers match on
//! kinds instead of scanning message strings; the `op` field carries the
//! layer/operation annotation that would otherwise be lost in conversion.

use thiserror::Error;

use crate::ctx::CtxError;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Validation: the key was empty.
    #[error("{op}: empty key")]
    EmptyKey { op: &'static str },

    /// Validation: the value was a JSON null.
    #[error("{op}: null value")]
    NullValue { op: &'static str },

    /// Validation: the operation context was cancelled or past its deadline.
    #[error("{op}: {source}")]
    Ctx {
        op: &'static str,
        #[source]
        source: CtxError,
    },

    /// State: the handle has been closed.
    #[error("{op}: cache closed")]
    Closed { op: &'static str },

    /// Lookup: authoritative absence.
    #[error("key {key}: not found")]
    NotFound { key: String },

    /// Lookup: the entry's expiration has passed. Never escapes the store
    /// stack; the read path surfaces it to callers as a miss.
    #[error("{op}: key {key}: entry expired")]
    Expired { op: &'static str, key: String },

    /// Internal: a layer read a stored shape it did not write.
    #[error("{op}: key {key}: unexpected stored shape")]
    TypeCast { op: &'static str, key: String },

    /// A shard-annotated failure from the sharded layer's fan-out paths.
    #[error("{op}: shard {shard}: {source}")]
    Shard {
        op: &'static str,
        shard: usize,
        #[source]
        source: Box<CacheError>,
    },

    /// One or more shards failed to close. The handle is closed regardless.
    #[error("close failed: {failures}")]
    CloseFailed { failures: String },
}

impl CacheError {
    /// True for authoritative absence, the one lookup failure the service
    /// layer treats as an ordinary miss rather than an anomaly.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}
