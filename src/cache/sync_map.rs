//! Synchronized Map Store
//!
//! The bottom of the stack: a thread-safe key/value map with point
//! operations, a monotonic live-flag, and a close-once guard. Reads and
//! writes are safe under concurrent callers; no cross-key atomicity is
//! promised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::validate::{ctx_live, key_non_empty, not_closed, validate_input, value_not_null};
use super::{Cache, CacheError, CacheValue, SetOutcome};
use crate::ctx::Ctx;

const DEFAULT_KEY_CAPACITY: usize = 128;
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction knobs. Zero values fall back to the defaults.
#[derive(Debug, Clone, Copy)]
pub struct SyncMapParams {
    /// Pre-allocation hint for key enumeration.
    pub key_capacity: usize,
    /// Deadline substituted when `close` is handed an already-done context.
    pub close_timeout: Duration,
}

impl Default for SyncMapParams {
    fn default() -> Self {
        Self {
            key_capacity: DEFAULT_KEY_CAPACITY,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl SyncMapParams {
    pub(crate) fn normalized(self) -> Self {
        Self {
            key_capacity: if self.key_capacity == 0 {
                DEFAULT_KEY_CAPACITY
            } else {
                self.key_capacity
            },
            close_timeout: if self.close_timeout.is_zero() {
                DEFAULT_CLOSE_TIMEOUT
            } else {
                self.close_timeout
            },
        }
    }
}

pub struct SyncMapStore {
    map: DashMap<String, CacheValue>,
    closed: AtomicBool,
    close_started: AtomicBool,
    params: SyncMapParams,
}

impl SyncMapStore {
    pub fn new(params: SyncMapParams) -> Self {
        Self {
            map: DashMap::new(),
            closed: AtomicBool::new(false),
            close_started: AtomicBool::new(false),
            params: params.normalized(),
        }
    }

    /// Clears the map, checking the deadline between removals. The handle is
    /// already marked closed when this runs; an expired deadline leaves the
    /// remaining entries behind but the close still stands.
    fn clear_with_deadline(&self, ctx: &Ctx) -> Result<(), CacheError> {
        const OP: &str = "sync_map/clear";

        let keys: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(source) = ctx.err() {
                return Err(CacheError::Ctx { op: OP, source });
            }
            self.map.remove(&key);
        }
        Ok(())
    }
}

impl Default for SyncMapStore {
    fn default() -> Self {
        Self::new(SyncMapParams::default())
    }
}

#[async_trait]
impl Cache for SyncMapStore {
    async fn get(&self, ctx: &Ctx, key: &str) -> Result<CacheValue, CacheError> {
        const OP: &str = "sync_map/get";

        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
        ])?;

        match self.map.get(key) {
            Some(value) => Ok(value.clone()),
            None => {
                // A deadline that expired mid-lookup reports as cancellation,
                // not absence.
                if let Some(source) = ctx.err() {
                    return Err(CacheError::Ctx { op: OP, source });
                }
                Err(CacheError::NotFound {
                    key: key.to_string(),
                })
            }
        }
    }

    async fn set(
        &self,
        ctx: &Ctx,
        key: &str,
        value: CacheValue,
    ) -> Result<SetOutcome, CacheError> {
        const OP: &str = "sync_map/set";

        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
            value_not_null(&value, OP),
        ])?;

        match self.map.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(SetOutcome::Created)
            }
            Entry::Occupied(mut slot) => {
                if *slot.get() == value {
                    Ok(SetOutcome::Unchanged)
                } else {
                    slot.insert(value);
                    Ok(SetOutcome::Updated)
                }
            }
        }
    }

    async fn delete(&self, ctx: &Ctx, key: &str) -> Result<(), CacheError> {
        const OP: &str = "sync_map/delete";

        validate_input([
            not_closed(&self.closed, OP),
            ctx_live(ctx, OP),
            key_non_empty(key, OP),
        ])?;

        self.map.remove(key);
        Ok(())
    }

    async fn keys(&self, ctx: &Ctx) -> Result<Vec<String>, CacheError> {
        const OP: &str = "sync_map/keys";

        validate_input([not_closed(&self.closed, OP), ctx_live(ctx, OP)])?;

        let mut keys = Vec::with_capacity(self.params.key_capacity);
        for item in self.map.iter() {
            // Abandon the snapshot if the deadline expires mid-iteration;
            // partially collected keys are discarded.
            if let Some(source) = ctx.err() {
                return Err(CacheError::Ctx { op: OP, source });
            }
            keys.push(item.key().clone());
        }
        Ok(keys)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        const OP: &str = "sync_map/len";

        validate_input([not_closed(&self.closed, OP)])?;
        Ok(self.map.len())
    }

    async fn close(&self, ctx: &Ctx) -> Result<(), CacheError> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);

        // Cleanup must be able to finish even when the caller's context is
        // already done, so it runs under a normalized deadline.
        let ctx = ctx.normalized(self.params.close_timeout);
        self.clear_with_deadline(&ctx)
    }
}
