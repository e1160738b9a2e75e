//! Input Validation Predicates
//!
//! Side-effect-free checks shared by every store layer, so validation errors
//! surface uniformly no matter where in the stack a call enters. Each
//! predicate yields `Ok` or a typed failure; the runner returns the first
//! failure in order.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{CacheError, CacheValue};
use crate::ctx::Ctx;

/// Runs the checks in order and returns the first failure.
pub fn validate_input<I>(checks: I) -> Result<(), CacheError>
where
    I: IntoIterator<Item = Result<(), CacheError>>,
{
    for check in checks {
        check?;
    }
    Ok(())
}

pub fn not_closed(closed: &AtomicBool, op: &'static str) -> Result<(), CacheError> {
    if closed.load(Ordering::Acquire) {
        return Err(CacheError::Closed { op });
    }
    Ok(())
}

pub fn ctx_live(ctx: &Ctx, op: &'static str) -> Result<(), CacheError> {
    if let Some(source) = ctx.err() {
        return Err(CacheError::Ctx { op, source });
    }
    Ok(())
}

pub fn key_non_empty(key: &str, op: &'static str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::EmptyKey { op });
    }
    Ok(())
}

pub fn value_not_null(value: &CacheValue, op: &'static str) -> Result<(), CacheError> {
    if value.is_null() {
        return Err(CacheError::NullValue { op });
    }
    Ok(())
}
