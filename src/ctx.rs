//! Operation Context
//!
//! A small deadline/cancellation value threaded through every store,
//! admission, and upstream operation. Layers check it between steps and
//! abandon work once it is done; the close path substitutes a fresh deadline
//! for an already-done context so cleanup can always finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CtxError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Deadline plus an explicit cancellation flag, cheap to clone and share.
#[derive(Debug, Clone)]
pub struct Ctx {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Ctx {
    /// A context that is never done on its own.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the context cancelled. All clones observe the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the reason this context is done, if it is.
    /// Cancellation wins over deadline expiry when both apply.
    pub fn err(&self) -> Option<CtxError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Some(CtxError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(CtxError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Returns this context unless it is already done, in which case a fresh
    /// context with `default_timeout` is substituted. Only the close path
    /// tolerates a done context; everything else rejects it up front.
    pub fn normalized(&self, default_timeout: Duration) -> Ctx {
        if self.is_done() {
            Ctx::with_timeout(default_timeout)
        } else {
            self.clone()
        }
    }
}
