//! Shared cancellation context.
//!
//! A single [`Cancellation`] roots one extractor invocation. Operator signals,
//! a failing branch, or a completed query all fire the same token; waiters
//! blocked in [`Cancellation::wait_timeout`] wake immediately instead of
//! sleeping out their interval.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cloneable cancellation token shared between the orchestrator branches.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl Cancellation {
    /// Builds a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. Repeated calls are no-ops.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.condvar.notify_all();
    }

    /// Returns true once [`Cancellation::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for at most `timeout`, returning true if the token fired.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self
                .inner
                .condvar
                .wait_timeout(cancelled, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
        true
    }

    /// Blocks until the token fires.
    pub fn wait(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            cancelled = self
                .inner
                .condvar
                .wait(cancelled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
