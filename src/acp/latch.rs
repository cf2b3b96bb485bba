//! One-shot, wake-all signal used for the two handshake steps.
//!
//! A [`Latch`] starts closed and can be opened exactly once; every waiter,
//! including ones that arrive after it opened, observes the open state.
//! Opening after a waiter has already timed out is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a bounded [`Latch::wait_or_abort`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The latch was opened.
    Opened,
    /// The timeout elapsed first.
    TimedOut,
    /// The abort token fired first.
    Aborted,
}

/// One-shot latch. Cloning yields a handle to the same latch.
#[derive(Debug, Clone, Default)]
pub struct Latch {
    opened: Arc<AtomicBool>,
    signal: CancellationToken,
}

impl Latch {
    /// Create a closed latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the latch, waking every waiter.
    ///
    /// Returns `true` only for the call that actually opened it.
    pub fn open(&self) -> bool {
        if self
            .opened
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.signal.cancel();
            true
        } else {
            false
        }
    }

    /// Whether the latch has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the latch, giving up early if `abort` fires.
    pub async fn wait_or_abort(&self, timeout: Duration, abort: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            biased;

            () = self.signal.cancelled() => WaitOutcome::Opened,
            () = abort.cancelled() => WaitOutcome::Aborted,
            () = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
        }
    }
}
