//! Recovery-wide control primitives: cancellation, the recovery state
//! machine, and bounded backoff for blocking waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation handle for a recovery pass.
///
/// Cloned freely; cancelling any clone cancels them all. The dispatcher
/// checks the token inside every blocking wait and returns
/// [`DispatchError::Cancelled`](crate::DispatchError::Cancelled).
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Recovery pass states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecoveryState {
    /// Workers are being spawned.
    StartingBegin = 0,
    /// Workers spawned, waiting for readiness.
    StartingEnd = 1,
    /// Records are being dispatched.
    InProgress = 2,
    /// End mark drained; recovery complete.
    Done = 3,
}

/// Bounded backoff for blocking waits on the dispatcher and worker
/// threads: spin briefly, then yield, then sleep, while counting
/// iterations so callers can log on a fixed cadence instead of flooding.
#[derive(Debug)]
pub struct BackoffWait {
    iterations: u64,
    warn_every: u64,
}

/// Iterations spent spinning before yielding the CPU.
const SPIN_ITERATIONS: u64 = 64;
/// Iterations spent yielding before sleeping.
const YIELD_ITERATIONS: u64 = 256;
/// Sleep granularity once past the yield phase.
const SLEEP_STEP: Duration = Duration::from_micros(100);

impl BackoffWait {
    /// Creates a backoff that reports a warn interval every `warn_every`
    /// iterations (0 disables reporting).
    #[must_use]
    pub fn new(warn_every: u64) -> Self {
        Self {
            iterations: 0,
            warn_every,
        }
    }

    /// Blocks for one backoff step. Returns `true` when a warn interval
    /// has elapsed and the caller should emit a diagnostic.
    pub fn pause(&mut self) -> bool {
        self.iterations += 1;
        if self.iterations < SPIN_ITERATIONS {
            std::hint::spin_loop();
        } else if self.iterations < YIELD_ITERATIONS {
            std::thread::yield_now();
        } else {
            std::thread::sleep(SLEEP_STEP);
        }
        self.warn_every != 0 && self.iterations % self.warn_every == 0
    }

    /// Iterations waited so far.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}
