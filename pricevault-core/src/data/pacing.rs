//! Request pacing: retry backoff, run-wide adaptive delay, sleeping and
//! cancellation.
//!
//! The provider's rate limit is undocumented, so a run keeps one adaptive
//! delay that doubles after a failed batch and decays toward the base after a
//! successful one. Retries of a single batch use a separate exponential
//! backoff seeded from that adaptive delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Upper bound on the delay between retries of one batch.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Upper bound on the run-wide adaptive delay.
pub const DEFAULT_ADAPTIVE_CAP: Duration = Duration::from_secs(5);

/// Factor applied to the adaptive delay after a successful batch.
pub const DEFAULT_DECAY: f64 = 0.8;

/// Something that can block the current thread for a while.
///
/// Injected so tests can record delays instead of waiting for them.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real sleeping via `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Doubling retry delay: yields `initial`, `2*initial`, ... capped at `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            next: initial.min(cap),
            cap,
        }
    }

    /// Delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = self.next.saturating_mul(2).min(self.cap);
        current
    }
}

/// Run-wide pacing value: grows on failure, decays on success.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    base: Duration,
    current: Duration,
    cap: Duration,
    decay: f64,
}

impl AdaptiveDelay {
    /// Starts at `base`. A cap below `base` is raised to `base`; a decay
    /// outside `(0, 1]` falls back to [`DEFAULT_DECAY`].
    ///
    /// A zero `base` disables pacing: doubling zero stays zero, so neither
    /// this delay nor a [`Backoff`] seeded from it ever waits.
    pub fn new(base: Duration, cap: Duration, decay: f64) -> Self {
        let decay = if decay > 0.0 && decay <= 1.0 {
            decay
        } else {
            DEFAULT_DECAY
        };
        Self {
            base,
            current: base,
            cap: cap.max(base),
            decay,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Double the delay, never past the cap.
    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.cap);
        self.current
    }

    /// Decay toward the base; returns the delay to sleep before the next batch.
    pub fn on_success(&mut self) -> Duration {
        self.current = scale(self.current, self.decay).max(self.base);
        self.current
    }
}

/// `d * factor`, rounded to the nearest nanosecond.
fn scale(d: Duration, factor: f64) -> Duration {
    let nanos = (d.as_nanos() as f64 * factor).round();
    Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
}

/// An [`AdaptiveDelay`] behind a mutex.
///
/// Batches that run in parallel must share one of these rather than each
/// keeping its own delay, so the total request rate stays bounded.
#[derive(Debug, Clone)]
pub struct SharedPacer {
    inner: Arc<Mutex<AdaptiveDelay>>,
}

impl SharedPacer {
    pub fn new(delay: AdaptiveDelay) -> Self {
        Self {
            inner: Arc::new(Mutex::new(delay)),
        }
    }

    pub fn current(&self) -> Duration {
        self.with(|d| d.current())
    }

    pub fn on_failure(&self) -> Duration {
        self.with(AdaptiveDelay::on_failure)
    }

    pub fn on_success(&self) -> Duration {
        self.with(AdaptiveDelay::on_success)
    }

    fn with<R>(&self, f: impl FnOnce(&mut AdaptiveDelay) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }
}

/// Cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
