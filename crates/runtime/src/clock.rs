//! Time source for delays
//!
//! [`ManualClock`] never sleeps; it advances its own notion of "now" and
//! records every requested sleep. Clones share state, so a test (or a dry
//! run) can keep one handle while the device owns another.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Furthest a [`ManualClock`] moves past its origin; time stands still there
const MANUAL_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Simulated clock
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ManualState) -> R) -> R {
        // A poisoned clock still holds consistent numbers
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        self.with_state(|s| s.elapsed = s.elapsed.saturating_add(duration));
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.with_state(|s| s.sleeps.clone())
    }

    pub fn total_slept(&self) -> Duration {
        self.with_state(|s| {
            s.sleeps
                .iter()
                .fold(Duration::ZERO, |total, d| total.saturating_add(*d))
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.with_state(|s| s.elapsed)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed().min(MANUAL_HORIZON);
        self.origin.checked_add(elapsed).unwrap_or(self.origin)
    }

    fn sleep(&self, duration: Duration) {
        self.with_state(|s| {
            s.elapsed = s.elapsed.saturating_add(duration);
            s.sleeps.push(duration);
        });
    }
}
