//! Monotonic time abstraction.
//!
//! Components take an `Arc<dyn TimeSource>` instead of calling
//! `Instant::now` directly so tests can drive elapsed time explicitly.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic clock.
pub trait TimeSource: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Production time source backed by `Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced time source for tests.
pub struct MockTimeSource {
    now: Mutex<Instant>,
}

impl MockTimeSource {
    /// Create a mock clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.now.lock() += delta;
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
