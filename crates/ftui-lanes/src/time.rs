#![forbid(unsafe_code)]

//! Monotonic time sources.
//!
//! Frame timestamps and budget checks read time through [`Monotonic`] so that
//! tests can drive the clock by hand with [`ManualMonotonic`].

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A monotonic clock measured as elapsed time since an arbitrary origin.
pub trait Monotonic: Send + Sync {
    /// Current time since the origin. Never decreases.
    fn now(&self) -> Duration;
}

/// Wall-clock backed [`Monotonic`] starting at construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemMonotonic {
    origin: Instant,
}

impl SystemMonotonic {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemMonotonic {
    fn default() -> Self {
        Self::new()
    }
}

impl Monotonic for SystemMonotonic {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven [`Monotonic`] for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualMonotonic {
    now: Mutex<Duration>,
}

impl ManualMonotonic {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }

    /// Jump to `at`. Earlier values are ignored.
    pub fn set(&self, at: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if at > *now {
            *now = at;
        }
    }
}

impl Monotonic for ManualMonotonic {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualMonotonic::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(3));
        clock.advance(Duration::from_millis(2));
        assert_eq!(clock.now(), Duration::from_millis(5));
    }

    #[test]
    fn manual_clock_never_goes_back() {
        let clock = ManualMonotonic::new();
        clock.set(Duration::from_millis(10));
        clock.set(Duration::from_millis(4));
        assert_eq!(clock.now(), Duration::from_millis(10));
    }

    #[test]
    fn system_clock_is_non_decreasing() {
        let clock = SystemMonotonic::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
