//! Clock adapters for time operations.
//!
//! Provides the production clock. The limiter sends the current time
//! to the store with every evaluation, so tests swap in the
//! controllable `MockClock` (in `crate::infrastructure::mocks`)
//! instead of sleeping.

use crate::application::ports::Clock;
use std::time::{SystemTime, UNIX_EPOCH};

/// System clock reporting unix time in whole seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before the unix epoch")
            .as_secs()
    }
}
