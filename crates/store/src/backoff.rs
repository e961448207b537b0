//! Reconnect backoff schedule

use std::sync::Mutex;
use std::time::Duration;

use crate::lock;

/// Upper bound on a single backoff wait
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Wait before reconnect attempt `attempt`: none for the first attempt,
/// then `min(2^attempt, 10)` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Blocking sleep used between reconnect attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real thread sleep
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested waits without sleeping
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        lock(&self.waits).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        lock(&self.waits).push(duration);
    }
}
