//! Level-triggered boolean latch (mutex + condvar)

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::lock_unpoisoned;

/// 电平触发门闩
///
/// `wait()` 阻塞直到值为 true；`set(v)` 写入值并唤醒所有等待者。
/// 值保持不变直到下一次 `set`，迟到的等待者不会错过信号。
#[derive(Debug, Default)]
pub struct Latch {
    value: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new(initial: bool) -> Self {
        Self {
            value: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Set the value and wake every waiter
    pub fn set(&self, value: bool) {
        let mut guard = lock_unpoisoned(&self.value);
        *guard = value;
        self.cond.notify_all();
    }

    pub fn get(&self) -> bool {
        *lock_unpoisoned(&self.value)
    }

    /// Block until the value is true
    pub fn wait(&self) {
        let guard = lock_unpoisoned(&self.value);
        let _guard = self
            .cond
            .wait_while(guard, |v| !*v)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the value is true or the timeout elapses.
    ///
    /// Returns the value observed on exit.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = lock_unpoisoned(&self.value);
        while !*guard {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
