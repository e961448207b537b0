//! FrameCoordinator - per-frame exclusive window
//!
//! 帧协议（仅由仿真线程执行）：
//! 1. `StepComplete = false`
//! 2. 带超时推进引擎一步；连续超时超过上限则返回致命错误
//! 3. FIFO 执行命令队列中的全部命令
//! 4. `StepComplete = true`

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::{lock_unpoisoned, CommandQueue, FrameError, Latch, Result, TimedStepper};

/// Result of one bounded engine step
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Stepped,
    TimedOut,
    /// The engine reported an error; the frame still drains commands
    Failed(String),
}

/// Summary of one completed frame
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame_id: u64,
    pub status: StepStatus,
    pub commands_executed: usize,
    /// Step plus drain wall time
    pub elapsed: Duration,
}

/// Latches, command queue and timeout accounting shared by one instance
pub struct FrameCoordinator<E> {
    instance_id: String,
    init_complete: Latch,
    step_complete: Latch,
    commands: CommandQueue<E>,
    consecutive_timeouts: AtomicU32,
    max_step_timeouts: u32,
    frames: AtomicU64,
}

impl<E> std::fmt::Debug for FrameCoordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCoordinator")
            .field("instance_id", &self.instance_id)
            .field("frames", &self.frame_id())
            .field("pending_commands", &self.commands.len())
            .finish()
    }
}

impl<E> FrameCoordinator<E> {
    pub fn new(instance_id: impl Into<String>, max_step_timeouts: u32) -> Self {
        Self {
            instance_id: instance_id.into(),
            init_complete: Latch::new(false),
            step_complete: Latch::new(false),
            commands: CommandQueue::new(),
            consecutive_timeouts: AtomicU32::new(0),
            max_step_timeouts,
            frames: AtomicU64::new(0),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    // ===== Latches =====

    pub fn set_init(&self, value: bool) {
        self.init_complete.set(value);
    }

    pub fn wait_for_init(&self) {
        self.init_complete.wait();
    }

    pub fn wait_for_init_timeout(&self, timeout: Duration) -> bool {
        self.init_complete.wait_timeout(timeout)
    }

    pub fn set_step_complete(&self, value: bool) {
        self.step_complete.set(value);
    }

    pub fn wait_for_step(&self) {
        self.step_complete.wait();
    }

    pub fn wait_for_step_timeout(&self, timeout: Duration) -> bool {
        self.step_complete.wait_timeout(timeout)
    }

    // ===== Commands =====

    /// Defer an engine mutation to the next frame's drain
    pub fn enqueue<F>(&self, command: F)
    where
        F: FnOnce(&mut E) + Send + 'static,
    {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &CommandQueue<E> {
        &self.commands
    }

    // ===== Counters =====

    /// Number of frames completed so far
    pub fn frame_id(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::Relaxed)
    }

    /// Run one frame: step (bounded), drain commands, publish completion.
    ///
    /// Returns [`FrameError::TooManyTimeouts`] once the consecutive timeout
    /// count exceeds the configured maximum; `StepComplete` stays false then.
    #[instrument(
        name = "frame_run",
        skip(self, engine, stepper),
        fields(instance = %self.instance_id)
    )]
    pub fn run_frame(
        &self,
        engine: &Mutex<E>,
        stepper: &mut TimedStepper,
        timeout: Duration,
    ) -> Result<FrameOutcome> {
        let started = Instant::now();
        self.step_complete.set(false);

        let status = stepper.step(timeout)?;
        match &status {
            StepStatus::Stepped => {
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
            }
            StepStatus::TimedOut => {
                let consecutive = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                observability::record_step_timeout(&self.instance_id);
                warn!(
                    instance = %self.instance_id,
                    consecutive = consecutive,
                    timeout_ms = timeout.as_millis() as u64,
                    "Engine step timed out"
                );
                if consecutive > self.max_step_timeouts {
                    return Err(FrameError::TooManyTimeouts {
                        consecutive,
                        max: self.max_step_timeouts,
                    });
                }
            }
            StepStatus::Failed(message) => {
                warn!(instance = %self.instance_id, error = %message, "Engine step failed");
            }
        }

        let commands_executed = self.drain(engine, &status);
        let frame_id = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        self.step_complete.set(true);

        let elapsed = started.elapsed();
        observability::record_frame(&self.instance_id, elapsed.as_secs_f64() * 1000.0);
        observability::record_commands_executed(&self.instance_id, commands_executed);

        Ok(FrameOutcome {
            frame_id,
            status,
            commands_executed,
            elapsed,
        })
    }

    fn drain(&self, engine: &Mutex<E>, status: &StepStatus) -> usize {
        if *status != StepStatus::TimedOut {
            let mut guard = lock_unpoisoned(engine);
            return self.commands.drain_into(&mut guard);
        }

        // 超时的 step 仍持有引擎锁时，命令留到下一帧执行
        match engine.try_lock() {
            Ok(mut guard) => self.commands.drain_into(&mut guard),
            Err(TryLockError::Poisoned(poisoned)) => {
                self.commands.drain_into(&mut poisoned.into_inner())
            }
            Err(TryLockError::WouldBlock) => {
                debug!(
                    instance = %self.instance_id,
                    pending = self.commands.len(),
                    "Engine busy, deferring command drain"
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn counting_stepper(engine: Arc<Mutex<Vec<u32>>>) -> TimedStepper {
        TimedStepper::spawn("c-step", engine, |_: &mut Vec<u32>| Ok(())).unwrap()
    }

    #[test]
    fn test_frame_drains_commands_in_order() {
        let engine = Arc::new(Mutex::new(Vec::new()));
        let coordinator = FrameCoordinator::new("XD", 10);
        let mut stepper = counting_stepper(engine.clone());

        coordinator.enqueue(|log: &mut Vec<u32>| log.push(1));
        coordinator.enqueue(|log: &mut Vec<u32>| log.push(2));
        coordinator.enqueue(|log: &mut Vec<u32>| log.push(3));

        let outcome = coordinator
            .run_frame(&engine, &mut stepper, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Stepped);
        assert_eq!(outcome.commands_executed, 3);
        assert_eq!(outcome.frame_id, 1);
        assert_eq!(*engine.lock().unwrap(), vec![1, 2, 3]);
        assert!(coordinator.commands().is_empty());

        // 下一帧不会重复执行
        let outcome = coordinator
            .run_frame(&engine, &mut stepper, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.commands_executed, 0);
        assert_eq!(engine.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_step_complete_visible_to_waiter() {
        let engine = Arc::new(Mutex::new(Vec::new()));
        let coordinator = Arc::new(FrameCoordinator::new("XD", 10));
        let mut stepper = counting_stepper(engine.clone());

        coordinator.enqueue(|log: &mut Vec<u32>| log.push(7));
        let waiter = {
            let coordinator = coordinator.clone();
            let engine = engine.clone();
            thread::spawn(move || {
                coordinator.wait_for_step();
                engine.lock().unwrap().clone()
            })
        };

        coordinator
            .run_frame(&engine, &mut stepper, Duration::from_secs(1))
            .unwrap();
        // 等待者看到的状态已包含本帧命令
        assert_eq!(waiter.join().unwrap(), vec![7]);
    }

    #[test]
    fn test_too_many_timeouts_is_fatal() {
        let engine = Arc::new(Mutex::new(()));
        let coordinator: FrameCoordinator<()> = FrameCoordinator::new("XD", 2);
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let mut stepper = TimedStepper::spawn("c-hang", engine.clone(), move |_: &mut ()| {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();

        let timeout = Duration::from_millis(10);
        for expected in 1..=2 {
            let outcome = coordinator.run_frame(&engine, &mut stepper, timeout).unwrap();
            assert_eq!(outcome.status, StepStatus::TimedOut);
            assert_eq!(coordinator.consecutive_timeouts(), expected);
        }
        let err = coordinator
            .run_frame(&engine, &mut stepper, timeout)
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::TooManyTimeouts {
                consecutive: 3,
                max: 2
            }
        ));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_success_resets_timeout_counter() {
        let engine = Arc::new(Mutex::new(()));
        let coordinator: FrameCoordinator<()> = FrameCoordinator::new("XD", 5);
        let slow = Arc::new(AtomicBool::new(true));
        let flag = slow.clone();
        let mut stepper = TimedStepper::spawn("c-once", engine.clone(), move |_: &mut ()| {
            if flag.swap(false, Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(100));
            }
            Ok(())
        })
        .unwrap();

        let outcome = coordinator
            .run_frame(&engine, &mut stepper, Duration::from_millis(10))
            .unwrap();
        assert_eq!(outcome.status, StepStatus::TimedOut);
        assert_eq!(coordinator.consecutive_timeouts(), 1);

        let outcome = coordinator
            .run_frame(&engine, &mut stepper, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Stepped);
        assert_eq!(coordinator.consecutive_timeouts(), 0);
    }
}
