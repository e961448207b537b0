//! # Frame Sync
//!
//! 仿真帧同步协议。
//!
//! 负责：
//! - `InitComplete` / `StepComplete` 两个电平触发的门闩
//! - 跨线程延迟命令队列（仅仿真线程消费）
//! - 带超时的引擎步进与连续超时计数
//! - 帧节拍：睡眠补足帧间隔，周期性输出帧耗时统计
//!
//! ## 使用示例
//!
//! ```ignore
//! use frame_sync::{FrameClock, FrameCoordinator, TimedStepper};
//!
//! let coordinator = FrameCoordinator::new("XD", 10);
//! let mut stepper = TimedStepper::spawn("XD-step", engine.clone(), |e| e.step(0.03))?;
//! let mut clock = FrameClock::new("XD", 30);
//!
//! coordinator.set_init(true);
//! while running.load(Ordering::Relaxed) {
//!     let outcome = coordinator.run_frame(&engine, &mut stepper, timeout)?;
//!     clock.finish_frame(&outcome);
//! }
//! ```

mod coordinator;
mod error;
mod latch;
mod pacing;
mod queue;
mod stepper;

pub use coordinator::{FrameCoordinator, FrameOutcome, StepStatus};
pub use error::{FrameError, Result};
pub use latch::Latch;
pub use pacing::{FrameClock, StepAccumulator};
pub use queue::{Command, CommandQueue};
pub use stepper::{StepError, TimedStepper};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
