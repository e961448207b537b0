//! # Change Tracker
//!
//! 基于滑动窗口的逐帧实体变更检测。
//!
//! 负责：
//! - 对比上一帧与当前帧，得到 disappeared / appeared / updated
//! - 高度平滑（当前高度为 0 时沿用上一帧高度，并重新计算 pitch）
//! - 消失/出现两个滑动窗口及其去重合并视图
//! - 供控制线程消费的 added / removed 队列
//!
//! ## 使用示例
//!
//! ```ignore
//! use change_tracker::ChangeTracker;
//!
//! let mut tracker = ChangeTracker::new(10);
//! let changes = tracker.track(engine_snapshots);
//! for entity in tracker.consolidated_appearing() {
//!     // ...
//! }
//! ```

mod drain;
mod tracker;
mod window;

pub use drain::DrainQueue;
pub use tracker::{smooth_height, ChangeTracker, QUEUE_LIMIT};
pub use window::{Keyed, SlidingWindow};
