//! Frame Sync 错误类型

use thiserror::Error;

/// Frame Sync 错误
#[derive(Debug, Error)]
pub enum FrameError {
    /// 连续 step 超时次数超过上限（实例级致命错误）
    #[error("engine step timed out {consecutive} times in a row (max {max})")]
    TooManyTimeouts { consecutive: u32, max: u32 },

    /// 步进线程已退出
    #[error("stepper thread '{name}' is gone")]
    StepperGone { name: String },

    /// 线程创建失败
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FrameError>;
