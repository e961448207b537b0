//! Orchestrator 错误类型

use thiserror::Error;

/// Orchestrator 错误
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// 帧协议错误（连续超时、步进线程退出）
    #[error(transparent)]
    Frame(#[from] frame_sync::FrameError),

    /// 引擎调用失败
    #[error(transparent)]
    Engine(#[from] sim_engine::EngineError),

    /// 连接池创建失败
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// 任务线程创建失败
    #[error("failed to spawn task '{name}': {source}")]
    Spawn {
        /// 线程名
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 任务线程 panic
    #[error("task '{name}' panicked")]
    TaskPanicked {
        /// 线程名
        name: String,
    },
}

/// Orchestrator Result 类型别名
pub type Result<T> = std::result::Result<T, OrchestratorError>;
