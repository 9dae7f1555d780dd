//! 存储层错误类型
//!
//! 校验错误在修改任何状态之前同步返回；持久化失败原样传递给 `save` 的调用方，不做内部重试。

use thiserror::Error;

/// 检查点存储、持久化与定时器调度过程中可能出现的错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid timer delay: {0}")]
    InvalidDelay(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 记录存储拒绝写入或不可达
    #[error("Record store error: {0}")]
    RecordStore(String),

    #[cfg(feature = "async-sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 编排器尚未绑定（两阶段构造未完成），属于配置错误
    #[error("Workflow orchestrator is not bound")]
    OrchestratorUnbound,

    #[error("Workflow orchestrator is already bound")]
    OrchestratorAlreadyBound,

    /// 定时器注册表已关闭，不再接受新的调度
    #[error("Timer registry is shut down")]
    RegistryClosed,
}

pub type Result<T> = std::result::Result<T, StorageError>;
