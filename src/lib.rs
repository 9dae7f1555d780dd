//! saga-store - Saga 工作流编排器的持久化事务存储与定时器调度
//!
//! 模块划分：
//! - **checkpoint**: 事务检查点数据模型与内存检查点存储
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **observability**: 日志初始化
//! - **orchestrator**: 编排器重入门（定时器触发后重新进入 `run`）
//! - **persistence**: 持久化记录、写入器、记录存储（内存 / SQLite）
//! - **storage**: 对步骤执行引擎暴露的事务存储接口
//! - **timer**: 重试与超时定时器注册表

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod observability;
pub mod orchestrator;
pub mod persistence;
pub mod storage;
pub mod timer;

pub use checkpoint::{TransactionCheckpoint, TransactionRef, TransactionState};
pub use crate::core::{Result, StorageError};
pub use orchestrator::{RunOptions, WorkflowOrchestrator};
pub use storage::{DistributedTransactionStorage, InMemoryTransactionStorage};
