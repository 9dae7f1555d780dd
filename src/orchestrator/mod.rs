//! 编排器重入门
//!
//! 定时器触发后通过这里重新进入编排器的 `run` 入口。编排器在存储构造之后才绑定（两阶段构造），
//! 未绑定时调度直接报错，触发时以 error 级别记录，绝不静默丢弃。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::core::{Result, StorageError};

/// `run` 的调用参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub transaction_id: String,
    /// false：吞掉步骤错误，由编排器状态机决定下一步
    pub throw_on_error: bool,
}

/// 编排器入口（外部协作者）；对已完成或已清理的事务调用必须是无害的空操作
#[async_trait]
pub trait WorkflowOrchestrator: Send + Sync {
    async fn run(&self, workflow_id: &str, options: RunOptions) -> anyhow::Result<()>;
}

/// 延迟绑定的编排器句柄
#[derive(Default)]
pub struct OrchestratorGate {
    orchestrator: OnceLock<Arc<dyn WorkflowOrchestrator>>,
}

impl OrchestratorGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定编排器，只允许一次
    pub fn bind(&self, orchestrator: Arc<dyn WorkflowOrchestrator>) -> Result<()> {
        self.orchestrator
            .set(orchestrator)
            .map_err(|_| StorageError::OrchestratorAlreadyBound)
    }

    pub fn is_bound(&self) -> bool {
        self.orchestrator.get().is_some()
    }

    pub fn ensure_bound(&self) -> Result<()> {
        if self.is_bound() {
            Ok(())
        } else {
            Err(StorageError::OrchestratorUnbound)
        }
    }

    /// 以容错模式重入编排器；编排器内部错误只记录，不再向上传递
    pub async fn reenter(&self, workflow_id: &str, transaction_id: &str) -> Result<()> {
        let Some(orchestrator) = self.orchestrator.get() else {
            tracing::error!(
                workflow_id,
                transaction_id,
                "Timer fired but no workflow orchestrator is bound; re-entry dropped"
            );
            return Err(StorageError::OrchestratorUnbound);
        };

        let options = RunOptions {
            transaction_id: transaction_id.to_string(),
            throw_on_error: false,
        };
        if let Err(e) = orchestrator.run(workflow_id, options).await {
            tracing::warn!(workflow_id, transaction_id, "Orchestrator re-entry failed: {:#}", e);
        }
        Ok(())
    }
}
