//! 分布式事务存储
//!
//! 组合检查点存储、持久化写入器、定时器注册表与编排器重入门，对步骤执行引擎暴露统一接口。
//!
//! 构造分两步：先 `new` 创建存储，再 `bind_orchestrator` 绑定编排器（编排器本身依赖存储）。

use std::sync::Arc;

use async_trait::async_trait;

use crate::checkpoint::{CheckpointStore, TransactionCheckpoint, TransactionRef};
use crate::core::Result;
use crate::orchestrator::{OrchestratorGate, WorkflowOrchestrator};
use crate::persistence::{DurableWriter, RecordStore};
use crate::timer::TimerRegistry;

/// 步骤执行引擎使用的存储接口
#[async_trait]
pub trait DistributedTransactionStorage: Send + Sync {
    async fn get(&self, key: &str) -> Option<TransactionCheckpoint>;

    async fn list(&self) -> Vec<TransactionCheckpoint>;

    async fn save(&self, key: &str, checkpoint: TransactionCheckpoint, ttl: Option<u64>)
        -> Result<()>;

    async fn delete(&self, key: &str);

    /// `timestamp` 为引擎给出的预期触发时间（毫秒），仅用于日志；实际延迟由 `interval` 决定
    async fn schedule_retry(
        &self,
        transaction: &TransactionRef,
        step_id: &str,
        timestamp: i64,
        interval: f64,
    ) -> Result<()>;

    async fn clear_retry(&self, transaction: &TransactionRef, step_id: &str) -> Result<()>;

    async fn schedule_transaction_timeout(
        &self,
        transaction: &TransactionRef,
        timestamp: i64,
        interval: f64,
    ) -> Result<()>;

    async fn clear_transaction_timeout(&self, transaction: &TransactionRef) -> Result<()>;

    async fn schedule_step_timeout(
        &self,
        transaction: &TransactionRef,
        step_id: &str,
        timestamp: i64,
        interval: f64,
    ) -> Result<()>;

    async fn clear_step_timeout(&self, transaction: &TransactionRef, step_id: &str) -> Result<()>;
}

/// 内存检查点 + 持久化记录 + 进程内定时器
pub struct InMemoryTransactionStorage {
    checkpoints: CheckpointStore,
    timers: TimerRegistry,
    gate: Arc<OrchestratorGate>,
    records: Arc<dyn RecordStore>,
}

impl InMemoryTransactionStorage {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        let gate = Arc::new(OrchestratorGate::new());
        Self {
            checkpoints: CheckpointStore::new(DurableWriter::new(Arc::clone(&records))),
            timers: TimerRegistry::new(Arc::clone(&gate)),
            gate,
            records,
        }
    }

    /// 绑定编排器，之后才能调度定时器
    pub fn bind_orchestrator(&self, orchestrator: Arc<dyn WorkflowOrchestrator>) -> Result<()> {
        self.gate.bind(orchestrator)?;
        tracing::info!("Workflow orchestrator bound to transaction storage");
        Ok(())
    }

    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub async fn active_count(&self) -> usize {
        self.checkpoints.active_count().await
    }

    /// 取消全部定时器并等待已开始的回调结束
    pub async fn shutdown(&self) {
        self.timers.shutdown();
        self.timers.wait_idle().await;
    }
}

fn log_schedule(
    kind: &str,
    transaction: &TransactionRef,
    step_id: Option<&str>,
    timestamp: i64,
    interval: f64,
) {
    let fire_hint = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(timestamp)
        .map(|t| t.to_rfc3339());
    tracing::debug!(
        kind,
        workflow_id = %transaction.workflow_id,
        transaction_id = %transaction.transaction_id,
        step_id = ?step_id,
        fire_hint = ?fire_hint,
        interval,
        "Scheduling timer"
    );
}

#[async_trait]
impl DistributedTransactionStorage for InMemoryTransactionStorage {
    async fn get(&self, key: &str) -> Option<TransactionCheckpoint> {
        self.checkpoints.get(key).await
    }

    async fn list(&self) -> Vec<TransactionCheckpoint> {
        self.checkpoints.list().await
    }

    async fn save(
        &self,
        key: &str,
        checkpoint: TransactionCheckpoint,
        ttl: Option<u64>,
    ) -> Result<()> {
        self.checkpoints.save(key, checkpoint, ttl).await
    }

    async fn delete(&self, key: &str) {
        self.checkpoints.delete(key).await
    }

    async fn schedule_retry(
        &self,
        transaction: &TransactionRef,
        step_id: &str,
        timestamp: i64,
        interval: f64,
    ) -> Result<()> {
        log_schedule("retry", transaction, Some(step_id), timestamp, interval);
        self.timers.schedule_retry(transaction, step_id, interval)
    }

    async fn clear_retry(&self, transaction: &TransactionRef, step_id: &str) -> Result<()> {
        self.timers.clear_retry(transaction, step_id)
    }

    async fn schedule_transaction_timeout(
        &self,
        transaction: &TransactionRef,
        timestamp: i64,
        interval: f64,
    ) -> Result<()> {
        log_schedule("transaction_timeout", transaction, None, timestamp, interval);
        self.timers.schedule_transaction_timeout(transaction, interval)
    }

    async fn clear_transaction_timeout(&self, transaction: &TransactionRef) -> Result<()> {
        self.timers.clear_transaction_timeout(transaction)
    }

    async fn schedule_step_timeout(
        &self,
        transaction: &TransactionRef,
        step_id: &str,
        timestamp: i64,
        interval: f64,
    ) -> Result<()> {
        log_schedule("step_timeout", transaction, Some(step_id), timestamp, interval);
        self.timers.schedule_step_timeout(transaction, step_id, interval)
    }

    async fn clear_step_timeout(&self, transaction: &TransactionRef, step_id: &str) -> Result<()> {
        self.timers.clear_step_timeout(transaction, step_id)
    }
}
