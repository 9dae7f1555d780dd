//! 记录存储抽象层
//!
//! 定义外部记录存储的 upsert 接口，提供内存实现；SQLite 实现见 `sqlite` 模块

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::record::WorkflowExecutionRecord;
use crate::core::Result;

/// 记录存储接口（按 workflow_id + transaction_id upsert）
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 批量插入或覆盖记录
    async fn upsert(&self, records: Vec<WorkflowExecutionRecord>) -> Result<()>;

    /// 查询单条记录（已完成事务只能从这里读取）
    async fn find(
        &self,
        workflow_id: &str,
        transaction_id: &str,
    ) -> Result<Option<WorkflowExecutionRecord>>;

    /// 关闭底层连接；默认无操作
    async fn close(&self) {}
}

/// 内存记录存储（测试与无数据库部署使用）
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<(String, String), WorkflowExecutionRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, records: Vec<WorkflowExecutionRecord>) -> Result<()> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.key(), record);
        }
        Ok(())
    }

    async fn find(
        &self,
        workflow_id: &str,
        transaction_id: &str,
    ) -> Result<Option<WorkflowExecutionRecord>> {
        let key = (workflow_id.to_string(), transaction_id.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }
}
