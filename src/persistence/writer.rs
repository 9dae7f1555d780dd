//! 持久化写入：检查点 → 规范化记录 → upsert
//!
//! 写入失败不重试，错误交给 `save` 的调用方。

use std::sync::Arc;

use super::record::WorkflowExecutionRecord;
use super::store::RecordStore;
use crate::checkpoint::TransactionCheckpoint;
use crate::core::Result;

#[derive(Clone)]
pub struct DurableWriter {
    store: Arc<dyn RecordStore>,
}

impl DurableWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn write(&self, checkpoint: &TransactionCheckpoint) -> Result<()> {
        let record = WorkflowExecutionRecord::from_checkpoint(checkpoint)?;
        tracing::debug!(
            workflow_id = %record.workflow_id,
            transaction_id = %record.transaction_id,
            state = %record.state,
            "Upserting workflow execution record"
        );
        self.store.upsert(vec![record]).await
    }
}
