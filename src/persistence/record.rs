//! 持久化记录：检查点的规范化形式
//!
//! definition 与 {data, errors} 以 JSON 文本存储，可无损还原。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::{TransactionCheckpoint, TransactionStepError};
use crate::core::Result;

/// 工作流执行记录，按 (workflow_id, transaction_id) upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionRecord {
    pub workflow_id: String,
    pub transaction_id: String,
    /// 序列化的步骤图
    pub definition: String,
    /// 序列化的 {data, errors}
    pub context: String,
    pub state: String,
    /// 保留时长（秒），仅终态记录携带
    pub retention_time: Option<u64>,
}

#[derive(Serialize)]
struct ContextBundleRef<'a> {
    data: &'a Value,
    errors: &'a [TransactionStepError],
}

/// 反序列化后的 {data, errors}
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContextBundle {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub errors: Vec<TransactionStepError>,
}

impl WorkflowExecutionRecord {
    pub fn from_checkpoint(checkpoint: &TransactionCheckpoint) -> Result<Self> {
        let definition = serde_json::to_string(&checkpoint.flow.definition)?;
        let context = serde_json::to_string(&ContextBundleRef {
            data: &checkpoint.context,
            errors: &checkpoint.errors,
        })?;

        Ok(Self {
            workflow_id: checkpoint.flow.model_id.clone(),
            transaction_id: checkpoint.flow.transaction_id.clone(),
            definition,
            context,
            state: checkpoint.flow.state.as_str().to_string(),
            retention_time: checkpoint.retention_time,
        })
    }

    pub fn decode_definition(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.definition)?)
    }

    pub fn decode_context(&self) -> Result<ContextBundle> {
        Ok(serde_json::from_str(&self.context)?)
    }

    pub fn key(&self) -> (String, String) {
        (self.workflow_id.clone(), self.transaction_id.clone())
    }
}
