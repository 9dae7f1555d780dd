//! 事务检查点类型定义
//!
//! 定义检查点、事务流、事务状态、执行错误等核心数据类型

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{Result, StorageError};

/// 事务状态（编排器定义的超集；存储层只区分终态与非终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    NotStarted,
    Invoking,
    WaitingToCompensate,
    Compensating,
    Done,
    Failed,
    Reverted,
    Dormant,
    Skipped,
    Timeout,
}

impl TransactionState {
    /// 终态：DONE / FAILED / REVERTED，此后事务不再推进
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Reverted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Invoking => "INVOKING",
            Self::WaitingToCompensate => "WAITING_TO_COMPENSATE",
            Self::Compensating => "COMPENSATING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Reverted => "REVERTED",
            Self::Dormant => "DORMANT",
            Self::Skipped => "SKIPPED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事务级选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptions {
    /// 终态记录的保留时长（秒），归档/删除由外部负责
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_time: Option<u64>,
    /// 编排器的其它选项，原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 事务流：身份、步骤图定义、当前状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFlow {
    /// 工作流 ID
    pub model_id: String,
    pub transaction_id: String,
    /// 序列化的步骤图
    #[serde(default)]
    pub definition: Value,
    pub state: TransactionState,
    #[serde(default)]
    pub options: TransactionOptions,
}

/// 步骤执行中记录的错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStepError {
    /// 步骤 ID
    pub action: String,
    /// invoke / compensate
    pub handler_type: String,
    pub error: Value,
}

/// 事务检查点：某一时刻分布式事务的完整快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCheckpoint {
    pub flow: TransactionFlow,
    /// 累积的执行数据
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub errors: Vec<TransactionStepError>,
    /// 仅在终态保存时由存储层写入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_time: Option<u64>,
}

impl TransactionCheckpoint {
    pub fn new(
        workflow_id: impl Into<String>,
        transaction_id: impl Into<String>,
        state: TransactionState,
    ) -> Self {
        Self {
            flow: TransactionFlow {
                model_id: workflow_id.into(),
                transaction_id: transaction_id.into(),
                definition: Value::Null,
                state,
                options: TransactionOptions::default(),
            },
            context: Value::Object(Map::new()),
            errors: Vec::new(),
            retention_time: None,
        }
    }

    pub fn with_definition(mut self, definition: Value) -> Self {
        self.flow.definition = definition;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_retention_time(mut self, secs: u64) -> Self {
        self.flow.options.retention_time = Some(secs);
        self
    }

    pub fn with_error(mut self, error: TransactionStepError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn state(&self) -> TransactionState {
        self.flow.state
    }

    pub fn is_final(&self) -> bool {
        self.flow.state.is_final()
    }

    pub fn transaction_ref(&self) -> TransactionRef {
        TransactionRef::new(&self.flow.model_id, &self.flow.transaction_id)
    }

    /// 约定的存储键：`workflow_id:transaction_id`
    pub fn key(&self) -> String {
        self.transaction_ref().key()
    }

    /// 身份字段缺失时拒绝
    pub fn validate(&self) -> Result<()> {
        if self.flow.model_id.trim().is_empty() {
            return Err(StorageError::InvalidCheckpoint(
                "flow.modelId is empty".to_string(),
            ));
        }
        if self.flow.transaction_id.trim().is_empty() {
            return Err(StorageError::InvalidCheckpoint(
                "flow.transactionId is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 事务身份（工作流 ID + 事务 ID），定时器 API 以此定位事务
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionRef {
    pub workflow_id: String,
    pub transaction_id: String,
}

impl TransactionRef {
    pub fn new(workflow_id: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            transaction_id: transaction_id.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.workflow_id, self.transaction_id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow_id.trim().is_empty() || self.transaction_id.trim().is_empty() {
            return Err(StorageError::InvalidKey(format!(
                "incomplete transaction identity '{}'",
                self.key()
            )));
        }
        Ok(())
    }
}
