//! 定时器键与命名空间

use std::fmt;

use crate::checkpoint::TransactionRef;
use crate::core::{Result, StorageError};

/// 两个互不相交的定时器集合
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TimerNamespace {
    /// 步骤级重试
    Retry,
    /// 事务级与步骤级超时（共享集合，键粒度不同）
    Timeout,
}

impl fmt::Display for TimerNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// `workflow_id:transaction_id`
pub fn transaction_key(transaction: &TransactionRef) -> Result<String> {
    transaction.validate()?;
    Ok(transaction.key())
}

/// `workflow_id:transaction_id:step_id`
pub fn step_key(transaction: &TransactionRef, step_id: &str) -> Result<String> {
    transaction.validate()?;
    if step_id.trim().is_empty() {
        return Err(StorageError::InvalidKey(format!(
            "empty step id for transaction '{}'",
            transaction.key()
        )));
    }
    Ok(format!("{}:{}", transaction.key(), step_id))
}
