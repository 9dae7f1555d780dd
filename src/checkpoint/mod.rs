//! 事务检查点：数据模型与内存检查点存储

pub mod store;
pub mod types;

pub use store::CheckpointStore;
pub use types::{
    TransactionCheckpoint, TransactionFlow, TransactionOptions, TransactionRef, TransactionState,
    TransactionStepError,
};
