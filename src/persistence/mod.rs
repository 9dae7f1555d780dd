//! 持久化层：记录形状、写入器、记录存储（内存 / SQLite）

use std::sync::Arc;

use crate::config::StorageSection;

pub mod record;
pub mod sqlite;
pub mod store;
pub mod writer;

pub use record::{ContextBundle, WorkflowExecutionRecord};
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteRecordStore;
pub use store::{MemoryRecordStore, RecordStore};
pub use writer::DurableWriter;

/// 创建记录存储
///
/// 配置了 database_path 且启用了 async-sqlite feature 时使用 SQLite；否则使用内存存储
pub async fn create_record_store(
    section: &StorageSection,
) -> crate::core::Result<Arc<dyn RecordStore>> {
    #[cfg(feature = "async-sqlite")]
    if let Some(path) = &section.database_path {
        let store = SqliteRecordStore::new(path, section.max_connections).await?;
        tracing::info!("Using SQLite record store: {:?}", path);
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "async-sqlite"))]
    if section.database_path.is_some() {
        tracing::warn!(
            "SQLite record store requested but async-sqlite feature not enabled, using memory store"
        );
    }

    tracing::info!("Using in-memory record store");
    Ok(Arc::new(MemoryRecordStore::new()))
}
