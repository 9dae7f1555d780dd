//! 异步 SQLite 记录存储
//!
//! 使用 sqlx 提供完全异步的 upsert，避免在 async 上下文中阻塞。
//! 需要启用 `async-sqlite` feature。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::record::WorkflowExecutionRecord;
use super::store::RecordStore;
use crate::core::Result;

/// SQLite 记录存储：表 workflow_executions，主键 (workflow_id, transaction_id)
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn new(db_path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;

        Ok(store)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_executions (
                workflow_id TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                definition TEXT NOT NULL,
                context TEXT NOT NULL,
                state TEXT NOT NULL,
                retention_time INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (workflow_id, transaction_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_workflow_executions_state ON workflow_executions(state)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, records: Vec<WorkflowExecutionRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();

        for record in &records {
            sqlx::query(
                "INSERT INTO workflow_executions
                 (workflow_id, transaction_id, definition, context, state, retention_time, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(workflow_id, transaction_id) DO UPDATE SET
                    definition = excluded.definition,
                    context = excluded.context,
                    state = excluded.state,
                    retention_time = excluded.retention_time,
                    updated_at = excluded.updated_at",
            )
            .bind(&record.workflow_id)
            .bind(&record.transaction_id)
            .bind(&record.definition)
            .bind(&record.context)
            .bind(&record.state)
            .bind(record.retention_time.map(|v| v as i64))
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find(
        &self,
        workflow_id: &str,
        transaction_id: &str,
    ) -> Result<Option<WorkflowExecutionRecord>> {
        let row = sqlx::query(
            "SELECT workflow_id, transaction_id, definition, context, state, retention_time
             FROM workflow_executions
             WHERE workflow_id = ? AND transaction_id = ?",
        )
        .bind(workflow_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| WorkflowExecutionRecord {
            workflow_id: row.get("workflow_id"),
            transaction_id: row.get("transaction_id"),
            definition: row.get("definition"),
            context: row.get("context"),
            state: row.get("state"),
            retention_time: row
                .get::<Option<i64>, _>("retention_time")
                .map(|v| v as u64),
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
