//! saga-store 服务进程
//!
//! 入口：初始化日志、加载配置、打开记录存储、构造事务存储并绑定编排器，等待关闭信号后执行清理。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use saga_store::config::load_config;
use saga_store::core::shutdown::{
    run_with_graceful_shutdown, RecordStoreCleanup, TransactionStorageCleanup,
};
use saga_store::core::{ShutdownCoordinator, ShutdownManager};
use saga_store::persistence::create_record_store;
use saga_store::{observability, InMemoryTransactionStorage, RunOptions, WorkflowOrchestrator};

/// 未接入真实编排器时的占位实现：只记录重入请求
struct LoggingOrchestrator;

#[async_trait]
impl WorkflowOrchestrator for LoggingOrchestrator {
    async fn run(&self, workflow_id: &str, options: RunOptions) -> anyhow::Result<()> {
        tracing::info!(
            workflow_id,
            transaction_id = %options.transaction_id,
            throw_on_error = options.throw_on_error,
            "Re-entering workflow orchestrator"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let records = create_record_store(&cfg.storage)
        .await
        .context("Failed to open record store")?;

    // 两阶段构造：先存储，后编排器
    let storage = Arc::new(InMemoryTransactionStorage::new(Arc::clone(&records)));
    storage
        .bind_orchestrator(Arc::new(LoggingOrchestrator))
        .context("Failed to bind orchestrator")?;

    let manager = Arc::new(ShutdownManager::new());
    let mut coordinator =
        ShutdownCoordinator::new().with_timeout(cfg.timers.shutdown_timeout_secs);
    coordinator.register(TransactionStorageCleanup::new(Arc::clone(&storage)));
    coordinator.register(RecordStoreCleanup::new(records));

    tracing::info!("saga-store ready");

    run_with_graceful_shutdown(manager, std::future::pending::<()>(), move || async move {
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}
