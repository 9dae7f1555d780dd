//! 定时器注册表：重试与超时两个集合
//!
//! 每个定时器是一个 tokio 任务：先等到截止时间，再在集合锁内「认领」自己的条目
//! （按代号比对），认领成功才重入编排器。`clear_*` 在同一把锁内移除条目并取消 token，
//! 因此在回调开始前完成的清除必定阻止副作用；已认领的触发不会被追溯取消。
//!
//! 同一 key 重复调度时替换旧条目并取消旧定时器。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::key::{step_key, transaction_key, TimerNamespace};
use crate::checkpoint::TransactionRef;
use crate::core::{Result, StorageError};
use crate::orchestrator::OrchestratorGate;

struct TimerEntry {
    /// 代号，区分同一 key 上先后调度的定时器
    id: u64,
    token: CancellationToken,
}

type TimerMap = Mutex<HashMap<String, TimerEntry>>;

struct RegistryInner {
    retries: TimerMap,
    timeouts: TimerMap,
    gate: Arc<OrchestratorGate>,
}

impl RegistryInner {
    fn collection(&self, namespace: TimerNamespace) -> MutexGuard<'_, HashMap<String, TimerEntry>> {
        let map = match namespace {
            TimerNamespace::Retry => &self.retries,
            TimerNamespace::Timeout => &self.timeouts,
        };
        map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 触发前认领：条目仍是自己时移除并返回 true
    fn claim(&self, namespace: TimerNamespace, key: &str, id: u64) -> bool {
        let mut timers = self.collection(namespace);
        match timers.get(key) {
            Some(entry) if entry.id == id => {
                timers.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// 定时器注册表，生命周期与服务实例绑定
pub struct TimerRegistry {
    inner: Arc<RegistryInner>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl TimerRegistry {
    pub fn new(gate: Arc<OrchestratorGate>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                retries: Mutex::new(HashMap::new()),
                timeouts: Mutex::new(HashMap::new()),
                gate,
            }),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn schedule_retry(
        &self,
        transaction: &TransactionRef,
        step_id: &str,
        interval_secs: f64,
    ) -> Result<()> {
        let key = step_key(transaction, step_id)?;
        self.schedule(TimerNamespace::Retry, key, transaction, interval_secs)
    }

    pub fn clear_retry(&self, transaction: &TransactionRef, step_id: &str) -> Result<()> {
        let key = step_key(transaction, step_id)?;
        self.clear(TimerNamespace::Retry, &key);
        Ok(())
    }

    pub fn schedule_transaction_timeout(
        &self,
        transaction: &TransactionRef,
        interval_secs: f64,
    ) -> Result<()> {
        let key = transaction_key(transaction)?;
        self.schedule(TimerNamespace::Timeout, key, transaction, interval_secs)
    }

    pub fn clear_transaction_timeout(&self, transaction: &TransactionRef) -> Result<()> {
        let key = transaction_key(transaction)?;
        self.clear(TimerNamespace::Timeout, &key);
        Ok(())
    }

    pub fn schedule_step_timeout(
        &self,
        transaction: &TransactionRef,
        step_id: &str,
        interval_secs: f64,
    ) -> Result<()> {
        let key = step_key(transaction, step_id)?;
        self.schedule(TimerNamespace::Timeout, key, transaction, interval_secs)
    }

    pub fn clear_step_timeout(&self, transaction: &TransactionRef, step_id: &str) -> Result<()> {
        let key = step_key(transaction, step_id)?;
        self.clear(TimerNamespace::Timeout, &key);
        Ok(())
    }

    fn schedule(
        &self,
        namespace: TimerNamespace,
        key: String,
        transaction: &TransactionRef,
        interval_secs: f64,
    ) -> Result<()> {
        let delay = Duration::try_from_secs_f64(interval_secs).map_err(|e| {
            StorageError::InvalidDelay(format!("{} ({}s)", e, interval_secs))
        })?;
        let deadline = Instant::now().checked_add(delay).ok_or_else(|| {
            StorageError::InvalidDelay(format!("deadline overflow ({}s)", interval_secs))
        })?;
        self.inner.gate.ensure_bound()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();

        {
            let mut timers = self.inner.collection(namespace);
            if self.shutdown.is_cancelled() {
                return Err(StorageError::RegistryClosed);
            }
            let previous = timers.insert(
                key.clone(),
                TimerEntry {
                    id,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
                tracing::debug!(%namespace, key = %key, "Replaced pending timer");
            }
        }

        tracing::debug!(%namespace, key = %key, delay_secs = interval_secs, "Timer scheduled");

        let inner = Arc::clone(&self.inner);
        let workflow_id = transaction.workflow_id.clone();
        let transaction_id = transaction.transaction_id.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            if !inner.claim(namespace, &key, id) {
                return;
            }

            tracing::debug!(%namespace, key = %key, "Timer fired");
            // 未绑定时 gate 已记录 error
            let _ = inner.gate.reenter(&workflow_id, &transaction_id).await;
        });

        Ok(())
    }

    /// 移除并取消；key 不存在时无操作
    fn clear(&self, namespace: TimerNamespace, key: &str) {
        let removed = self.inner.collection(namespace).remove(key);
        if let Some(entry) = removed {
            entry.token.cancel();
            tracing::debug!(%namespace, key, "Timer cleared");
        }
    }

    pub fn is_pending(&self, namespace: TimerNamespace, key: &str) -> bool {
        self.inner.collection(namespace).contains_key(key)
    }

    pub fn pending_retries(&self) -> usize {
        self.inner.collection(TimerNamespace::Retry).len()
    }

    pub fn pending_timeouts(&self) -> usize {
        self.inner.collection(TimerNamespace::Timeout).len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 取消所有未触发的定时器并拒绝新的调度，返回取消数量
    pub fn shutdown(&self) -> usize {
        self.shutdown.cancel();

        let mut cancelled = 0;
        for namespace in [TimerNamespace::Retry, TimerNamespace::Timeout] {
            let drained: Vec<_> = self.inner.collection(namespace).drain().collect();
            cancelled += drained.len();
            for (_, entry) in drained {
                entry.token.cancel();
            }
        }
        self.tracker.close();

        tracing::info!("Timer registry shut down, {} pending timers cancelled", cancelled);
        cancelled
    }

    /// 等待已开始的触发回调执行完毕（需先调用 `shutdown`）
    pub async fn wait_idle(&self) {
        self.tracker.wait().await;
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{RunOptions, WorkflowOrchestrator};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingOrchestrator {
        calls: std::sync::Mutex<Vec<(String, RunOptions)>>,
    }

    impl CountingOrchestrator {
        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WorkflowOrchestrator for CountingOrchestrator {
        async fn run(&self, workflow_id: &str, options: RunOptions) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((workflow_id.to_string(), options));
            Ok(())
        }
    }

    fn registry() -> (TimerRegistry, Arc<CountingOrchestrator>) {
        let gate = Arc::new(OrchestratorGate::new());
        let orchestrator = Arc::new(CountingOrchestrator::default());
        gate.bind(orchestrator.clone()).unwrap();
        (TimerRegistry::new(gate), orchestrator)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_timeout_fires_once() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_transaction_timeout(&tx, 2.0).unwrap();
        assert_eq!(registry.pending_timeouts(), 1);

        advance(1_900).await;
        assert_eq!(orchestrator.count(), 0);

        advance(1_000).await;
        let calls = orchestrator.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "wf1");
        assert_eq!(calls[0].1.transaction_id, "tx1");
        assert!(!calls[0].1.throw_on_error);

        // 触发后条目自动移除，clear 变为空操作
        assert_eq!(registry.pending_timeouts(), 0);
        registry.clear_transaction_timeout(&tx).unwrap();

        advance(10_000).await;
        assert_eq!(orchestrator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_step_timeout_never_fires() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_step_timeout(&tx, "s1", 1.0).unwrap();
        registry.clear_step_timeout(&tx, "s1").unwrap();

        advance(5_000).await;
        assert_eq!(orchestrator.count(), 0);
        assert_eq!(registry.pending_timeouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_is_idempotent() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_retry(&tx, "s1", 1.0).unwrap();
        registry.clear_retry(&tx, "s1").unwrap();
        registry.clear_retry(&tx, "s1").unwrap();
        registry.clear_transaction_timeout(&tx).unwrap();
        registry.clear_step_timeout(&tx, "never-scheduled").unwrap();

        advance(3_000).await;
        assert_eq!(orchestrator.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_and_timeout_namespaces_are_isolated() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_retry(&tx, "s1", 5.0).unwrap();
        registry.schedule_step_timeout(&tx, "s1", 5.0).unwrap();
        assert!(registry.is_pending(TimerNamespace::Retry, "wf1:tx1:s1"));
        assert!(registry.is_pending(TimerNamespace::Timeout, "wf1:tx1:s1"));

        registry.clear_retry(&tx, "s1").unwrap();
        assert!(!registry.is_pending(TimerNamespace::Retry, "wf1:tx1:s1"));
        assert!(registry.is_pending(TimerNamespace::Timeout, "wf1:tx1:s1"));

        advance(6_000).await;
        assert_eq!(orchestrator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_and_step_timeouts_do_not_collide() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_transaction_timeout(&tx, 1.0).unwrap();
        registry.schedule_step_timeout(&tx, "s1", 1.0).unwrap();
        registry.schedule_step_timeout(&tx, "s2", 1.0).unwrap();
        assert_eq!(registry.pending_timeouts(), 3);

        registry.clear_step_timeout(&tx, "s2").unwrap();
        advance(2_000).await;
        assert_eq!(orchestrator.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_timer() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_retry(&tx, "s1", 1.0).unwrap();
        registry.schedule_retry(&tx, "s1", 3.0).unwrap();
        assert_eq!(registry.pending_retries(), 1);

        advance(2_000).await;
        assert_eq!(orchestrator.count(), 0);

        advance(2_000).await;
        assert_eq!(orchestrator.count(), 1);

        advance(10_000).await;
        assert_eq!(orchestrator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_and_rejects_new() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_retry(&tx, "s1", 1.0).unwrap();
        registry.schedule_transaction_timeout(&tx, 1.0).unwrap();

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_shutdown());
        assert!(matches!(
            registry.schedule_retry(&tx, "s2", 1.0),
            Err(StorageError::RegistryClosed)
        ));

        registry.wait_idle().await;
        advance(5_000).await;
        assert_eq!(orchestrator.count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_requires_bound_orchestrator() {
        let registry = TimerRegistry::new(Arc::new(OrchestratorGate::new()));
        let tx = TransactionRef::new("wf1", "tx1");

        assert!(matches!(
            registry.schedule_transaction_timeout(&tx, 1.0),
            Err(StorageError::OrchestratorUnbound)
        ));
        assert_eq!(registry.pending_timeouts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_delay_rejected() {
        let (registry, _) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        assert!(matches!(
            registry.schedule_retry(&tx, "s1", -1.0),
            Err(StorageError::InvalidDelay(_))
        ));
        assert!(registry.schedule_retry(&tx, "s1", f64::NAN).is_err());
        assert_eq!(registry.pending_retries(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_rejected() {
        let (registry, _) = registry();
        let tx = TransactionRef::new("wf1", "tx1");

        assert!(matches!(
            registry.schedule_retry(&tx, "s1", 1.8e19),
            Err(StorageError::InvalidDelay(_))
        ));
        assert!(matches!(
            registry.schedule_transaction_timeout(&tx, f64::MAX),
            Err(StorageError::InvalidDelay(_))
        ));
        assert_eq!(registry.pending_retries(), 0);
        assert_eq!(registry.pending_timeouts(), 0);
    }

    /// `run` 开始后阻塞，直到测试放行
    #[derive(Default)]
    struct BlockingOrchestrator {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
        completed: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl WorkflowOrchestrator for BlockingOrchestrator {
        async fn run(&self, _workflow_id: &str, _options: RunOptions) -> anyhow::Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_fire_does_not_cancel_reentry() {
        let gate = Arc::new(OrchestratorGate::new());
        let orchestrator = Arc::new(BlockingOrchestrator::default());
        gate.bind(orchestrator.clone()).unwrap();
        let registry = TimerRegistry::new(gate);
        let tx = TransactionRef::new("wf1", "tx1");

        registry.schedule_retry(&tx, "s1", 1.0).unwrap();
        orchestrator.started.notified().await;

        // 回调已开始：清除是空操作
        assert_eq!(registry.pending_retries(), 0);
        registry.clear_retry(&tx, "s1").unwrap();

        orchestrator.release.notify_one();
        registry.shutdown();
        registry.wait_idle().await;
        assert_eq!(orchestrator.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_loses_claim_after_reschedule() {
        let (registry, orchestrator) = registry();
        let tx = TransactionRef::new("wf1", "tx1");
        let key = "wf1:tx1:s1";

        registry.schedule_retry(&tx, "s1", 1.0).unwrap();
        let stale_id = registry.inner.collection(TimerNamespace::Retry)[key].id;
        registry.schedule_retry(&tx, "s1", 3.0).unwrap();

        // 旧定时器即使已睡醒，也认领不到替换后的条目
        assert!(!registry.inner.claim(TimerNamespace::Retry, key, stale_id));
        assert!(registry.is_pending(TimerNamespace::Retry, key));

        advance(4_000).await;
        assert_eq!(orchestrator.count(), 1);
        assert_eq!(registry.pending_retries(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_fires_across_transactions() {
        let (registry, orchestrator) = registry();

        for i in 0..20 {
            let tx = TransactionRef::new("wf1", format!("tx{}", i));
            registry.schedule_step_timeout(&tx, "s1", 0.05).unwrap();
            registry.schedule_retry(&tx, "s1", 0.05).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(orchestrator.count(), 40);
        assert_eq!(registry.pending_retries(), 0);
        assert_eq!(registry.pending_timeouts(), 0);
    }
}
