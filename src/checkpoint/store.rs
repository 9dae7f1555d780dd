//! 检查点存储：活跃事务的内存热缓存 + 每次保存同步持久化
//!
//! - 同一 key 的 `save` 通过按 key 的异步互斥锁串行化（覆盖写入、持久化、驱逐三步原子）
//! - 终态检查点只有在持久化成功之后才从内存驱逐
//! - 持久化失败时内存条目保持最后一次写入的值，调用方可重试

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use super::types::TransactionCheckpoint;
use crate::core::{Result, StorageError};
use crate::persistence::DurableWriter;

type KeyLock = Arc<tokio::sync::Mutex<()>>;
type KeyLockMap = Mutex<HashMap<String, KeyLock>>;

/// key 锁表中的一份引用；离开作用域时（包括 future 被中途丢弃）回收无人等待的条目
struct KeyLockSlot<'a> {
    locks: &'a KeyLockMap,
    key: &'a str,
    lock: KeyLock,
}

impl<'a> KeyLockSlot<'a> {
    fn acquire(locks: &'a KeyLockMap, key: &'a str) -> Self {
        let lock = {
            let mut map = locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        Self { locks, key, lock }
    }
}

impl Drop for KeyLockSlot<'_> {
    fn drop(&mut self) {
        let mut map = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // 只剩 map 与当前持有者两份引用时无人等待
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(self.key);
        }
    }
}

pub struct CheckpointStore {
    /// 活跃检查点
    checkpoints: RwLock<HashMap<String, TransactionCheckpoint>>,
    /// 按 key 的写锁；无人等待时回收
    key_locks: KeyLockMap,
    writer: DurableWriter,
}

impl CheckpointStore {
    pub fn new(writer: DurableWriter) -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            writer,
        }
    }

    /// 读取内存中的检查点；不回退到持久化存储
    pub async fn get(&self, key: &str) -> Option<TransactionCheckpoint> {
        self.checkpoints.read().await.get(key).cloned()
    }

    /// 所有活跃检查点的快照，顺序无意义
    pub async fn list(&self) -> Vec<TransactionCheckpoint> {
        self.checkpoints.read().await.values().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// 覆盖写入并持久化；终态时写入保留时长并在持久化成功后驱逐
    ///
    /// `ttl` 仅为接口兼容保留，内存条目没有过期时间。
    pub async fn save(
        &self,
        key: &str,
        checkpoint: TransactionCheckpoint,
        ttl: Option<u64>,
    ) -> Result<()> {
        if key.trim().is_empty() {
            return Err(StorageError::InvalidKey("checkpoint key is empty".to_string()));
        }
        checkpoint.validate()?;

        let slot = KeyLockSlot::acquire(&self.key_locks, key);
        let _guard = slot.lock.lock().await;
        self.save_locked(key, checkpoint, ttl).await
    }

    async fn save_locked(
        &self,
        key: &str,
        mut checkpoint: TransactionCheckpoint,
        ttl: Option<u64>,
    ) -> Result<()> {
        let is_final = checkpoint.is_final();
        if is_final {
            checkpoint.retention_time = checkpoint.flow.options.retention_time;
        }

        self.checkpoints
            .write()
            .await
            .insert(key.to_string(), checkpoint.clone());

        self.writer.write(&checkpoint).await?;

        if is_final {
            self.checkpoints.write().await.remove(key);
            tracing::debug!(
                key,
                state = %checkpoint.state(),
                retention_time = ?checkpoint.retention_time,
                "Evicted finished transaction checkpoint"
            );
        } else {
            tracing::trace!(key, state = %checkpoint.state(), ttl = ?ttl, "Checkpoint saved");
        }

        Ok(())
    }

    /// 仅驱逐内存条目，不触碰持久化记录
    pub async fn delete(&self, key: &str) {
        let slot = KeyLockSlot::acquire(&self.key_locks, key);
        let _guard = slot.lock.lock().await;
        self.checkpoints.write().await.remove(key);
    }

    #[cfg(test)]
    fn key_lock_count(&self) -> usize {
        self.key_locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
