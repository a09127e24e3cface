use async_trait::async_trait;
use bullpen_core::cache::error::CacheError;
use bullpen_core::cache::port::Cache;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// 单个缓存条目
struct Entry {
    value: Vec<u8>,
    // 过期时刻，None 表示永不过期
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// # Summary
/// 基于 DashMap 的内存缓存实现，支持按条目设置 TTL。
///
/// # Invariants
/// - 所有操作均通过并发哈希表 `DashMap` 执行，保证多线程安全。
/// - 过期条目在读取时惰性淘汰，`purge_expired` 或后台清理任务负责批量回收。
/// - 时间基于 `tokio::time::Instant`，测试中可通过 `tokio::time::pause` 控制。
pub struct MemCache {
    // 线程安全的 KV 存储容器
    storage: DashMap<String, Entry>,
}

impl MemCache {
    /// # Summary
    /// 创建一个新的 MemCache 实例。
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }

    /// # Summary
    /// 批量移除所有已过期的条目。
    ///
    /// # Returns
    /// 被移除的条目数量。
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.storage.len();
        self.storage.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.storage.len())
    }

    /// 当前条目数 (含尚未回收的过期条目)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// # Summary
    /// 启动后台清理任务，按固定间隔回收过期条目。
    ///
    /// # Logic
    /// 任务只持有弱引用，缓存被释放后自动退出。
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!("Cache janitor purged {} expired entries", removed);
                }
            }
        })
    }
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemCache {
    /// # Summary
    /// 设置原始字节数据，若存在同名 Key 则覆盖 (包括其 TTL)。
    async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.storage
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    /// # Summary
    /// 获取原始字节数据。
    ///
    /// # Logic
    /// 命中过期条目时将其移除并返回 None。
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.storage.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // 读锁已释放后再删除，避免 DashMap 分片死锁
        self.storage.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key);
        Ok(())
    }
}
