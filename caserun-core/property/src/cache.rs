//! 属性缓存
//!
//! 每个解析键对应一个独立的槽位锁。取值方在整个
//! 未命中 -> 取值 -> 写入 过程中持有该键的锁，同一键只取值一次，
//! 不会因某个属性的重试阻塞其他属性。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// 缓存键 (完整解析参数)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub test: String,
    pub testcase: String,
    pub country: String,
    pub property: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for ResolutionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.test, self.testcase, self.country, self.property
        )?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(","))?;
        }
        Ok(())
    }
}

/// 已解析的属性
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProperty {
    pub property: String,

    pub value: String,

    /// 计算时间
    pub computed_at: DateTime<Utc>,

    /// 取值尝试次数
    pub attempts: u32,

    /// 取值经过的数据源前缀 (包含属性链上的所有数据源)
    pub sources: Vec<String>,

    /// 定义的缓存时间 (秒)，0 表示每次使用都需重新取值
    pub cache_expire: u64,

    #[serde(skip)]
    deadline: Option<Instant>,
}

impl ResolvedProperty {
    pub fn new(property: impl Into<String>, value: impl Into<String>, attempts: u32) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
            computed_at: Utc::now(),
            attempts,
            sources: Vec::new(),
            cache_expire: 0,
            deadline: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_cache_expire(mut self, seconds: u64) -> Self {
        self.cache_expire = seconds;
        self
    }

    /// 是否经过以 prefix 开头的数据源
    pub fn uses_source(&self, prefix: &str) -> bool {
        self.sources.iter().any(|s| s.starts_with(prefix))
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.deadline.map(|d| now < d).unwrap_or(false)
    }
}

type Slot = Arc<Mutex<Option<ResolvedProperty>>>;

/// 属性缓存 (多个执行共享)
///
/// 键表只在查找和增删槽位时短暂加锁；取值期间只持有对应键的槽位锁。
/// 空槽位和过期条目在释放时从键表移除。
#[derive(Default)]
pub struct PropertyCache {
    slots: StdMutex<HashMap<ResolutionKey, Slot>>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ResolutionKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 读取未过期的条目 (不创建槽位)，过期条目会被清除
    pub async fn get(&self, key: &ResolutionKey) -> Option<ResolvedProperty> {
        let slot = self.slots().get(key).cloned()?;

        let cached = {
            let mut entry = slot.lock().await;
            match entry.as_ref() {
                Some(cached) if cached.is_fresh(Instant::now()) => Some(cached.clone()),
                Some(_) => {
                    debug!("缓存已过期: {}", key);
                    *entry = None;
                    None
                }
                None => None,
            }
        };

        if cached.is_none() {
            // 键表 + 本地引用
            self.release(key, &slot, 2);
        }
        cached
    }

    /// 锁定一个键的槽位，直到返回的 [`SlotGuard`] 被释放
    ///
    /// 同一键的其他调用方在此等待，持锁方写入的值对它们可见。
    pub async fn lock(&self, key: &ResolutionKey) -> SlotGuard<'_> {
        let slot = {
            let mut slots = self.slots();
            if !slots.contains_key(key) {
                purge_idle(&mut slots);
            }
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let entry = Arc::clone(&slot).lock_owned().await;
        SlotGuard {
            cache: self,
            key: key.clone(),
            slot,
            entry,
        }
    }

    /// 写入条目，过期时间为 now + ttl；ttl 为 0 时不缓存
    pub async fn put(&self, key: &ResolutionKey, resolved: ResolvedProperty, ttl: Duration) {
        self.lock(key).await.store(resolved, ttl);
    }

    /// 使经过指定数据源前缀的所有条目失效，返回失效数量
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut slots = self.slots();
        let before = slots.len();

        slots.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => !entry.as_ref().map(|e| e.uses_source(prefix)).unwrap_or(false),
            // 正在取值的槽位一并移除，写入的值不再可见
            Err(_) => false,
        });

        before - slots.len()
    }

    /// 清除所有过期条目，返回清除数量
    pub async fn purge_expired(&self) -> usize {
        purge_idle(&mut self.slots())
    }

    /// 当前键数量
    pub async fn len(&self) -> usize {
        self.slots().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.slots().clear();
    }

    /// 槽位为空且没有其他持有者时从键表移除
    fn release(&self, key: &ResolutionKey, slot: &Slot, own_refs: usize) {
        let mut slots = self.slots();
        let removable = slots.get(key).map(|s| Arc::ptr_eq(s, slot)).unwrap_or(false)
            && Arc::strong_count(slot) <= own_refs;
        if removable {
            slots.remove(key);
        }
    }
}

/// 移除空闲的空槽位和过期条目 (正在使用的槽位保留)
fn purge_idle(slots: &mut HashMap<ResolutionKey, Slot>) -> usize {
    let now = Instant::now();
    let before = slots.len();
    slots.retain(|_, slot| {
        if Arc::strong_count(slot) > 1 {
            return true;
        }
        match slot.try_lock() {
            Ok(entry) => entry.as_ref().map(|e| e.is_fresh(now)).unwrap_or(false),
            Err(_) => true,
        }
    });
    before - slots.len()
}

/// 已锁定的缓存槽位
pub struct SlotGuard<'a> {
    cache: &'a PropertyCache,
    key: ResolutionKey,
    slot: Slot,
    entry: OwnedMutexGuard<Option<ResolvedProperty>>,
}

impl SlotGuard<'_> {
    /// 槽位中未过期的条目
    pub fn fresh(&mut self) -> Option<ResolvedProperty> {
        match self.entry.as_ref() {
            Some(cached) if cached.is_fresh(Instant::now()) => Some(cached.clone()),
            Some(_) => {
                *self.entry = None;
                None
            }
            None => None,
        }
    }

    /// 写入条目，ttl 为 0 时清空槽位
    pub fn store(&mut self, mut resolved: ResolvedProperty, ttl: Duration) {
        if ttl.is_zero() {
            *self.entry = None;
            return;
        }
        resolved.deadline = Some(Instant::now() + ttl);
        *self.entry = Some(resolved);
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.entry.is_none() {
            // 键表 + self.slot + 锁内部持有的引用
            self.cache.release(&self.key, &self.slot, 3);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(property: &str) -> ResolutionKey {
        ResolutionKey {
            test: "T1".to_string(),
            testcase: "TC1".to_string(),
            country: "FR".to_string(),
            property: property.to_string(),
            args: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = PropertyCache::new();
        let k = key("BASE_URL");
        cache
            .put(&k, ResolvedProperty::new("BASE_URL", "http://a", 1), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&k).await.unwrap().value, "http://a");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_not_stored() {
        let cache = PropertyCache::new();
        let k = key("BASE_URL");
        cache
            .put(&k, ResolvedProperty::new("BASE_URL", "x", 1), Duration::ZERO)
            .await;
        assert!(cache.get(&k).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_and_empty_keys_leave_the_map() {
        let cache = PropertyCache::new();
        let k = key("BASE_URL");
        cache
            .put(&k, ResolvedProperty::new("BASE_URL", "x", 1), Duration::ZERO)
            .await;
        assert_eq!(cache.len().await, 0);

        cache
            .put(&k, ResolvedProperty::new("BASE_URL", "x", 1), Duration::from_secs(5))
            .await;
        assert_eq!(cache.len().await, 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&k).await.is_none());
        assert_eq!(cache.len().await, 0);

        // 不存在的键只读不建槽位
        assert!(cache.get(&key("OTHER")).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_key_purges_idle_expired_slots() {
        let cache = PropertyCache::new();
        for i in 0..10 {
            cache
                .put(
                    &key(&format!("P{}", i)),
                    ResolvedProperty::new("P", "v", 1),
                    Duration::from_secs(1),
                )
                .await;
        }
        assert_eq!(cache.len().await, 10);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache
            .put(&key("FRESH"), ResolvedProperty::new("FRESH", "v", 1), Duration::from_secs(60))
            .await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_waiter_sees_value_stored_by_lock_holder() {
        let cache = Arc::new(PropertyCache::new());
        let k = key("BASE_URL");

        let mut guard = cache.lock(&k).await;
        let waiter = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            tokio::spawn(async move {
                let value = cache.lock(&k).await.fresh().map(|r| r.value);
                value
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        guard.store(ResolvedProperty::new("BASE_URL", "first", 1), Duration::from_secs(60));
        drop(guard);

        assert_eq!(waiter.await.unwrap().as_deref(), Some("first"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = PropertyCache::new();
        let ttl = Duration::from_secs(60);
        cache
            .put(
                &key("A"),
                ResolvedProperty::new("A", "1", 1).with_sources(vec!["dataLib:OLD_LIB/".into()]),
                ttl,
            )
            .await;
        cache
            .put(
                &key("B"),
                ResolvedProperty::new("B", "2", 1).with_sources(vec!["dataLib:OLD_LIB2/".into()]),
                ttl,
            )
            .await;

        assert_eq!(cache.invalidate_prefix("dataLib:OLD_LIB/").await, 1);
        assert!(cache.get(&key("A")).await.is_none());
        assert_eq!(cache.get(&key("B")).await.unwrap().value, "2");
    }

    #[test]
    fn test_key_display() {
        let mut k = key("P");
        assert_eq!(k.to_string(), "T1/TC1/FR/P");
        k.args = vec!["x".into(), "y".into()];
        assert_eq!(k.to_string(), "T1/TC1/FR/P(x,y)");
    }
}
