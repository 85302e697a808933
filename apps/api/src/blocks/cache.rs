//! Result cache for visibility decisions and region listings.
//!
//! Entries live in named groups so that everything derived from block state
//! can be dropped in one step. Each group carries a generation that moves
//! forward on every invalidation. Callers read the generation *before* they
//! read the data a value is computed from, and every read and write is tied
//! to that generation: a value computed from a snapshot older than the last
//! invalidation is never stored where later readers would find it.
//!
//! Backends implement [`ResultCache`]; callers go through [`generation`],
//! [`fetch`] and [`store`], which fail open: a broken backend turns into a
//! cache miss and the value is recomputed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Group holding everything derived from block records.
pub const BLOCKS_GROUP: &str = "blocks";

/// Group holding the active handler set.
pub const LISTENERS_GROUP: &str = "listeners";

/// Entries kept per group by [`InMemoryCache::new`].
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Keyed store with group-scoped invalidation.
///
/// `get` and `set` are addressed by the generation the caller observed. A
/// `set` for a generation the group has already left must not become
/// visible to readers of the current generation.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Current generation of `group`. Starts at 0.
    async fn generation(&self, group: &str) -> Result<u64, CacheError>;

    async fn get(&self, group: &str, generation: u64, key: &str)
        -> Result<Option<Value>, CacheError>;

    async fn set(
        &self,
        group: &str,
        generation: u64,
        key: &str,
        value: Value,
    ) -> Result<(), CacheError>;

    /// Drops every entry of `group` and advances its generation.
    async fn invalidate_group(&self, group: &str) -> Result<(), CacheError>;
}

/// Generation of `group`, or `None` when the backend can't say. With `None`
/// the caller computes its value and skips the cache entirely.
pub async fn generation(cache: &dyn ResultCache, group: &str) -> Option<u64> {
    match cache.generation(group).await {
        Ok(generation) => Some(generation),
        Err(e) => {
            warn!("Cache generation unavailable for {group}, bypassing cache: {e}");
            None
        }
    }
}

/// Reads and decodes a cached value. Any failure is reported as a miss.
pub async fn fetch<T: DeserializeOwned>(
    cache: &dyn ResultCache,
    group: &str,
    generation: Option<u64>,
    key: &str,
) -> Option<T> {
    let generation = generation?;
    match cache.get(group, generation, key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(decoded) => {
                debug!("Cache hit {group}@{generation}/{key}");
                Some(decoded)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry {group}/{key}: {e}");
                None
            }
        },
        Ok(None) => {
            debug!("Cache miss {group}@{generation}/{key}");
            None
        }
        Err(e) => {
            warn!("Cache read failed for {group}/{key}, recomputing: {e}");
            None
        }
    }
}

/// Encodes and writes a value computed at `generation`. Failures are logged
/// and otherwise ignored.
pub async fn store<T: Serialize>(
    cache: &dyn ResultCache,
    group: &str,
    generation: Option<u64>,
    key: &str,
    value: &T,
) {
    let Some(generation) = generation else {
        return;
    };
    let encoded = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            warn!("Not caching {group}/{key}: {e}");
            return;
        }
    };
    if let Err(e) = cache.set(group, generation, key, encoded).await {
        warn!("Cache write failed for {group}/{key}: {e}");
    }
}

/// Counters exposed by [`InMemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Writes dropped because the group was invalidated after the value's
    /// generation was read.
    pub stale_writes: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Group {
    generation: u64,
    entries: HashMap<String, Value>,
}

/// Process-local cache. Each group is a separate map holding at most
/// `max_entries` values; a write into a full group evicts one entry.
pub struct InMemoryCache {
    groups: RwLock<HashMap<String, Group>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    stale_writes: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Number of live entries in `group`.
    pub fn len(&self, group: &str) -> usize {
        self.groups
            .read()
            .map(|groups| groups.get(group).map_or(0, |g| g.entries.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, group: &str) -> bool {
        self.len(group) == 0
    }
}

fn poisoned() -> CacheError {
    CacheError::Unavailable("in-memory cache lock poisoned".to_string())
}

#[async_trait]
impl ResultCache for InMemoryCache {
    async fn generation(&self, group: &str) -> Result<u64, CacheError> {
        let groups = self.groups.read().map_err(|_| poisoned())?;
        Ok(groups.get(group).map_or(0, |g| g.generation))
    }

    async fn get(
        &self,
        group: &str,
        generation: u64,
        key: &str,
    ) -> Result<Option<Value>, CacheError> {
        let groups = self.groups.read().map_err(|_| poisoned())?;
        let value = groups
            .get(group)
            .filter(|g| g.generation == generation)
            .and_then(|g| g.entries.get(key))
            .cloned();
        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set(
        &self,
        group: &str,
        generation: u64,
        key: &str,
        value: Value,
    ) -> Result<(), CacheError> {
        let mut groups = self.groups.write().map_err(|_| poisoned())?;
        let slot = groups.entry(group.to_string()).or_default();
        if slot.generation != generation {
            debug!(
                "Dropping write to {group}/{key}: computed at generation {generation}, group is at {}",
                slot.generation
            );
            self.stale_writes.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if slot.entries.len() >= self.max_entries && !slot.entries.contains_key(key) {
            let victim = slot.entries.keys().next().cloned();
            if let Some(victim) = victim {
                slot.entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        slot.entries.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn invalidate_group(&self, group: &str) -> Result<(), CacheError> {
        let mut groups = self.groups.write().map_err(|_| poisoned())?;
        let slot = groups.entry(group.to_string()).or_default();
        slot.entries.clear();
        slot.generation += 1;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Redis-backed cache shared between processes.
///
/// The generation of a group is its epoch counter at `<prefix>:<group>:epoch`.
/// Entries are written under `<prefix>:<group>:<epoch>:<key>` using the epoch
/// the caller observed, and invalidation is a single `INCR`. An entry written
/// for an old epoch lands in a namespace nobody reads and expires through its
/// TTL.
///
/// One [`ConnectionManager`] is opened on first use and shared by every call;
/// it reconnects on its own after a dropped connection.
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    prefix: String,
    ttl_secs: u64,
}

impl RedisCache {
    pub fn new(client: redis::Client, prefix: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            client,
            connection: OnceCell::new(),
            prefix: prefix.into(),
            ttl_secs,
        }
    }

    fn epoch_key(&self, group: &str) -> String {
        format!("{}:{}:epoch", self.prefix, group)
    }

    fn entry_key(&self, group: &str, epoch: u64, key: &str) -> String {
        format!("{}:{}:{}:{}", self.prefix, group, epoch, key)
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!("Opening Redis connection manager");
                self.client.get_connection_manager().await
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn generation(&self, group: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        let epoch: Option<u64> = redis::cmd("GET")
            .arg(self.epoch_key(group))
            .query_async(&mut conn)
            .await?;
        Ok(epoch.unwrap_or(0))
    }

    async fn get(
        &self,
        group: &str,
        generation: u64,
        key: &str,
    ) -> Result<Option<Value>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.entry_key(group, generation, key))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        group: &str,
        generation: u64,
        key: &str,
        value: Value,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let raw = serde_json::to_string(&value)?;
        redis::cmd("SET")
            .arg(self.entry_key(group, generation, key))
            .arg(raw)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn invalidate_group(&self, group: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let epoch: u64 = redis::cmd("INCR")
            .arg(self.epoch_key(group))
            .query_async(&mut conn)
            .await?;
        debug!("Cache group {group} advanced to epoch {epoch}");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A backend that fails every call.
    pub(crate) struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn generation(&self, _group: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn get(&self, _: &str, _: u64, _: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn set(&self, _: &str, _: u64, _: &str, _: Value) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn invalidate_group(&self, _group: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_fetch_after_store() {
        let cache = InMemoryCache::new();
        let at = generation(&cache, BLOCKS_GROUP).await;
        assert_eq!(at, Some(0));
        store(&cache, BLOCKS_GROUP, at, "k", &vec![1, 2, 3]).await;
        let got: Option<Vec<i32>> = fetch(&cache, BLOCKS_GROUP, at, "k").await;
        assert_eq!(got, Some(vec![1, 2, 3]));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_invalidation_is_scoped_to_group() {
        let cache = InMemoryCache::new();
        store(&cache, BLOCKS_GROUP, Some(0), "a", &true).await;
        store(&cache, LISTENERS_GROUP, Some(0), "b", &true).await;

        cache.invalidate_group(BLOCKS_GROUP).await.unwrap();

        let blocks_at = generation(&cache, BLOCKS_GROUP).await;
        assert_eq!(blocks_at, Some(1));
        assert!(fetch::<bool>(&cache, BLOCKS_GROUP, blocks_at, "a").await.is_none());
        let listeners_at = generation(&cache, LISTENERS_GROUP).await;
        assert_eq!(
            fetch::<bool>(&cache, LISTENERS_GROUP, listeners_at, "b").await,
            Some(true)
        );
        assert!(cache.is_empty(BLOCKS_GROUP));
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_write_from_before_invalidation_is_dropped() {
        let cache = InMemoryCache::new();
        let before = generation(&cache, BLOCKS_GROUP).await;

        cache.invalidate_group(BLOCKS_GROUP).await.unwrap();
        store(&cache, BLOCKS_GROUP, before, "listing", &"old snapshot").await;

        let now = generation(&cache, BLOCKS_GROUP).await;
        assert!(fetch::<String>(&cache, BLOCKS_GROUP, now, "listing").await.is_none());
        assert!(cache.is_empty(BLOCKS_GROUP));
        assert_eq!(cache.stats().stale_writes, 1);
        assert_eq!(cache.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_read_at_old_generation_misses() {
        let cache = InMemoryCache::new();
        store(&cache, BLOCKS_GROUP, Some(0), "k", &1).await;
        cache.invalidate_group(BLOCKS_GROUP).await.unwrap();
        store(&cache, BLOCKS_GROUP, Some(1), "k", &2).await;

        assert!(fetch::<i32>(&cache, BLOCKS_GROUP, Some(0), "k").await.is_none());
        assert_eq!(fetch::<i32>(&cache, BLOCKS_GROUP, Some(1), "k").await, Some(2));
    }

    #[tokio::test]
    async fn test_entries_per_group_are_bounded() {
        let cache = InMemoryCache::with_max_entries(3);
        for i in 0..50 {
            store(&cache, BLOCKS_GROUP, Some(0), &format!("path:/page/{i}"), &i).await;
        }
        assert_eq!(cache.len(BLOCKS_GROUP), 3);
        assert_eq!(cache.stats().evictions, 47);

        // The newest write always survives.
        assert_eq!(
            fetch::<i32>(&cache, BLOCKS_GROUP, Some(0), "path:/page/49").await,
            Some(49)
        );

        // Overwriting a present key does not evict.
        store(&cache, BLOCKS_GROUP, Some(0), "path:/page/49", &0).await;
        assert_eq!(cache.stats().evictions, 47);
    }

    #[tokio::test]
    async fn test_default_capacity() {
        assert_eq!(InMemoryCache::new().max_entries(), DEFAULT_MAX_ENTRIES);
        assert_eq!(InMemoryCache::with_max_entries(0).max_entries(), 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = InMemoryCache::new();
        store(&cache, BLOCKS_GROUP, Some(0), "k", &"text").await;
        assert!(fetch::<bool>(&cache, BLOCKS_GROUP, Some(0), "k").await.is_none());
    }

    #[tokio::test]
    async fn test_broken_backend_fails_open() {
        let cache = BrokenCache;
        assert!(generation(&cache, BLOCKS_GROUP).await.is_none());
        store(&cache, BLOCKS_GROUP, Some(0), "k", &true).await;
        assert!(fetch::<bool>(&cache, BLOCKS_GROUP, Some(0), "k").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_generation_skips_the_backend() {
        let cache = InMemoryCache::new();
        store(&cache, BLOCKS_GROUP, None, "k", &true).await;
        assert!(fetch::<bool>(&cache, BLOCKS_GROUP, None, "k").await.is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_redis_keys_carry_epoch() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let cache = RedisCache::new(client, "block-api", 60);
        assert_eq!(cache.epoch_key("blocks"), "block-api:blocks:epoch");
        assert_eq!(cache.entry_key("blocks", 4, "k"), "block-api:blocks:4:k");
        // No connection is opened until the first command.
        assert!(cache.connection.get().is_none());
    }
}
