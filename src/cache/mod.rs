// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Multi-tier cache.
//!
//! An in-process map with per-entry TTL, bounded by entry count with
//! oldest-inserted eviction, optionally mirrored to a [`KeyValueStore`] so
//! warm aggregates survive a restart.
//!
//! # Freshness
//!
//! An entry is logically absent once `now - inserted_at >= ttl`, whether or
//! not the sweeper has removed it yet. Tiers are not kept strongly
//! consistent: a mirror entry may outlive an in-memory delete if the mirror
//! write fails.
//!
//! # Single flight
//!
//! [`Cache::get_or_set`] runs the producer at most once per miss per key:
//! concurrent callers for a cold key queue on a per-key lock and re-check
//! the cache once they hold it.
//!
//! ```
//! use site_store::cache::{Cache, CacheConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = Cache::new(CacheConfig::default());
//! let n: u64 = cache
//!     .get_or_set("messages:count", Duration::from_secs(60), || async { Ok::<_, ()>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(n, 42);
//! assert_eq!(cache.get::<u64>("messages:count").await, Some(42));
//! # }
//! ```

pub mod entry;
pub mod mirror;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::now_millis;
use crate::storage::traits::{KeyValueStore, StoreError};
pub use entry::{cache_key, CacheEntry};
use mirror::CacheMirror;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum in-memory entries (0 = unbounded)
    pub max_entries: usize,
    /// Background sweep interval
    #[serde(rename = "sweep_interval_ms", deserialize_with = "de_millis")]
    pub sweep_interval: Duration,
    /// Write through to the persistent mirror
    pub mirror: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            sweep_interval: Duration::from_secs(60),
            mirror: false,
        }
    }
}

fn de_millis<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entry_count: usize,
    /// 0.0 - 1.0
    pub hit_rate: f64,
}

struct Slot {
    entry: CacheEntry,
    /// Insertion sequence; matches the live position in `order`
    seq: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Slot>,
    /// Insertion order, oldest first. Positions whose seq no longer matches
    /// the slot are stale and skipped.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl State {
    fn compact_order(&mut self) {
        if self.order.len() > 2 * self.entries.len() + 16 {
            let entries = &self.entries;
            self.order
                .retain(|(k, seq)| entries.get(k).is_some_and(|s| s.seq == *seq));
        }
    }

    /// Drop the oldest live entry. Returns its key.
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|s| s.seq == seq) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }
}

type InflightMap = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// One caller's hold on a `get_or_set` lock. Dropping it, on return or on
/// cancellation, removes the map entry only while it is still this lock.
struct InflightEntry<'a> {
    map: &'a InflightMap,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InflightEntry<'_> {
    fn drop(&mut self) {
        self.map.remove_if(self.key, |_, current| Arc::ptr_eq(current, &self.lock));
    }
}

pub struct Cache {
    state: Mutex<State>,
    inflight: InflightMap,
    mirror: Option<CacheMirror>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            inflight: DashMap::new(),
            mirror: None,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Cache mirrored to `kv` under `cache:<key>`.
    pub fn with_mirror(config: CacheConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            mirror: Some(CacheMirror::new(kv)),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn memory_get(&self, key: &str, now: i64) -> Option<serde_json::Value> {
        let mut state = self.state.lock();
        let slot = state.entries.get(key)?;
        if !slot.entry.is_expired(now) {
            return Some(slot.entry.payload.clone());
        }
        state.entries.remove(key);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn memory_insert(&self, key: &str, entry: CacheEntry) {
        let mut state = self.state.lock();
        let is_new = !state.entries.contains_key(key);

        if is_new && self.config.max_entries > 0 {
            while state.entries.len() >= self.config.max_entries {
                match state.evict_oldest() {
                    Some(old) => {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        crate::metrics::record_cache_eviction();
                        debug!(key = %old, "Cache entry evicted");
                    }
                    None => break,
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(key.to_string(), Slot { entry, seq });
        state.order.push_back((key.to_string(), seq));
        state.compact_order();
        crate::metrics::set_cache_entries(state.entries.len());
    }

    async fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        let now = now_millis();
        if let Some(payload) = self.memory_get(key, now) {
            return Some(payload);
        }
        let mirror = self.mirror.as_ref()?;
        let entry = mirror.load(key, now).await?;
        let payload = entry.payload.clone();
        // Keep the original insertion time so the TTL is not extended
        self.memory_insert(key, entry);
        Some(payload)
    }

    /// Fresh value for `key`, if any. A payload that does not decode as `T`
    /// counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hit = self
            .lookup(key)
            .await
            .and_then(|payload| serde_json::from_value(payload).ok());
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        crate::metrics::record_cache_lookup(hit.is_some());
        hit
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError> {
        let entry = CacheEntry::new(serde_json::to_value(value)?, now_millis(), ttl);
        self.memory_insert(key, entry.clone());
        if let Some(ref mirror) = self.mirror {
            mirror.store(key, &entry).await;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        self.state.lock().entries.remove(key);
        if let Some(ref mirror) = self.mirror {
            mirror.remove(key).await;
        }
    }

    pub async fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.order.clear();
        }
        if let Some(ref mirror) = self.mirror {
            mirror.remove_prefix("").await;
        }
        crate::metrics::set_cache_entries(0);
    }

    /// Drop every key starting with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state.entries.retain(|k, _| !k.starts_with(prefix));
            before - state.entries.len()
        };
        if let Some(ref mirror) = self.mirror {
            mirror.remove_prefix(prefix).await;
        }
        if removed > 0 {
            debug!(prefix, removed, "Cache namespace invalidated");
        }
    }

    /// Cached value for `key`, or the producer's value (then cached).
    /// A producer error is returned and nothing is cached.
    pub async fn get_or_set<T, F, Fut, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }

        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let entry = InflightEntry {
            map: &self.inflight,
            key,
            lock,
        };
        let _guard = entry.lock.lock().await;

        // Another caller may have filled it while we waited
        if let Some(payload) = self.lookup(key).await {
            if let Ok(hit) = serde_json::from_value::<T>(payload) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
        }

        let result = producer().await;
        if let Ok(ref value) = result {
            if let Err(e) = self.set(key, value, ttl).await {
                warn!(key, error = %e, "Failed to cache produced value");
            }
        }
        result
    }

    /// Remove every expired in-memory entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, slot| !slot.entry.is_expired(now));
        let removed = before - state.entries.len();
        state.compact_order();
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            crate::metrics::set_cache_entries(state.entries.len());
        }
        removed
    }

    /// Run [`Cache::sweep_expired`] every `sweep_interval` until `shutdown`
    /// turns true or its sender is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache.config.sweep_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "Cache sweep");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Cache sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entry_count: self.len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryKvStore;
    use std::sync::atomic::AtomicUsize;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = Cache::default();
        cache.set("a", &"alpha", MINUTE).await.unwrap();
        assert_eq!(cache.get::<String>("a").await.as_deref(), Some("alpha"));

        cache.delete("a").await;
        assert!(cache.get::<String>("a").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let cache = Cache::default();
        cache.set("a", &1u32, Duration::from_millis(30)).await.unwrap();
        assert_eq!(cache.get::<u32>("a").await, Some(1));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get::<u32>("a").await.is_none());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_evicts_oldest_inserted() {
        let cache = Cache::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        cache.set("a", &1, MINUTE).await.unwrap();
        cache.set("b", &2, MINUTE).await.unwrap();
        // Reading does not refresh position
        assert_eq!(cache.get::<i32>("a").await, Some(1));
        cache.set("c", &3, MINUTE).await.unwrap();

        assert!(cache.get::<i32>("a").await.is_none());
        assert_eq!(cache.get::<i32>("b").await, Some(2));
        assert_eq!(cache.get::<i32>("c").await, Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_reset_refreshes_position() {
        let cache = Cache::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        cache.set("a", &1, MINUTE).await.unwrap();
        cache.set("b", &2, MINUTE).await.unwrap();
        cache.set("a", &10, MINUTE).await.unwrap();
        cache.set("c", &3, MINUTE).await.unwrap();

        assert_eq!(cache.get::<i32>("a").await, Some(10));
        assert!(cache.get::<i32>("b").await.is_none());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_get_or_set_single_flight() {
        let cache = Arc::new(Cache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set("cold", MINUTE, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(99u64)
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_error_not_cached() {
        let cache = Cache::default();
        let err = cache
            .get_or_set("k", MINUTE, || async { Err::<u64, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.is_empty());

        let v = cache
            .get_or_set("k", MINUTE, || async { Ok::<_, &str>(5u64) })
            .await
            .unwrap();
        assert_eq!(v, 5);
    }

    #[tokio::test]
    async fn test_inflight_entry_released_on_error_and_cancel() {
        let cache = Cache::default();
        let _ = cache
            .get_or_set("k", MINUTE, || async { Err::<u64, _>("boom") })
            .await;
        assert!(cache.inflight.is_empty());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_set("k", MINUTE, || std::future::pending::<Result<u64, String>>()),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_failed_producer_keeps_newer_lock() {
        let cache = Arc::new(Cache::default());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (fail_tx, fail_rx) = tokio::sync::oneshot::channel::<()>();

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_set("k", MINUTE, || async move {
                        let _ = started_tx.send(());
                        let _ = fail_rx.await;
                        Err::<u64, _>("boom")
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        // A newer caller's lock took the slot meanwhile
        let newer = Arc::new(tokio::sync::Mutex::new(()));
        cache.inflight.insert("k".to_string(), newer.clone());
        fail_tx.send(()).unwrap();
        assert!(first.await.unwrap().is_err());

        let kept = cache.inflight.get("k").map(|e| Arc::ptr_eq(e.value(), &newer));
        assert_eq!(kept, Some(true));
    }

    #[tokio::test]
    async fn test_mirror_repopulates_memory() {
        let kv = Arc::new(InMemoryKvStore::new());
        let first = Cache::with_mirror(CacheConfig::default(), kv.clone());
        first.set("quotes:count", &12u64, MINUTE).await.unwrap();

        // A fresh process sees the mirrored value
        let second = Cache::with_mirror(CacheConfig::default(), kv.clone());
        assert!(second.is_empty());
        assert_eq!(second.get::<u64>("quotes:count").await, Some(12));
        assert_eq!(second.len(), 1);

        second.invalidate_prefix("quotes:").await;
        assert!(kv.get("cache:quotes:count").await.unwrap().is_none());
        assert!(second.get::<u64>("quotes:count").await.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_and_stops() {
        let cache = Arc::new(Cache::new(CacheConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        }));
        cache.set("short", &1, Duration::from_millis(5)).await.unwrap();
        cache.set("long", &2, MINUTE).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = cache.spawn_sweeper(rx);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear() {
        let kv = Arc::new(InMemoryKvStore::new());
        let cache = Cache::with_mirror(CacheConfig::default(), kv.clone());
        cache.set("a", &1, MINUTE).await.unwrap();
        cache.set("b", &2, MINUTE).await.unwrap();
        cache.clear().await;
        assert!(cache.is_empty());
        assert!(kv.keys_with_prefix("cache:").await.unwrap().is_empty());
    }
}
