// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent mirror for the in-process cache.
//!
//! Best effort throughout: every failure is logged and reported as a miss or
//! a no-op, never as an error to the cache caller.

use std::sync::Arc;
use tracing::warn;

use super::entry::CacheEntry;
use crate::storage::traits::KeyValueStore;

const KEY_PREFIX: &str = "cache:";

pub struct CacheMirror {
    kv: Arc<dyn KeyValueStore>,
}

impl CacheMirror {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn mirror_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    /// Fresh entry for `key`, deleting it if expired or unreadable.
    pub async fn load(&self, key: &str, now: i64) -> Option<CacheEntry> {
        let mkey = Self::mirror_key(key);
        let raw = match self.kv.get(&mkey).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache mirror read failed");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired(now) => Some(entry),
            Ok(_) => {
                self.remove(key).await;
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache mirror entry");
                self.remove(key).await;
                None
            }
        }
    }

    pub async fn store(&self, key: &str, entry: &CacheEntry) {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Cache mirror serialization failed");
                return;
            }
        };
        if let Err(e) = self.kv.put(&Self::mirror_key(key), &json).await {
            warn!(key, error = %e, "Cache mirror write failed");
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.kv.delete(&Self::mirror_key(key)).await {
            warn!(key, error = %e, "Cache mirror delete failed");
        }
    }

    /// Remove every mirrored key starting with `prefix` (empty = all).
    pub async fn remove_prefix(&self, prefix: &str) {
        let keys = match self.kv.keys_with_prefix(&Self::mirror_key(prefix)).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix, error = %e, "Cache mirror scan failed");
                return;
            }
        };
        for key in keys {
            if let Err(e) = self.kv.delete(&key).await {
                warn!(key = %key, error = %e, "Cache mirror delete failed");
            }
        }
    }
}
