// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A cached payload with its freshness contract. Also the mirror's on-disk
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Value,
    /// Epoch millis
    pub inserted_at: i64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(payload: Value, inserted_at: i64, ttl: Duration) -> Self {
        Self {
            payload,
            inserted_at,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Logically absent once `now - inserted_at >= ttl`.
    pub fn is_expired(&self, now: i64) -> bool {
        now.saturating_sub(self.inserted_at) >= self.ttl_ms as i64
    }
}

/// Deterministic key: `<namespace>:<sha256 of the JSON-encoded args>`.
///
/// Keeping the namespace readable lets [`super::Cache::invalidate_prefix`]
/// drop a whole entity's aggregates at once.
pub fn cache_key<A: Serialize + ?Sized>(namespace: &str, args: &A) -> String {
    let encoded = serde_json::to_vec(args).unwrap_or_default();
    format!("{}:{}", namespace, hex::encode(Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new(json!(1), 1_000, Duration::from_millis(100));
        assert!(!entry.is_expired(1_099));
        assert!(entry.is_expired(1_100));
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("messages", &("latest", 5));
        let b = cache_key("messages", &("latest", 5));
        let c = cache_key("messages", &("latest", 6));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("messages:"));
        assert_eq!(a.len(), "messages:".len() + 64);
    }
}
