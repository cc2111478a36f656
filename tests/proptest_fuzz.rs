// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for validation and pagination.
//!
//! Uses proptest to generate random/malformed inputs and verify the data
//! layer never panics, only returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::Value;

use site_store::model::query::{ResolvedQuery, MAX_LIMIT};
use site_store::model::validation::{check_image_url, normalize_color};
use site_store::model::visit::derive_session_id;
use site_store::model::{Entity, Message, NewMessage, NewPhoto, NewQuote, NewVisit, Page, Photo, QueryOptions, Quote, VisitRecord};
use site_store::storage::memory::InMemoryKvStore;
use site_store::{FallbackStore, KeyValueStore};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        3,  // depth
        48, // max nodes
        8,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::hash_map("[a-zA-Z_]{1,12}", inner, 0..8)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Objects that look like fallback records, with the right keys but any values
fn record_like_strategy() -> impl Strategy<Value = Value> {
    (
        prop::option::of(".{0,20}"),
        prop::option::of(".{0,250}"),
        prop::option::of("#?[0-9a-fA-FxyZ]{0,8}"),
        prop::option::of(any::<i64>()),
    )
        .prop_map(|(id, content, color, created_at)| {
            let mut obj = serde_json::Map::new();
            if let Some(id) = id {
                obj.insert("id".into(), Value::String(id));
            }
            if let Some(content) = content {
                obj.insert("content".into(), Value::String(content));
            }
            if let Some(color) = color {
                obj.insert("color".into(), Value::String(color));
            }
            if let Some(ts) = created_at {
                obj.insert("createdAt".into(), Value::Number(ts.into()));
                obj.insert("updatedAt".into(), Value::Number(ts.into()));
            }
            Value::Object(obj)
        })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Validation Fuzzing
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn fuzz_message_validation(content in ".*", color in ".*", ts in any::<i64>()) {
        let input = NewMessage { created_at: Some(ts), ..NewMessage::new(content, color) };
        if let Ok(message) = Message::create(&input, "m-1".into(), 0) {
            // Anything accepted must pass re-validation as stored data
            prop_assert!(message.validate().is_ok());
            prop_assert_eq!(message.color.len(), 7);
            prop_assert!(!message.content.trim().is_empty());
        }
    }

    #[test]
    fn fuzz_photo_validation(url in ".*", caption in ".*", custom in any::<bool>()) {
        let input = NewPhoto::new(url.clone()).caption(caption).custom(custom);
        match Photo::create(&input, "p-1".into(), 0) {
            Ok(photo) => {
                prop_assert!(check_image_url(&url).is_ok());
                prop_assert!(photo.validate().is_ok());
            }
            Err(errors) => prop_assert!(!errors.reasons().is_empty()),
        }
    }

    #[test]
    fn fuzz_quote_validation(text in ".*") {
        if let Ok(quote) = Quote::create(&NewQuote::new(text), "q-1".into(), 0) {
            prop_assert!(quote.validate().is_ok());
        }
    }

    #[test]
    fn fuzz_visit_derivation(ip in ".*", ua in prop::option::of(".*"), now in 0i64..4_000_000_000_000) {
        let input = NewVisit::new(ip, ua.as_deref());
        if let Ok(record) = VisitRecord::derive(&input, "salt", Duration::from_secs(1800), now) {
            prop_assert_eq!(record.session_id.len(), 64);
            prop_assert_eq!(record.ip_hash.len(), 64);
            prop_assert!(record.validate().is_ok());
        }
    }

    #[test]
    fn fuzz_color_normalization(color in ".*") {
        if let Ok(normalized) = normalize_color(&color) {
            prop_assert!(normalized.starts_with('#'));
            prop_assert_eq!(normalized.to_uppercase(), normalized.clone());
            // Idempotent
            prop_assert_eq!(normalize_color(&normalized), Ok(normalized));
        }
    }
}

// =============================================================================
// Session Window Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_session_stable_within_window(
        ip in "[0-9]{1,3}(\\.[0-9]{1,3}){3}",
        window_index in 0i64..1_000_000,
        offset in 0i64..1_800_000,
    ) {
        let window = Duration::from_secs(1800);
        let start = window_index * 1_800_000;
        let a = derive_session_id(&ip, None, start, window);
        let b = derive_session_id(&ip, None, start + offset, window);
        let next = derive_session_id(&ip, None, start + 1_800_000, window);
        prop_assert_eq!(&a, &b);
        prop_assert_ne!(a, next);
    }
}

// =============================================================================
// Pagination Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_resolve_never_panics(page in any::<u32>(), limit in any::<u32>(), field in ".{0,20}") {
        let options = QueryOptions::page(page, limit).order_by(&field, Default::default());
        match options.resolve(Message::ORDER_FIELDS) {
            Ok(resolved) => {
                prop_assert!(page >= 1);
                prop_assert!((1..=MAX_LIMIT).contains(&limit));
                prop_assert!(Message::ORDER_FIELDS.contains(&resolved.order_by));
            }
            Err(errors) => prop_assert!(!errors.reasons().is_empty()),
        }
    }

    #[test]
    fn prop_pages_partition_total(total in 0u64..2_000, limit in 1u32..=MAX_LIMIT) {
        let mut seen = 0u64;
        let mut page = 1u32;
        loop {
            let resolved: ResolvedQuery = QueryOptions::page(page, limit)
                .resolve(Message::ORDER_FIELDS)
                .unwrap();
            let size = total.saturating_sub(resolved.offset).min(u64::from(limit));
            let p = Page::new(vec![(); size as usize], total, &resolved);

            prop_assert_eq!(p.has_prev, page > 1);
            seen += p.items.len() as u64;
            if !p.has_next {
                prop_assert_eq!(u64::from(page), p.total_pages().max(1));
                break;
            }
            prop_assert_eq!(p.items.len() as u32, limit);
            page += 1;
        }
        prop_assert_eq!(seen, total);
    }
}

// =============================================================================
// Fallback Store Robustness
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn fuzz_fallback_collection_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let rt = runtime();
        rt.block_on(async {
            let kv = Arc::new(InMemoryKvStore::new());
            kv.put("messages", &json.to_string()).await.unwrap();
            let store = FallbackStore::new(kv);

            // Must never panic; non-array collections are an error
            let loaded = store.load::<Message>().await;
            if !json.is_array() {
                assert!(loaded.is_err());
            }
        });
    }

    #[test]
    fn fuzz_fallback_skips_malformed_records(records in prop::collection::vec(record_like_strategy(), 0..20)) {
        let rt = runtime();
        let loaded = rt.block_on(async {
            let kv = Arc::new(InMemoryKvStore::new());
            kv.put("messages", &Value::Array(records.clone()).to_string()).await.unwrap();
            FallbackStore::new(kv).load::<Message>().await.unwrap()
        });

        // Only structurally complete records load; field-level checks happen at migration
        let complete = records
            .iter()
            .filter(|r| ["id", "content", "color", "createdAt"].iter().all(|k| r.get(k).is_some()))
            .count();
        prop_assert_eq!(loaded.len(), complete);
    }

    #[test]
    fn fuzz_fallback_garbage_bytes(raw in ".*") {
        let rt = runtime();
        rt.block_on(async {
            let kv = Arc::new(InMemoryKvStore::new());
            kv.put("quotes", &raw).await.unwrap();
            let store = FallbackStore::new(kv);
            let _ = store.load::<Quote>().await;
            let _ = store.count::<Quote>().await;
        });
    }
}
