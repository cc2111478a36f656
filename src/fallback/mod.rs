// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local fallback store.
//!
//! Implements the repository CRUD contract over a [`KeyValueStore`]: each
//! entity collection is one JSON array under its collection key
//! (`messages`, `photos`, `quotes`, `visits`). Writes are read-modify-write
//! of the whole array, serialized by one lock per store, so concurrent local
//! writes never lose updates.
//!
//! Loads are lenient: a record that no longer deserializes is skipped with a
//! warning instead of failing the whole collection.

use rand::seq::SliceRandom;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::model::query::{Page, ResolvedQuery};
use crate::model::{Entity, OrderDirection, Patchable};
use crate::storage::traits::{KeyValueStore, StoreError};

pub struct FallbackStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl FallbackStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Raw JSON objects of a collection (migration input).
    pub async fn load_raw(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let json = self.kv.get(collection).await?;
        parse_raw(collection, json.as_deref())
    }

    /// Typed records of `E`'s collection, skipping malformed entries.
    pub async fn load<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        let collection = E::KIND.collection();
        let raw = self.load_raw(collection).await?;
        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<E>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(collection, error = %e, "Skipping malformed fallback record"),
            }
        }
        Ok(records)
    }

    async fn save<E: Entity>(&self, records: &[E]) -> Result<(), StoreError> {
        let collection = E::KIND.collection();
        if records.is_empty() {
            self.kv.delete(collection).await
        } else {
            let json = serde_json::to_string(records)?;
            self.kv.put(collection, &json).await
        }
    }

    pub async fn create<E: Entity>(&self, record: E) -> Result<E, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<E>().await?;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(StoreError::Constraint(format!(
                "duplicate {} id '{}'",
                E::KIND,
                record.id()
            )));
        }
        records.push(record.clone());
        self.save(&records).await?;
        debug!(collection = E::KIND.collection(), id = record.id(), "Fallback record created");
        Ok(record)
    }

    /// All-or-nothing: any duplicate id rejects the whole batch.
    pub async fn create_many<E: Entity>(&self, new_records: Vec<E>) -> Result<Vec<E>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<E>().await?;
        let mut ids: HashSet<String> = records.iter().map(|r| r.id().to_string()).collect();
        for record in &new_records {
            if !ids.insert(record.id().to_string()) {
                return Err(StoreError::Constraint(format!(
                    "duplicate {} id '{}'",
                    E::KIND,
                    record.id()
                )));
            }
        }
        records.extend(new_records.iter().cloned());
        self.save(&records).await?;
        Ok(new_records)
    }

    /// Store `record` unless its id is already present. Returns whether it
    /// was stored.
    pub async fn insert_if_absent<E: Entity>(&self, record: E) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<E>().await?;
        if records.iter().any(|r| r.id() == record.id()) {
            return Ok(false);
        }
        records.push(record);
        self.save(&records).await?;
        Ok(true)
    }

    pub async fn find_by_id<E: Entity>(&self, id: &str) -> Result<Option<E>, StoreError> {
        Ok(self.load::<E>().await?.into_iter().find(|r| r.id() == id))
    }

    /// Matching records, newest first.
    pub async fn find_where<E, P>(&self, predicate: P) -> Result<Vec<E>, StoreError>
    where
        E: Entity,
        P: Fn(&E) -> bool,
    {
        let mut records: Vec<E> = self.load::<E>().await?.into_iter().filter(|r| predicate(r)).collect();
        records.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        Ok(records)
    }

    /// One page of matching records, ordered as `query` asks.
    pub async fn page_where<E, P>(&self, query: &ResolvedQuery, predicate: P) -> Result<Page<E>, StoreError>
    where
        E: Entity,
        P: Fn(&E) -> bool,
    {
        let matching: Vec<E> = self.load::<E>().await?.into_iter().filter(|r| predicate(r)).collect();
        let total = matching.len() as u64;

        let mut keyed: Vec<(Value, E)> = matching
            .into_iter()
            .map(|r| {
                let key = serde_json::to_value(&r)
                    .ok()
                    .and_then(|v| v.get(query.order_by).cloned())
                    .unwrap_or(Value::Null);
                (key, r)
            })
            .collect();
        keyed.sort_by(|(a, ra), (b, rb)| {
            let ord = compare_json(a, b).then_with(|| ra.id().cmp(rb.id()));
            match query.direction {
                OrderDirection::Asc => ord,
                OrderDirection::Desc => ord.reverse(),
            }
        });

        let items = keyed
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|(_, r)| r)
            .collect();
        Ok(Page::new(items, total, query))
    }

    pub async fn find_all<E: Entity>(&self, query: &ResolvedQuery) -> Result<Page<E>, StoreError> {
        self.page_where(query, |_: &E| true).await
    }

    pub async fn update<E: Patchable>(&self, id: &str, patch: &E::Patch, now: i64) -> Result<E, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<E>().await?;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(StoreError::NotFound)?;
        record
            .apply(patch, now)
            .map_err(|errs| StoreError::Invalid(errs.summary()))?;
        let updated = record.clone();
        self.save(&records).await?;
        Ok(updated)
    }

    /// Returns whether a record was removed.
    pub async fn delete<E: Entity>(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.delete_many::<E>(&[id.to_string()]).await? == 1)
    }

    pub async fn delete_many<E: Entity>(&self, ids: &[String]) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<E>().await?;
        let before = records.len();
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        records.retain(|r| !targets.contains(r.id()));
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records).await?;
        }
        Ok(removed as u64)
    }

    pub async fn count<E: Entity>(&self) -> Result<u64, StoreError> {
        Ok(self.load::<E>().await?.len() as u64)
    }

    pub async fn count_where<E, P>(&self, predicate: P) -> Result<u64, StoreError>
    where
        E: Entity,
        P: Fn(&E) -> bool,
    {
        Ok(self.load::<E>().await?.iter().filter(|r| predicate(r)).count() as u64)
    }

    /// Up to `n` distinct records in random order.
    pub async fn random<E: Entity>(&self, n: usize) -> Result<Vec<E>, StoreError> {
        let mut records = self.load::<E>().await?;
        records.shuffle(&mut rand::rng());
        records.truncate(n);
        Ok(records)
    }

    /// Remove raw records whose `id_fields` value is in `ids`, deleting the
    /// collection key once it is empty. Records without an id stay.
    pub async fn remove_ids(
        &self,
        collection: &str,
        id_fields: &[&str],
        ids: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        self.remove_ids_across(&[Removal {
            collection,
            id_fields,
            ids: ids.clone(),
        }])
        .await
    }

    /// Apply several [`Removal`]s as one unit. Every new collection is
    /// computed before anything is written; if a write fails, collections
    /// already written are restored to their previous contents.
    pub async fn remove_ids_across(&self, removals: &[Removal<'_>]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut writes: Vec<(&str, Option<String>, Option<String>)> = Vec::new();
        let mut removed = 0;
        for removal in removals {
            let original = self.kv.get(removal.collection).await?;
            let mut raw = parse_raw(removal.collection, original.as_deref())?;
            let before = raw.len();
            raw.retain(|v| match raw_id(v, removal.id_fields) {
                Some(id) => !removal.ids.contains(id),
                None => true,
            });
            let count = before - raw.len();
            removed += count;

            let next = if raw.is_empty() {
                None
            } else if count > 0 {
                Some(serde_json::to_string(&raw)?)
            } else {
                continue;
            };
            if original.is_some() || next.is_some() {
                writes.push((removal.collection, original, next));
            }
        }

        for (applied, (collection, _, next)) in writes.iter().enumerate() {
            if let Err(e) = self.write_raw(collection, next.as_deref()).await {
                warn!(collection, error = %e, "Fallback removal failed, restoring earlier collections");
                for (restored, original, _) in &writes[..applied] {
                    if let Err(restore_err) = self.write_raw(restored, original.as_deref()).await {
                        error!(collection = restored, error = %restore_err, "Failed to restore fallback collection");
                    }
                }
                return Err(e);
            }
        }
        Ok(removed)
    }

    async fn write_raw(&self, collection: &str, json: Option<&str>) -> Result<(), StoreError> {
        match json {
            Some(json) => self.kv.put(collection, json).await,
            None => self.kv.delete(collection).await,
        }
    }

    /// Whether any entity collection holds data.
    pub async fn has_data(&self) -> Result<bool, StoreError> {
        for kind in crate::model::EntityKind::ALL {
            if !self.load_raw(kind.collection()).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Records to drop from one collection in [`FallbackStore::remove_ids_across`].
pub struct Removal<'a> {
    pub collection: &'a str,
    pub id_fields: &'a [&'a str],
    pub ids: HashSet<String>,
}

fn parse_raw(collection: &str, json: Option<&str>) -> Result<Vec<Value>, StoreError> {
    let Some(json) = json else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => Ok(items),
        other => Err(StoreError::Serialization(format!(
            "collection '{}' is not an array: {}",
            collection,
            json_type(&other)
        ))),
    }
}

/// First string value among `fields` of a raw record.
pub fn raw_id<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields.iter().find_map(|f| value.get(*f).and_then(Value::as_str))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::query::QueryOptions;
    use crate::model::{Message, MessagePatch, NewMessage};
    use crate::storage::memory::InMemoryKvStore;

    fn store() -> FallbackStore {
        FallbackStore::new(Arc::new(InMemoryKvStore::new()))
    }

    fn message(id: &str, content: &str, created_at: i64) -> Message {
        Message::create(&NewMessage::new(content, "#112233"), id.to_string(), created_at).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store();
        store.create(message("local-1", "hello", 1)).await.unwrap();

        let found: Message = store.find_by_id("local-1").await.unwrap().unwrap();
        assert_eq!(found.content, "hello");
        assert!(store.find_by_id::<Message>("nope").await.unwrap().is_none());
        assert_eq!(store.count::<Message>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = store();
        store.create(message("local-1", "a", 1)).await.unwrap();
        let err = store.create(message("local-1", "b", 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        let err = store
            .create_many(vec![message("local-2", "c", 3), message("local-2", "d", 4)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(store.count::<Message>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = store();
        assert!(store.insert_if_absent(message("s1", "a", 1)).await.unwrap());
        assert!(!store.insert_if_absent(message("s1", "b", 2)).await.unwrap());
        assert_eq!(store.count::<Message>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pagination_and_order() {
        let store = store();
        let batch: Vec<Message> = (0..25).map(|i| message(&format!("local-{}", i), "m", i)).collect();
        store.create_many(batch).await.unwrap();

        let q = QueryOptions::page(2, 10).resolve(Message::ORDER_FIELDS).unwrap();
        let page: Page<Message> = store.find_all(&q).await.unwrap();
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total, 25);
        assert!(page.has_next && page.has_prev);
        // Newest first: page 2 starts at created_at 14
        assert_eq!(page.items[0].created_at, 14);

        let q = QueryOptions::page(1, 3)
            .order_by("created_at", OrderDirection::Asc)
            .resolve(Message::ORDER_FIELDS)
            .unwrap();
        let page: Page<Message> = store.find_all(&q).await.unwrap();
        let stamps: Vec<i64> = page.items.iter().map(|m| m.created_at).collect();
        assert_eq!(stamps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = store();
        store.create(message("local-1", "a", 1)).await.unwrap();

        let patch = MessagePatch {
            content: Some("b".into()),
            color: None,
        };
        let updated: Message = store.update("local-1", &patch, 5).await.unwrap();
        assert_eq!(updated.content, "b");
        assert_eq!(updated.updated_at, 5);

        let err = store.update::<Message>("missing", &patch, 5).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound);

        assert!(store.delete::<Message>("local-1").await.unwrap());
        assert!(!store.delete::<Message>("local-1").await.unwrap());
        // Empty collection key is removed
        assert!(store.kv().get("messages").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_records_skipped() {
        let store = store();
        store
            .kv()
            .put(
                "messages",
                r##"[{"id":"local-1","content":"ok","color":"#FFFFFF","created_at":1,"updated_at":1},{"bogus":true}]"##,
            )
            .await
            .unwrap();
        let records: Vec<Message> = store.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(store.load_raw("messages").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_random_is_distinct_and_bounded() {
        let store = store();
        let batch: Vec<Message> = (0..5).map(|i| message(&format!("local-{}", i), "m", i)).collect();
        store.create_many(batch).await.unwrap();

        let picked: Vec<Message> = store.random(3).await.unwrap();
        assert_eq!(picked.len(), 3);
        let ids: HashSet<_> = picked.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), 3);

        let all: Vec<Message> = store.random(10).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_remove_ids_keeps_unlisted() {
        let store = store();
        store
            .create_many(vec![message("local-1", "a", 1), message("local-2", "b", 2)])
            .await
            .unwrap();

        let ids: HashSet<String> = ["local-1".to_string()].into_iter().collect();
        let removed = store.remove_ids("messages", &["id"], &ids).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count::<Message>().await.unwrap(), 1);

        let ids: HashSet<String> = ["local-2".to_string()].into_iter().collect();
        store.remove_ids("messages", &["id"], &ids).await.unwrap();
        assert!(store.kv().get("messages").await.unwrap().is_none());
        assert!(!store.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn test_equal_keys_page_without_repeats() {
        let store = store();
        // One batch shares a single created_at
        let batch: Vec<Message> = (0..7).map(|i| message(&format!("local-{}", i), "m", 42)).collect();
        store.create_many(batch).await.unwrap();

        let mut seen = Vec::new();
        for page in 1..=3 {
            let q = QueryOptions::page(page, 3).resolve(Message::ORDER_FIELDS).unwrap();
            let page: Page<Message> = store.find_all(&q).await.unwrap();
            seen.extend(page.items.into_iter().map(|m| m.id));
        }
        let expected: Vec<String> = (0..7).rev().map(|i| format!("local-{}", i)).collect();
        assert_eq!(seen, expected);
    }

    /// Refuses writes to one key until healed.
    struct RefusingKv {
        inner: InMemoryKvStore,
        refused: &'static str,
        healed: std::sync::atomic::AtomicBool,
    }

    impl RefusingKv {
        fn refusing(&self, key: &str) -> Result<(), StoreError> {
            if key == self.refused && !self.healed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Backend("disk I/O error".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for RefusingKv {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.refusing(key)?;
            self.inner.put(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.refusing(key)?;
            self.inner.delete(key).await
        }
        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.keys_with_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn test_remove_across_restores_on_failure() {
        let kv = Arc::new(RefusingKv {
            inner: InMemoryKvStore::new(),
            refused: "quotes",
            healed: std::sync::atomic::AtomicBool::new(true),
        });
        let store = FallbackStore::new(kv.clone());
        store
            .create_many(vec![message("local-1", "a", 1), message("local-2", "b", 2)])
            .await
            .unwrap();
        kv.put("quotes", r#"[{"id":"local-q"}]"#).await.unwrap();
        let before = kv.get("messages").await.unwrap();
        kv.healed.store(false, std::sync::atomic::Ordering::SeqCst);

        let all_messages: HashSet<String> = ["local-1".to_string(), "local-2".to_string()].into_iter().collect();
        let quote: HashSet<String> = ["local-q".to_string()].into_iter().collect();
        let removals = [
            Removal { collection: "messages", id_fields: &["id"], ids: all_messages.clone() },
            Removal { collection: "quotes", id_fields: &["id"], ids: quote.clone() },
        ];
        let err = store.remove_ids_across(&removals).await.unwrap_err();
        assert_eq!(err, StoreError::Backend("disk I/O error".into()));
        // The messages delete was rolled back
        assert_eq!(kv.get("messages").await.unwrap(), before);
        assert!(kv.get("quotes").await.unwrap().is_some());

        kv.healed.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(store.remove_ids_across(&removals).await.unwrap(), 3);
        assert!(!store.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_creates_do_not_lose_updates() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(message(&format!("local-{}", i), "m", i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.count::<Message>().await.unwrap(), 20);
    }
}
