// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-mostly aggregates served through the cache.
//!
//! Keys live in the entity's namespace (`messages:…`, `quotes:…`), so a write
//! through the matching repository invalidates them.

use std::sync::Arc;
use std::time::Duration;

use super::error::RepoError;
use super::{MessageRepository, PhotoRepository, QuoteRepository, VisitRepository};
use crate::cache::{cache_key, Cache};
use crate::model::{EntityKind, Message, Quote};

#[derive(Clone)]
pub struct CachedReads {
    cache: Arc<Cache>,
    ttl: Duration,
    messages: MessageRepository,
    photos: PhotoRepository,
    quotes: QuoteRepository,
    visits: VisitRepository,
}

impl CachedReads {
    pub fn new(
        cache: Arc<Cache>,
        ttl: Duration,
        messages: MessageRepository,
        photos: PhotoRepository,
        quotes: QuoteRepository,
        visits: VisitRepository,
    ) -> Self {
        Self {
            cache,
            ttl,
            messages,
            photos,
            quotes,
            visits,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn message_count(&self) -> Result<u64, RepoError> {
        let key = cache_key(EntityKind::Message.collection(), "count");
        self.cache
            .get_or_set(&key, self.ttl, || async {
                self.messages.count().await.map(|s| s.into_value())
            })
            .await
    }

    pub async fn photo_count(&self) -> Result<u64, RepoError> {
        let key = cache_key(EntityKind::Photo.collection(), "count");
        self.cache
            .get_or_set(&key, self.ttl, || async {
                self.photos.count().await.map(|s| s.into_value())
            })
            .await
    }

    pub async fn quote_count(&self) -> Result<u64, RepoError> {
        let key = cache_key(EntityKind::Quote.collection(), "count");
        self.cache
            .get_or_set(&key, self.ttl, || async {
                self.quotes.count().await.map(|s| s.into_value())
            })
            .await
    }

    pub async fn visit_count(&self) -> Result<u64, RepoError> {
        let key = cache_key(EntityKind::Visit.collection(), "count");
        self.cache
            .get_or_set(&key, self.ttl, || async {
                self.visits.count().await.map(|s| s.into_value())
            })
            .await
    }

    /// The `n` newest messages.
    pub async fn latest_messages(&self, n: u32) -> Result<Vec<Message>, RepoError> {
        let key = cache_key(EntityKind::Message.collection(), &("latest", n));
        self.cache
            .get_or_set(&key, self.ttl, || async {
                self.messages.latest(n).await.map(|s| s.into_value())
            })
            .await
    }

    /// One quote, stable for the cache TTL. `None` when there are no quotes.
    pub async fn random_quote(&self) -> Result<Option<Quote>, RepoError> {
        let key = cache_key(EntityKind::Quote.collection(), "random");
        self.cache
            .get_or_set(&key, self.ttl, || async {
                self.quotes
                    .random(1)
                    .await
                    .map(|s| s.into_value().into_iter().next())
            })
            .await
    }
}
