// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fallback records → repository input.
//!
//! Each raw JSON record is decoded as its entity, re-validated, and mapped to
//! the input shape the remote repository's `create_many` takes. Records that
//! fail either step are discarded with a `<entity>:<id>: <reason>` error and
//! stay in the fallback store.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::fallback::raw_id;
use crate::model::{Entity, EntityKind, Message, NewMessage, NewPhoto, NewQuote, Photo, Quote, VisitRecord};

/// Raw id fields per collection; visits written by older builds use camelCase.
pub(crate) fn id_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Visit => &["session_id", "sessionId"],
        _ => &["id"],
    }
}

/// `<entity>:<id>`, the key migrated records are tracked under.
pub(crate) fn source_key(kind: EntityKind, id: &str) -> String {
    format!("{}:{}", kind.as_str(), id)
}

#[derive(Debug, Clone)]
pub(crate) struct Candidate<I> {
    pub source_id: String,
    pub input: I,
}

#[derive(Debug)]
pub(crate) struct Converted<I> {
    pub candidates: Vec<Candidate<I>>,
    pub discarded: Vec<String>,
    /// Already migrated by an earlier run
    pub skipped: usize,
}

pub(crate) fn convert<E, I>(
    raw: Vec<Value>,
    already_migrated: &BTreeSet<String>,
    to_input: impl Fn(E) -> I,
) -> Converted<I>
where
    E: Entity,
{
    let kind = E::KIND;
    let mut converted = Converted {
        candidates: Vec::with_capacity(raw.len()),
        discarded: Vec::new(),
        skipped: 0,
    };

    for (idx, value) in raw.into_iter().enumerate() {
        let key = match raw_id(&value, id_fields(kind)) {
            Some(id) => source_key(kind, id),
            None => source_key(kind, &format!("#{}", idx)),
        };
        if already_migrated.contains(&key) {
            converted.skipped += 1;
            continue;
        }

        let record = match serde_json::from_value::<E>(value) {
            Ok(record) => record,
            Err(e) => {
                converted.discarded.push(format!("{}: {}", key, e));
                continue;
            }
        };
        if let Err(errs) = record.validate() {
            converted.discarded.push(format!("{}: {}", key, errs.summary()));
            continue;
        }

        converted.candidates.push(Candidate {
            source_id: key,
            input: to_input(record),
        });
    }
    converted
}

pub(crate) fn message_input(m: Message) -> NewMessage {
    NewMessage {
        content: m.content,
        color: m.color,
        created_at: Some(m.created_at),
    }
}

pub(crate) fn photo_input(p: Photo) -> NewPhoto {
    NewPhoto {
        url: p.url,
        caption: Some(p.caption).filter(|c| !c.is_empty()),
        is_custom: p.is_custom,
        created_at: Some(p.created_at),
    }
}

pub(crate) fn quote_input(q: Quote) -> NewQuote {
    NewQuote {
        text: q.text,
        created_at: Some(q.created_at),
    }
}

/// Visits keep their session id so the remote insert-if-absent dedupes them.
pub(crate) fn visit_input(v: VisitRecord) -> VisitRecord {
    v
}
