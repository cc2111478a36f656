// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded in-memory log of operation attempts.
//!
//! Diagnostic only: the oldest entries are dropped once capacity is reached,
//! and nothing here is ever treated as authoritative data.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use super::classify::{Classification, ErrorKind, Severity};
use crate::clock::now_millis;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure {
        kind: ErrorKind,
        severity: Severity,
        retryable: bool,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorLogEntry {
    /// Epoch millis
    pub timestamp: i64,
    pub operation: String,
    pub attempt: usize,
    /// Free-form call context (arguments, ids)
    pub context: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl ErrorLogEntry {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failure { .. })
    }

    fn kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            AttemptOutcome::Failure { kind, .. } => Some(*kind),
            AttemptOutcome::Success => None,
        }
    }

    fn severity(&self) -> Option<Severity> {
        match &self.outcome {
            AttemptOutcome::Failure { severity, .. } => Some(*severity),
            AttemptOutcome::Success => None,
        }
    }
}

/// Filter for [`ErrorLog::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ErrorLogQuery {
    pub kind: Option<ErrorKind>,
    pub severity: Option<Severity>,
    pub operation: Option<String>,
    /// Inclusive lower bound (epoch millis)
    pub since: Option<i64>,
    /// Exclusive upper bound (epoch millis)
    pub until: Option<i64>,
    pub failures_only: bool,
}

impl ErrorLogQuery {
    fn matches(&self, entry: &ErrorLogEntry) -> bool {
        if self.failures_only && !entry.is_failure() {
            return false;
        }
        if let Some(kind) = self.kind {
            if entry.kind() != Some(kind) {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity() != Some(severity) {
                return false;
            }
        }
        if let Some(ref op) = self.operation {
            if &entry.operation != op {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp >= until {
                return false;
            }
        }
        true
    }
}

pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorLogEntry>>,
    capacity: usize,
}

impl ErrorLog {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: ErrorLogEntry) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn record_success(&self, operation: &str, attempt: usize, context: &str) {
        self.record(ErrorLogEntry {
            timestamp: now_millis(),
            operation: operation.to_string(),
            attempt,
            context: context.to_string(),
            outcome: AttemptOutcome::Success,
        });
    }

    pub fn record_failure(
        &self,
        operation: &str,
        attempt: usize,
        context: &str,
        classification: Classification,
        message: &str,
    ) {
        self.record(ErrorLogEntry {
            timestamp: now_millis(),
            operation: operation.to_string(),
            attempt,
            context: context.to_string(),
            outcome: AttemptOutcome::Failure {
                kind: classification.kind,
                severity: classification.severity,
                retryable: classification.retryable,
                message: message.to_string(),
            },
        });
    }

    /// Entries matching the filter, oldest first.
    pub fn query(&self, filter: &ErrorLogQuery) -> Vec<ErrorLogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Failure counts per kind since `since` (epoch millis). Every kind is
    /// present in the map, zero when absent.
    pub fn counts_by_kind(&self, since: i64) -> BTreeMap<ErrorKind, usize> {
        let mut counts: BTreeMap<ErrorKind, usize> =
            ErrorKind::ALL.iter().map(|k| (*k, 0)).collect();
        for entry in self.entries.lock().iter() {
            if entry.timestamp < since {
                continue;
            }
            if let Some(kind) = entry.kind() {
                *counts.entry(kind).or_insert(0) += 1;
            }
        }
        counts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
