// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error classification.
//!
//! Maps a [`StoreError`] to a stable kind, a severity and a retry decision.
//! Typed variants classify directly; untyped backend errors fall back to
//! keyword matching on the message, which is how driver errors from MySQL and
//! SQLite surface.
//!
//! ```
//! use site_store::resilience::classify::{classify, ErrorKind};
//! use site_store::StoreError;
//! use std::time::Duration;
//!
//! let c = classify(&StoreError::Timeout(Duration::from_secs(5)));
//! assert_eq!(c.kind, ErrorKind::Network);
//! assert!(c.retryable);
//!
//! let c = classify(&StoreError::Backend("Access denied for user 'site'".into()));
//! assert_eq!(c.kind, ErrorKind::Permission);
//! assert!(!c.retryable);
//! ```

use serde::{Deserialize, Serialize};

use crate::storage::traits::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RemoteStore,
    Validation,
    Permission,
    RateLimit,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Network,
        ErrorKind::RemoteStore,
        ErrorKind::Validation,
        ErrorKind::Permission,
        ErrorKind::RateLimit,
        ErrorKind::Unknown,
    ];

    /// Whether errors of this kind are retried by default.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::RemoteStore | ErrorKind::RateLimit)
    }

    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Validation => Severity::Low,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Unknown => Severity::Medium,
            ErrorKind::RemoteStore | ErrorKind::Permission => Severity::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RemoteStore => "remote_store",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
}

impl Classification {
    #[must_use]
    pub fn of_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            retryable: kind.is_retryable(),
        }
    }
}

/// Keyword table, checked in order. The first matching group wins, so the
/// more specific transport failures come before the generic store words.
const KEYWORDS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Network,
        &[
            "connection refused",
            "connection reset",
            "connection closed",
            "broken pipe",
            "timed out",
            "timeout",
            "network",
            "dns",
            "unreachable",
            "econnrefused",
            "failed to connect",
        ],
    ),
    (
        ErrorKind::RateLimit,
        &["too many requests", "too many connections", "rate limit", "quota", "throttl"],
    ),
    (
        ErrorKind::Permission,
        &["permission", "denied", "unauthorized", "forbidden", "readonly", "read-only"],
    ),
    (
        ErrorKind::Validation,
        &["invalid", "violat", "constraint", "malformed", "out of range", "too long"],
    ),
    (
        ErrorKind::RemoteStore,
        &[
            "database",
            "sql",
            "table",
            "deadlock",
            "lock wait",
            "syntax",
            "busy",
            "locked",
            "i/o",
            "disk",
            "storage",
        ],
    ),
];

/// Classify a message by keyword.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map_or(ErrorKind::Unknown, |(kind, _)| *kind)
}

/// Classify a storage error.
#[must_use]
pub fn classify(error: &StoreError) -> Classification {
    let kind = match error {
        StoreError::Connection(_) | StoreError::Timeout(_) => ErrorKind::Network,
        StoreError::RateLimited(_) => ErrorKind::RateLimit,
        StoreError::Permission(_) => ErrorKind::Permission,
        StoreError::Constraint(_) | StoreError::Invalid(_) => ErrorKind::Validation,
        StoreError::NotFound => ErrorKind::Validation,
        StoreError::Serialization(_) => ErrorKind::Unknown,
        StoreError::Backend(msg) => match classify_message(msg) {
            // A backend error with no recognisable keyword still came from the store
            ErrorKind::Unknown => ErrorKind::RemoteStore,
            kind => kind,
        },
    };
    Classification::of_kind(kind)
}
