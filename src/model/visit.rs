// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Visit records.
//!
//! One record per session. A session is a client (IP + user agent) within one
//! fixed time window, so repeated page loads inside the window map to the same
//! `session_id` and are counted once. The raw IP is never stored, only a
//! salted hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::validation::{char_len, ValidationErrors};
use super::{Entity, EntityKind};
use crate::storage::traits::{Row, SqlValue, StoreError};

pub const MAX_USER_AGENT_CHARS: usize = 512;
pub const DEFAULT_SESSION_WINDOW: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[serde(default, alias = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(alias = "ipHash")]
    pub ip_hash: String,
    #[serde(alias = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewVisit {
    pub ip: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl NewVisit {
    pub fn new(ip: impl Into<String>, user_agent: Option<&str>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Index of the window containing `now`.
pub fn window_index(now: i64, window: Duration) -> i64 {
    let window_ms = (window.as_millis() as i64).max(1);
    now.div_euclid(window_ms)
}

/// Stable per client for the duration of one window.
pub fn derive_session_id(ip: &str, user_agent: Option<&str>, now: i64, window: Duration) -> String {
    let material = format!(
        "{}|{}|{}",
        ip.trim(),
        user_agent.unwrap_or(""),
        window_index(now, window)
    );
    sha256_hex(material.as_bytes())
}

pub fn hash_ip(salt: &str, ip: &str) -> String {
    sha256_hex(format!("{}{}", salt, ip.trim()).as_bytes())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

impl VisitRecord {
    /// Derive the record for a visit at `now`.
    pub fn derive(
        input: &NewVisit,
        salt: &str,
        window: Duration,
        now: i64,
    ) -> Result<Self, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        errs.check(!input.ip.trim().is_empty(), "ip", "must not be empty");

        let user_agent = input
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .map(|ua| truncate_chars(ua, MAX_USER_AGENT_CHARS));

        errs.into_result(VisitRecord {
            session_id: derive_session_id(&input.ip, user_agent.as_deref(), now, window),
            ip_hash: hash_ip(salt, &input.ip),
            user_agent,
            created_at: now,
        })
    }
}

impl Entity for VisitRecord {
    const KIND: EntityKind = EntityKind::Visit;
    const ID_COLUMN: &'static str = "session_id";
    const COLUMNS: &'static [&'static str] = &["session_id", "user_agent", "ip_hash", "created_at"];
    const ORDER_FIELDS: &'static [&'static str] = &["created_at"];

    fn id(&self) -> &str {
        &self.session_id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            session_id: row.get_str("session_id")?,
            user_agent: row.get_opt_str("user_agent")?,
            ip_hash: row.get_str("ip_hash")?,
            created_at: row.get_i64("created_at")?,
        })
    }

    fn to_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.session_id),
            SqlValue::opt_text(self.user_agent.as_deref()),
            SqlValue::text(&self.ip_hash),
            SqlValue::Int(self.created_at),
        ]
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        errs.check(is_sha256_hex(&self.session_id), "session_id", "must be a SHA-256 hex digest");
        errs.check(is_sha256_hex(&self.ip_hash), "ip_hash", "must be a SHA-256 hex digest");
        if let Some(ref ua) = self.user_agent {
            errs.check(
                char_len(ua) <= MAX_USER_AGENT_CHARS,
                "user_agent",
                format!("must be at most {} characters", MAX_USER_AGENT_CHARS),
            );
        }
        errs.into_result(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = DEFAULT_SESSION_WINDOW;

    #[test]
    fn test_same_window_same_session() {
        let a = derive_session_id("10.0.0.1", Some("Firefox"), 1_000, WINDOW);
        let b = derive_session_id("10.0.0.1", Some("Firefox"), 1_000 + 60_000, WINDOW);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_next_window_new_session() {
        let window_ms = WINDOW.as_millis() as i64;
        let a = derive_session_id("10.0.0.1", Some("Firefox"), window_ms - 1, WINDOW);
        let b = derive_session_id("10.0.0.1", Some("Firefox"), window_ms, WINDOW);
        assert_ne!(a, b);
    }

    #[test]
    fn test_client_identity_changes_session() {
        let a = derive_session_id("10.0.0.1", Some("Firefox"), 0, WINDOW);
        assert_ne!(a, derive_session_id("10.0.0.2", Some("Firefox"), 0, WINDOW));
        assert_ne!(a, derive_session_id("10.0.0.1", Some("Chrome"), 0, WINDOW));
    }

    #[test]
    fn test_ip_is_hashed_with_salt() {
        let record = VisitRecord::derive(&NewVisit::new("192.168.1.9", None), "pepper", WINDOW, 0).unwrap();
        assert_ne!(record.ip_hash, hash_ip("other", "192.168.1.9"));
        assert_eq!(record.ip_hash, hash_ip("pepper", "192.168.1.9"));
        assert!(!record.ip_hash.contains("192.168"));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_user_agent_truncated() {
        let ua = "x".repeat(600);
        let record = VisitRecord::derive(&NewVisit::new("1.1.1.1", Some(&ua)), "", WINDOW, 0).unwrap();
        assert_eq!(record.user_agent.unwrap().len(), MAX_USER_AGENT_CHARS);
    }

    #[test]
    fn test_empty_ip_rejected() {
        assert!(VisitRecord::derive(&NewVisit::new("  ", None), "", WINDOW, 0).is_err());
    }

    #[test]
    fn test_negative_time_uses_floor_window() {
        assert_eq!(window_index(-1, Duration::from_millis(10)), -1);
        assert_eq!(window_index(0, Duration::ZERO), 0);
    }
}
