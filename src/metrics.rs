// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for site-store.
//!
//! Uses the `metrics` crate facade; the host application installs the
//! recorder/exporter (Prometheus, OTEL, a test `DebuggingRecorder`).
//!
//! # Metric Naming Convention
//! - `site_store_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: message, photo, quote, visit
//! - `operation`: create, find_by_id, find_all, update, ...
//! - `source`: remote, fallback, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a completed repository operation
pub fn record_operation(entity: &str, operation: &str, source: &str) {
    counter!(
        "site_store_operations_total",
        "entity" => entity.to_string(),
        "operation" => operation.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record repository operation latency
pub fn record_latency(entity: &str, operation: &str, duration: Duration) {
    histogram!(
        "site_store_operation_seconds",
        "entity" => entity.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// RESILIENCE - retry, fallback, timeouts, health
// ═══════════════════════════════════════════════════════════════════════════

/// Record one failed attempt, labelled with its classified kind
pub fn record_attempt_failure(operation: &str, kind: &str) {
    counter!(
        "site_store_attempt_failures_total",
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_retry(operation: &str) {
    counter!(
        "site_store_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a switch to the fallback store
pub fn record_fallback(operation: &str) {
    counter!(
        "site_store_fallbacks_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_timeout(backend: &str) {
    counter!(
        "site_store_timeouts_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "site_store_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "site_store_cache_lookups_total",
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_cache_eviction() {
    counter!("site_store_cache_evictions_total").increment(1);
}

pub fn set_cache_entries(count: usize) {
    gauge!("site_store_cache_entries").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// MIGRATION
// ═══════════════════════════════════════════════════════════════════════════

/// Count stage transitions of the migration state machine
pub fn record_migration_stage(stage: &str) {
    counter!(
        "site_store_migration_stage_transitions_total",
        "stage" => stage.to_string()
    )
    .increment(1);
}

pub fn record_migrated(entity: &str, count: usize) {
    counter!(
        "site_store_migrated_records_total",
        "entity" => entity.to_string()
    )
    .increment(count as u64);
}

pub fn record_migration_discard(entity: &str) {
    counter!(
        "site_store_migration_discards_total",
        "entity" => entity.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record how long one phase of `RepositoryManager::initialize` took
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "site_store_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_startup_total(duration: Duration) {
    histogram!("site_store_startup_total_seconds").record(duration.as_secs_f64());
}

/// Record an advisory lock attempt (acquired, busy, error)
pub fn record_lock(backend: &str, outcome: &str) {
    counter!(
        "site_store_lock_attempts_total",
        "backend" => backend.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    entity: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(entity: &'static str, operation: &'static str) -> Self {
        Self {
            entity,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.entity, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_api_without_recorder_is_noop() {
        record_operation("message", "create", "remote");
        record_latency("message", "create", Duration::from_millis(3));
        record_attempt_failure("message.create", "network");
        record_retry("message.create");
        record_fallback("message.create");
        record_timeout("remote");
        set_backend_healthy("remote", false);
        record_cache_lookup(true);
        record_cache_eviction();
        set_cache_entries(3);
        record_migration_stage("migrating");
        record_migrated("message", 10);
        record_migration_discard("photo");
        record_lock("sql", "acquired");
        record_startup_phase("local_store", Duration::from_millis(2));
        record_startup_total(Duration::from_millis(5));
    }

    #[test]
    fn test_operation_counter_is_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_operation("quote", "find_all", "fallback");
            record_operation("quote", "find_all", "fallback");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let (key, _, _, value) = snapshot
            .iter()
            .find(|(k, _, _, _)| k.key().name() == "site_store_operations_total")
            .expect("counter recorded");
        let labels: Vec<_> = key.key().labels().map(|l| (l.key(), l.value())).collect();
        assert!(labels.contains(&("source", "fallback")));
        assert!(matches!(value, DebugValue::Counter(2)));
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let _timer = LatencyTimer::new("visit", "record");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert!(snapshot
            .iter()
            .any(|(k, _, _, _)| k.key().name() == "site_store_operation_seconds"));
    }
}
