//! Engine metrics and analytics snapshots (spec §3 invariant 6, §4.1.3).
//!
//! Modeled on `infrastructure::metrics::MetricsCollector`'s
//! snapshot-under-lock pattern, scoped to exactly what spec.md names:
//! flush-reason counters, per-priority counts/latency, batch-size stats,
//! compression totals, and error counters.

use super::envelope::FlushReason;
use super::message::Priority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A deep, point-in-time snapshot of the engine's counters. `resetMetrics`
/// restores a fresh `EngineMetricsState` without touching `active_batch_size_cap`
/// or any client buffer (law R3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_batches: u64,
    pub total_messages_delivered: u64,
    pub flush_reason_counts: HashMap<FlushReason, u64>,
    pub priority_counts: HashMap<Priority, u64>,
    pub priority_latency_totals_ms: HashMap<Priority, f64>,
    pub max_batch_size_seen: usize,
    pub min_batch_size_seen: Option<usize>,
    pub average_batch_size: f64,
    pub active_batches: usize,
    pub compression_ratio: f64,
    pub total_bytes_saved: u64,
    pub invalid_client_id_errors: u64,
    pub invalid_message_errors: u64,
    pub compression_errors: u64,
    pub decompression_errors: u64,
    pub timer_errors: u64,
    pub analytics_errors: u64,
}

impl MetricsSnapshot {
    /// Average batch size as `total_messages_delivered / total_batches`,
    /// matching invariant I5 up to floating-point error.
    #[must_use]
    pub fn recompute_average_batch_size(&mut self) {
        self.average_batch_size = if self.total_batches == 0 {
            0.0
        } else {
            self.total_messages_delivered as f64 / self.total_batches as f64
        };
    }

    /// Priority distribution as ratios rounded to tenths (Open Question
    /// resolution, `SPEC_FULL.md` §9): display-only, never used to
    /// recompute totals, so the rounding-induced sum drift is harmless.
    #[must_use]
    pub fn priority_distribution_tenths(&self) -> HashMap<Priority, f64> {
        let total: u64 = self.priority_counts.values().sum();
        self.priority_counts
            .iter()
            .map(|(priority, count)| {
                let ratio = if total == 0 {
                    0.0
                } else {
                    *count as f64 / total as f64
                };
                (*priority, (ratio * 10.0).round() / 10.0)
            })
            .collect()
    }

    #[must_use]
    pub fn priority_latency_avg_ms(&self, priority: Priority) -> f64 {
        let count = self.priority_counts.get(&priority).copied().unwrap_or(0);
        if count == 0 {
            0.0
        } else {
            self.priority_latency_totals_ms.get(&priority).copied().unwrap_or(0.0) / count as f64
        }
    }
}

/// Best-effort periodic aggregation emitted for observability (§4.1.3).
/// Never on the critical path: failures building one are logged and
/// counted, never propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub max_batch_size_seen: usize,
    pub min_batch_size_seen: Option<usize>,
    pub average_batch_size: f64,
    pub priority_latency_avg_ms: HashMap<Priority, f64>,
    pub compression_ratio: f64,
    pub total_bytes_saved: u64,
    pub priority_distribution: HashMap<Priority, f64>,
    pub taken_at_ms: u64,
}
