//! Adaptive controller (spec §4.4): periodically reconciles observed load
//! against a target and adjusts the active batch-size cap, honoring
//! high-confidence Predictor recommendations.
//!
//! Sign convention (Open Question, resolved in `SPEC_FULL.md` §9):
//! high load shrinks the cap, low load grows it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const ADJUSTMENT_HISTORY_CAP: usize = 10;
const PREDICTOR_CONFIDENCE_OVERRIDE: f64 = 0.7;
const LOAD_DEADBAND: f64 = 0.05;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub previous_cap: usize,
    pub new_cap: usize,
    pub observed_load: f64,
    pub reason: AdjustmentReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentReason {
    LoadReconciliation,
    PredictorOverride,
}

/// Mutable adaptive state: the active cap plus a bounded adjustment
/// history (§3 `AdaptiveState`).
pub struct AdaptiveController {
    min_batch_size: usize,
    max_batch_size: usize,
    performance_threshold: f64,
    active_batch_size_cap: usize,
    history: VecDeque<AdjustmentRecord>,
    last_observed_load: f64,
}

impl AdaptiveController {
    #[must_use]
    pub fn new(
        initial_cap: usize,
        min_batch_size: usize,
        max_batch_size: usize,
        performance_threshold: f64,
    ) -> Self {
        let active_batch_size_cap = initial_cap.clamp(min_batch_size, max_batch_size);
        Self {
            min_batch_size,
            max_batch_size,
            performance_threshold,
            active_batch_size_cap,
            history: VecDeque::with_capacity(ADJUSTMENT_HISTORY_CAP),
            last_observed_load: 0.0,
        }
    }

    #[must_use]
    pub fn active_cap(&self) -> usize {
        self.active_batch_size_cap
    }

    #[must_use]
    pub fn last_observed_load(&self) -> f64 {
        self.last_observed_load
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<AdjustmentRecord> {
        &self.history
    }

    fn clamp(&self, cap: i64) -> usize {
        cap.clamp(self.min_batch_size as i64, self.max_batch_size as i64) as usize
    }

    fn record(&mut self, record: AdjustmentRecord) {
        self.history.push_back(record);
        while self.history.len() > ADJUSTMENT_HISTORY_CAP {
            self.history.pop_front();
        }
    }

    /// Reconcile `current_load` (e.g. `active_batches / max_batch_size`,
    /// or a richer fill-weighted variant) against `performance_threshold`.
    /// Adjusts and records only when `|load − threshold| > 0.05`.
    pub fn reconcile(&mut self, current_load: f64) {
        self.last_observed_load = current_load;
        let load_diff = current_load - self.performance_threshold;

        if load_diff.abs() <= LOAD_DEADBAND {
            return;
        }

        let magnitude = load_diff.abs().min(0.5);
        let sign = if load_diff > 0.0 { -1.0 } else { 1.0 };
        let delta = (self.active_batch_size_cap as f64 * magnitude * sign).round() as i64;
        let previous_cap = self.active_batch_size_cap;
        let new_cap = self.clamp(previous_cap as i64 + delta);

        if new_cap != previous_cap {
            self.active_batch_size_cap = new_cap;
            self.record(AdjustmentRecord {
                previous_cap,
                new_cap,
                observed_load: current_load,
                reason: AdjustmentReason::LoadReconciliation,
            });
        }
    }

    /// Apply a Predictor recommendation. Ignored below the confidence
    /// threshold (§4.4, "whenever the Predictor emits a recommendation
    /// with confidence > 0.7, override ...").
    pub fn apply_prediction(&mut self, recommended_batch_size: usize, confidence: f64) {
        if confidence <= PREDICTOR_CONFIDENCE_OVERRIDE {
            return;
        }

        let previous_cap = self.active_batch_size_cap;
        let new_cap = self.clamp(recommended_batch_size as i64);
        if new_cap != previous_cap {
            self.active_batch_size_cap = new_cap;
            self.record(AdjustmentRecord {
                previous_cap,
                new_cap,
                observed_load: self.last_observed_load,
                reason: AdjustmentReason::PredictorOverride,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_load_shrinks_cap() {
        let mut controller = AdaptiveController::new(10, 1, 20, 0.8);
        controller.reconcile(0.95);
        assert!(controller.active_cap() < 10);
        assert_eq!(controller.history().len(), 1);
    }

    #[test]
    fn low_load_grows_cap() {
        let mut controller = AdaptiveController::new(10, 1, 20, 0.8);
        controller.reconcile(0.5);
        assert!(controller.active_cap() > 10);
    }

    #[test]
    fn within_deadband_does_not_adjust() {
        let mut controller = AdaptiveController::new(10, 1, 20, 0.8);
        controller.reconcile(0.82);
        assert_eq!(controller.active_cap(), 10);
        assert!(controller.history().is_empty());
    }

    #[test]
    fn cap_never_leaves_configured_bounds() {
        let mut controller = AdaptiveController::new(10, 5, 12, 0.8);
        for _ in 0..10 {
            controller.reconcile(0.0);
        }
        assert!(controller.active_cap() >= 5 && controller.active_cap() <= 12);
    }

    #[test]
    fn low_confidence_prediction_is_ignored() {
        let mut controller = AdaptiveController::new(10, 1, 20, 0.8);
        controller.apply_prediction(7, 0.5);
        assert_eq!(controller.active_cap(), 10);
    }

    #[test]
    fn high_confidence_prediction_overrides_cap() {
        let mut controller = AdaptiveController::new(10, 1, 20, 0.8);
        controller.apply_prediction(7, 0.9);
        assert_eq!(controller.active_cap(), 7);
        assert_eq!(controller.history().len(), 1);
    }

    #[test]
    fn history_is_bounded_to_ten_entries() {
        let mut controller = AdaptiveController::new(50, 1, 1000, 0.8);
        for i in 0..20 {
            controller.apply_prediction(50 + i, 0.9);
        }
        assert_eq!(controller.history().len(), ADJUSTMENT_HISTORY_CAP);
    }
}
