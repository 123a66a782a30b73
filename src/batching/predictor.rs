//! Predictor component (spec §4.3): an online linear model advising the
//! Adaptive controller on a recommended batch-size cap.
//!
//! Mirrors the teacher's `communication::mcp_batch::IntelligentBatchingState`
//! shape (bounded performance history, periodic adaptation) but implements
//! the specific five-feature linear model and confidence formula spec'd
//! rather than the teacher's heuristic multiplier table.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single observed data point fed to the predictor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp_ms: u64,
    pub message_count: u64,
    pub batch_size: usize,
    pub latency_ms: f64,
    pub errors: u64,
    pub compression_ratio: Option<f64>,
    pub resource_usage: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Features {
    message_rate: f64,
    latency: f64,
    error_rate: f64,
    compression_ratio: f64,
    resource_usage: f64,
}

impl Features {
    fn dot(&self, weights: &Weights) -> f64 {
        weights.message_rate * self.message_rate
            + weights.latency * self.latency
            + weights.error_rate * self.error_rate
            + weights.compression_ratio * self.compression_ratio
            + weights.resource_usage * self.resource_usage
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Weights {
    message_rate: f64,
    latency: f64,
    error_rate: f64,
    compression_ratio: f64,
    resource_usage: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            message_rate: 0.5,
            latency: -0.3,
            error_rate: -0.2,
            compression_ratio: 0.4,
            resource_usage: -0.3,
        }
    }
}

/// A periodic prediction emitted by the predictor (§4.3 "Output").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Prediction {
    pub recommended_batch_size: usize,
    pub confidence: f64,
}

/// Online linear model over a sliding window of `DataPoint`s.
pub struct Predictor {
    history: VecDeque<DataPoint>,
    history_size: usize,
    feature_window: usize,
    learning_rate: f64,
    min_batch_size: usize,
    max_batch_size: usize,
    weights: Weights,
    bias: f64,
    predictions_made: u64,
    abs_error_sum: f64,
}

impl Predictor {
    #[must_use]
    pub fn new(
        history_size: usize,
        feature_window: usize,
        learning_rate: f64,
        min_batch_size: usize,
        max_batch_size: usize,
    ) -> Self {
        Self {
            history: VecDeque::with_capacity(history_size.max(1)),
            history_size: history_size.max(1),
            feature_window: feature_window.max(1),
            learning_rate,
            min_batch_size,
            max_batch_size,
            weights: Weights::default(),
            bias: 1.0,
            predictions_made: 0,
            abs_error_sum: 0.0,
        }
    }

    /// Enqueue a data point, dropping the oldest beyond `history_size`.
    pub fn add_data_point(&mut self, point: DataPoint) {
        self.history.push_back(point);
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
    }

    fn recent_window(&self) -> Vec<DataPoint> {
        let len = self.history.len();
        let start = len.saturating_sub(self.feature_window);
        self.history.iter().skip(start).copied().collect()
    }

    fn compute_features(&self) -> Option<Features> {
        let window = self.recent_window();
        if window.is_empty() {
            return None;
        }
        let window = &window[..];

        let total_messages: u64 = window.iter().map(|p| p.message_count).sum();
        let total_errors: u64 = window.iter().map(|p| p.errors).sum();
        let span_ms = window
            .last()
            .map(|p| p.timestamp_ms)
            .unwrap_or(0)
            .saturating_sub(window.first().map(|p| p.timestamp_ms).unwrap_or(0))
            .max(1);
        let span_secs = span_ms as f64 / 1000.0;

        let message_rate = total_messages as f64 / span_secs;
        let latency = window.iter().map(|p| p.latency_ms).sum::<f64>() / window.len() as f64;
        let error_rate = if total_messages == 0 {
            0.0
        } else {
            total_errors as f64 / total_messages as f64
        };
        let defined_ratios: Vec<f64> = window.iter().filter_map(|p| p.compression_ratio).collect();
        let compression_ratio = if defined_ratios.is_empty() {
            1.0
        } else {
            defined_ratios.iter().sum::<f64>() / defined_ratios.len() as f64
        };
        let resource_usage =
            window.iter().map(|p| p.resource_usage).sum::<f64>() / window.len() as f64;

        Some(Features {
            message_rate,
            latency,
            error_rate,
            compression_ratio,
            resource_usage,
        })
    }

    /// `min(maxBatchSize, max(minBatchSize, round(bias + Σ wᵢ·fᵢ)))` (§4.3).
    fn predict_from(&self, features: Features) -> usize {
        let raw = (self.bias + features.dot(&self.weights)).round();
        let clamped = raw.max(self.min_batch_size as f64).min(self.max_batch_size as f64);
        clamped as usize
    }

    /// Observe the actual batch size chosen and update weights via
    /// gradient update: `error = actual − predicted`,
    /// `wᵢ ← wᵢ + lr·error·fᵢ`, `bias ← bias + lr·error` (§4.3 "Update").
    fn update(&mut self, features: Features, actual_batch_size: usize) {
        let predicted = self.predict_from(features);
        let error = actual_batch_size as f64 - predicted as f64;

        self.weights.message_rate += self.learning_rate * error * features.message_rate;
        self.weights.latency += self.learning_rate * error * features.latency;
        self.weights.error_rate += self.learning_rate * error * features.error_rate;
        self.weights.compression_ratio += self.learning_rate * error * features.compression_ratio;
        self.weights.resource_usage += self.learning_rate * error * features.resource_usage;
        self.bias += self.learning_rate * error;

        self.predictions_made += 1;
        self.abs_error_sum += error.abs();
    }

    /// Observe an actual batch size (feeding the online update) and produce
    /// a fresh prediction + confidence in one step — the shape the Adaptive
    /// controller's periodic tick calls.
    pub fn observe_and_predict(&mut self, actual_batch_size: usize) -> Option<Prediction> {
        let features = self.compute_features()?;
        self.update(features, actual_batch_size);
        let recommended_batch_size = self.predict_from(features);
        Some(Prediction {
            recommended_batch_size,
            confidence: self.confidence(),
        })
    }

    /// Predict without an update step (read-only recommendation).
    pub fn predict(&self) -> Option<usize> {
        let features = self.compute_features()?;
        Some(self.predict_from(features))
    }

    fn accuracy(&self) -> f64 {
        if self.predictions_made == 0 {
            0.0
        } else {
            (1.0 - self.abs_error_sum / self.predictions_made as f64).max(0.0)
        }
    }

    /// `confidence = clamp01(points / historySize) · max(0, accuracy)`
    /// (Open Question resolution, spec §9 / `SPEC_FULL.md` §9).
    #[must_use]
    pub fn confidence(&self) -> f64 {
        let fullness = (self.history.len() as f64 / self.history_size as f64).min(1.0);
        (fullness * self.accuracy()).clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
