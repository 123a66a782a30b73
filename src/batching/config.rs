//! Engine configuration (spec §6). All options are optional with defaults;
//! a `EngineConfig` can be built programmatically or loaded from TOML/YAML
//! the way `infrastructure::config::ConfigManager` loads `MCPConfig`, minus
//! the hot-reload file watcher (the engine owns no file handles — see §5).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub timeouts: TimeoutConfig,
    pub compression: CompressionConfig,
    pub adaptive_interval_ms: u64,
    pub performance_threshold: f64,
    pub analytics: AnalyticsConfig,
    pub predictor: PredictorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub high_ms: u64,
    pub medium_ms: u64,
    pub low_ms: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn for_priority(&self, priority: super::message::Priority) -> Duration {
        use super::message::Priority;
        let ms = match priority {
            Priority::High => self.high_ms,
            Priority::Medium => self.medium_ms,
            Priority::Low => self.low_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            high_ms: 1000,
            medium_ms: 5000,
            low_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub min_size: usize,
    pub priority_thresholds: PriorityThresholds,
    /// GZIP level, 0-9. `9` is "best compression" (spec default).
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityThresholds {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl PriorityThresholds {
    #[must_use]
    pub fn for_priority(&self, priority: super::message::Priority) -> usize {
        use super::message::Priority;
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            high: 500,
            medium: 1000,
            low: 2000,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 5,
            priority_thresholds: PriorityThresholds::default(),
            level: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub learning_rate: f64,
    pub history_size: usize,
    pub feature_window: usize,
    pub prediction_interval_ms: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            history_size: 1000,
            feature_window: 10,
            prediction_interval_ms: 60_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_batch_size: 1,
            max_batch_size: 100,
            timeouts: TimeoutConfig::default(),
            compression: CompressionConfig::default(),
            adaptive_interval_ms: 5000,
            performance_threshold: 0.8,
            analytics: AnalyticsConfig::default(),
            predictor: PredictorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML document, following `infrastructure::config`'s
    /// TOML-first configuration loading convention.
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Parse from a YAML document.
    pub fn from_yaml_str(input: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Validate invariant I2 (`minBatchSize ≤ activeBatchSizeCap ≤ maxBatchSize`)
    /// against the initial `batch_size`, plus basic sanity checks.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.min_batch_size == 0 {
            errors.push("min_batch_size must be at least 1".to_string());
        }
        if self.min_batch_size > self.max_batch_size {
            errors.push("min_batch_size must not exceed max_batch_size".to_string());
        }
        if self.batch_size < self.min_batch_size || self.batch_size > self.max_batch_size {
            errors.push("batch_size must fall within [min_batch_size, max_batch_size]".to_string());
        }
        if !(0.0..=1.0).contains(&self.performance_threshold) {
            errors.push("performance_threshold must be within [0.0, 1.0]".to_string());
        }
        if self.compression.level > 9 {
            errors.push("compression.level must be within [0, 9]".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.min_batch_size, 1);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.timeouts.high_ms, 1000);
        assert_eq!(config.timeouts.medium_ms, 5000);
        assert_eq!(config.timeouts.low_ms, 10_000);
        assert!(config.compression.enabled);
        assert_eq!(config.compression.min_size, 5);
        assert_eq!(config.compression.priority_thresholds.high, 500);
        assert_eq!(config.adaptive_interval_ms, 5000);
        assert!((config.performance_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.predictor.history_size, 1000);
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let mut config = EngineConfig::default();
        config.min_batch_size = 50;
        config.max_batch_size = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let toml = r"
batch_size = 20
min_batch_size = 2
max_batch_size = 40
adaptive_interval_ms = 7000
performance_threshold = 0.75

[timeouts]
high_ms = 500
medium_ms = 2500
low_ms = 9000

[compression]
enabled = false
min_size = 10
level = 6

[compression.priority_thresholds]
high = 100
medium = 200
low = 300

[analytics]
enabled = true
interval_ms = 30000

[predictor]
learning_rate = 0.02
history_size = 500
feature_window = 5
prediction_interval_ms = 15000
";
        let config = EngineConfig::from_toml_str(toml).expect("valid toml");
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.timeouts.low_ms, 9000);
        assert!(!config.compression.enabled);
    }

    #[test]
    fn loads_from_a_toml_file_on_disk() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().expect("create temp file");
        writeln!(file, "batch_size = 15\nmin_batch_size = 1\nmax_batch_size = 30").expect("write toml");
        let contents = std::fs::read_to_string(file.path()).expect("read back");

        let config = EngineConfig::from_toml_str(&contents).expect("valid toml");
        assert_eq!(config.batch_size, 15);
        assert_eq!(config.max_batch_size, 30);
    }
}
