//! Compressor component (spec §4.2).
//!
//! Serializes a batch of messages and, above a per-priority size threshold,
//! GZIPs the serialized bytes at the configured level. Grounded on
//! `communication::optimized_messaging::MessageCompressor`'s
//! `GzEncoder`/`flate2` usage, generalized with per-priority thresholds and
//! a rolling compression ratio as spec'd.

use super::message::{Message, Priority};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Instant;

use super::error::{BatchError, BatchResult};

pub const GZIP: &str = "gzip";

#[derive(Debug, Clone)]
pub struct CompressResult {
    pub compressed: bool,
    pub algorithm: Option<String>,
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: Option<f64>,
    pub compression_time_ms: Option<u64>,
}

#[derive(Debug, Default, Clone)]
pub struct CompressionMetrics {
    pub total_compressed: u64,
    pub total_uncompressed: u64,
    pub total_bytes_saved: u64,
    pub compression_errors: u64,
    pub decompression_errors: u64,
    /// Per-priority (sum_time_ms, count) for average compression time.
    per_priority_time: HashMap<Priority, (u64, u64)>,
}

impl CompressionMetrics {
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        let total = self.total_compressed + self.total_uncompressed;
        if total == 0 {
            0.0
        } else {
            self.total_bytes_saved as f64 / total as f64
        }
    }

    #[must_use]
    pub fn average_time_ms(&self, priority: Priority) -> f64 {
        match self.per_priority_time.get(&priority) {
            Some((sum, count)) if *count > 0 => *sum as f64 / *count as f64,
            _ => 0.0,
        }
    }
}

/// Serializes and (conditionally) compresses batches; tracks rolling
/// compression metrics. `enabled` toggles whether `compress` ever attempts
/// GZIP (the runtime flag from `enable_compression`/`disable_compression`,
/// §4.1); the per-priority thresholds below that still gate it even when
/// enabled.
pub struct Compressor {
    level: u32,
    metrics: Mutex<CompressionMetrics>,
}

impl Compressor {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
            metrics: Mutex::new(CompressionMetrics::default()),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> CompressionMetrics {
        self.metrics.lock().clone()
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = CompressionMetrics::default();
    }

    /// Serialize `messages`. Used both to measure `original_size` (always)
    /// and, when the threshold is met, as the input to GZIP.
    pub fn serialize(messages: &[Message]) -> BatchResult<Vec<u8>> {
        bincode::serialize(messages).map_err(|e| BatchError::CompressionError {
            reason: format!("serialization failed: {e}"),
        })
    }

    /// Attempt compression of an already priority-sorted batch.
    ///
    /// Returns `compressed: false` both when compression is disabled and
    /// when the batch falls below `threshold` — callers distinguish these
    /// only by the caller-known `enabled` flag, matching spec §4.2's
    /// "disabled compressor" / "size-below-threshold short-circuit" cases.
    pub fn compress(
        &self,
        messages: &[Message],
        priority: Priority,
        enabled: bool,
        threshold: usize,
    ) -> BatchResult<CompressResult> {
        let serialized = Self::serialize(messages)?;
        let original_size = serialized.len();

        if !enabled || original_size < threshold {
            self.metrics.lock().total_uncompressed += 1;
            return Ok(CompressResult {
                compressed: false,
                algorithm: None,
                data: serialized,
                original_size,
                compressed_size: original_size,
                compression_ratio: None,
                compression_time_ms: None,
            });
        }

        let start = Instant::now();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        if let Err(e) = encoder.write_all(&serialized) {
            self.metrics.lock().compression_errors += 1;
            return Err(BatchError::CompressionError {
                reason: format!("gzip write failed: {e}"),
            });
        }
        let compressed = match encoder.finish() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.lock().compression_errors += 1;
                return Err(BatchError::CompressionError {
                    reason: format!("gzip finish failed: {e}"),
                });
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let compressed_size = compressed.len();

        {
            let mut metrics = self.metrics.lock();
            metrics.total_compressed += 1;
            metrics.total_bytes_saved += original_size.saturating_sub(compressed_size) as u64;
            let entry = metrics.per_priority_time.entry(priority).or_insert((0, 0));
            entry.0 += elapsed_ms;
            entry.1 += 1;
        }

        let ratio = if original_size > 0 {
            compressed_size as f64 / original_size as f64
        } else {
            1.0
        };

        Ok(CompressResult {
            compressed: true,
            algorithm: Some(GZIP.to_string()),
            data: compressed,
            original_size,
            compressed_size,
            compression_ratio: Some(ratio),
            compression_time_ms: Some(elapsed_ms),
        })
    }

    /// Inverse of `compress`: decode GZIP then deserialize back to
    /// `Vec<Message>`. Any mismatch is fatal to the caller (§4.2, §7).
    pub fn decompress(&self, data: &[u8], algorithm: Option<&str>) -> BatchResult<Vec<Message>> {
        let raw = match algorithm {
            Some(GZIP) => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map_err(|e| {
                    self.metrics.lock().decompression_errors += 1;
                    BatchError::DecompressionError {
                        reason: format!("gzip decode failed: {e}"),
                    }
                })?;
                out
            }
            None => data.to_vec(),
            Some(other) => {
                self.metrics.lock().decompression_errors += 1;
                return Err(BatchError::DecompressionError {
                    reason: format!("unknown compression algorithm: {other}"),
                });
            }
        };

        bincode::deserialize(&raw).map_err(|e| {
            self.metrics.lock().decompression_errors += 1;
            BatchError::DecompressionError {
                reason: format!("deserialization failed: {e}"),
            }
        })
    }
}
