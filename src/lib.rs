#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::cargo)]
#![allow(missing_docs)]

//! # Batching Engine
//!
//! A per-client message batching engine: messages submitted for a client
//! accumulate until a size, timeout, or disconnect policy flushes them as a
//! single, priority-ordered batch, optionally GZIP-compressed. A Predictor
//! and an Adaptive controller continuously tune the batch-size cap to
//! observed load.
//!
//! ## Architecture Overview
//!
//! - [`batching::BatchingEngine`]: the entry point — per-client buffering,
//!   the flush algorithm, and inactivity timers.
//! - [`batching::Compressor`]: serializes and conditionally GZIPs batches.
//! - [`batching::Predictor`]: an online linear model recommending a
//!   batch-size cap from recent throughput, latency, and error features.
//! - Adaptive controller (internal to `BatchingEngine`): reconciles
//!   observed load against a performance threshold and honors
//!   high-confidence Predictor recommendations.
//!
//! ## Quick Start
//!
//! ```rust
//! use batching_engine::{BatchingEngine, EngineConfig, ClientId, Message, Priority};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = BatchingEngine::new(EngineConfig::default());
//!     engine.on_batch(|client_id, envelope| async move {
//!         println!("flushed {} messages for {client_id}", envelope.len());
//!     });
//!
//!     let client = ClientId::from("client-1");
//!     engine
//!         .add_message(client.clone(), Message::new("event", Priority::High, vec![1, 2, 3]))
//!         .await?;
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

/// Per-client message batching: buffering, flush policies, compression,
/// prediction, and adaptive batch-size control.
pub mod batching;

/// Install a `tracing_subscriber` JSON/env-filter subscriber as the global
/// default, for embedders that have not already set one up. No-op error is
/// returned if a global subscriber is already installed; callers that
/// manage their own subscriber (e.g. the connection acceptor in §6) should
/// skip this and configure `tracing` themselves.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
}

pub use batching::{
    AdjustmentRecord, AdjustmentReason, AnalyticsConfig, AnalyticsSnapshot, BatchEnvelope, BatchError,
    BatchResult, BatchingEngine, ClientId, CompressResult, CompressionConfig, CompressionMetrics, Compressor,
    DataPoint, EngineConfig, FlushReason, Message, MetricsSnapshot, Prediction, Predictor, PredictorConfig,
    Priority, PriorityThresholds, SubscriptionHandle, TimeoutConfig, GZIP,
};
