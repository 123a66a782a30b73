//! Error taxonomy for the batching engine (spec §7).
//!
//! User-facing validation errors (`InvalidClientId`, `InvalidMessage`,
//! `DecompressionError`) propagate synchronously to the caller. Background
//! errors (`TimerError`, `AnalyticsError`, `CompressionError`) are logged
//! and counted but never surfaced or allowed to cancel the engine — see
//! `BatchingEngine`'s flush and timer-fire paths.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("invalid client id: must be non-empty")]
    InvalidClientId,

    #[error("invalid message: type tag must be non-empty")]
    InvalidMessage,

    #[error("compression failed: {reason}")]
    CompressionError { reason: String },

    #[error("decompression failed: {reason}")]
    DecompressionError { reason: String },

    #[error("inactivity timer error for client {client_id}: {reason}")]
    TimerError { client_id: String, reason: String },

    #[error("analytics snapshot failed: {reason}")]
    AnalyticsError { reason: String },

    #[error("stop() called after the engine already stopped")]
    StopError,
}

pub type BatchResult<T> = Result<T, BatchError>;
