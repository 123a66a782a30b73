//! `BatchEnvelope` and the reasons a flush was triggered.

use super::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a client's buffer was flushed. Counted in `EngineMetrics` and
/// carried on the emitted `BatchEnvelope` (§3, §4.1.1 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Size,
    Timeout,
    ClientDisconnect,
    Manual,
    Stop,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
            FlushReason::ClientDisconnect => "client_disconnect",
            FlushReason::Manual => "manual",
            FlushReason::Stop => "stop",
        };
        write!(f, "{label}")
    }
}

/// A flushed, priority-sorted batch emitted to downstream subscribers.
///
/// `messages` always carries the logical, priority-sorted list. When
/// `compressed` is `true`, `payload` additionally carries the serialized
/// compressed bytes under `algorithm`; when `false`, `payload` is `None`
/// and `messages` is the wire representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub messages: Vec<Message>,
    pub compressed: bool,
    pub payload: Option<Vec<u8>>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub algorithm: Option<String>,
    pub reason: FlushReason,
}

impl BatchEnvelope {
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
