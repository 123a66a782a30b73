//! Message and priority types flowing through the batching engine.
//!
//! A `Message`'s payload is opaque to the engine: it is measured for size
//! (compression thresholds, size statistics) but never inspected.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Client-visible priority of a buffered message.
///
/// Total order by rank: `High=0 < Medium=1 < Low=2`. Lower rank is flushed
/// first within a batch and drives the shorter inactivity timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Lower rank sorts first; `High=0`, `Medium=1`, `Low=2`.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Opaque client identifier. Equality and hashing are by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single client message. `payload` is opaque; only its serialized size
/// is ever observed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Message {
    #[must_use]
    pub fn new(msg_type: impl Into<String>, priority: Priority, payload: Vec<u8>) -> Self {
        Self {
            msg_type: msg_type.into(),
            priority,
            payload,
        }
    }

    /// Approximate serialized size, used for size statistics and
    /// compression-threshold checks. Bincode is used rather than
    /// `payload.len()` alone so the measurement matches what the
    /// Compressor actually serializes (§4.2).
    #[must_use]
    pub fn approx_size(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(self.payload.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_high_first() {
        let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn client_id_display_roundtrips_string() {
        let id = ClientId::from("client-42");
        assert_eq!(id.to_string(), "client-42");
        assert!(!id.is_empty());
    }
}
