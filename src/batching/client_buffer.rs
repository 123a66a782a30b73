//! Per-client buffer state (spec §3 `ClientBuffer`).

use super::message::{Message, Priority};
use std::time::Instant;
use tokio::task::AbortHandle;

/// A client's in-flight message buffer plus its (at most one) pending
/// inactivity timer. A `ClientState` exists in the engine's map iff the
/// client has at least one buffered message and no flush has completed
/// since (invariant I1/§3 invariant 1).
///
/// `highest_priority`/`timer_deadline` track the armed timer's absolute
/// fire instant and the priority class that set it, so a later arrival
/// whose priority does not raise the buffer's urgency never pushes the
/// deadline out (spec §4.1.2: "lower-priority arrivals do not extend an
/// earlier higher-priority deadline").
pub(super) struct ClientState {
    pub messages: Vec<Message>,
    pub batch_start_time: Instant,
    pub highest_priority: Priority,
    pub timer_deadline: Option<Instant>,
    pub timer_handle: Option<AbortHandle>,
    pub timer_generation: u64,
}

impl ClientState {
    pub(super) fn new(now: Instant) -> Self {
        Self {
            messages: Vec::new(),
            batch_start_time: now,
            highest_priority: Priority::Low,
            timer_deadline: None,
            timer_handle: None,
            timer_generation: 0,
        }
    }
}
