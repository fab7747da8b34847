//! Diagnostic stream of Session Hub transitions.
//!
//! Events are published on a broadcast channel.  Nothing in the hub waits
//! on subscribers: a lagging or absent receiver only loses events.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    Registered {
        session_id: String,
        identity_hash: String,
        project_name: String,
    },
    Superseded {
        session_id: String,
        replaced_by: String,
        identity_hash: String,
        failed_pending: usize,
    },
    CapabilitiesDeclared {
        session_id: String,
        count: usize,
    },
    CommandSent {
        session_id: String,
        correlation_id: String,
        method: String,
    },
    CommandResolved {
        session_id: String,
        correlation_id: String,
        method: String,
        ok: bool,
        elapsed_ms: u64,
    },
    CommandTimedOut {
        session_id: String,
        correlation_id: String,
        method: String,
        elapsed_ms: u64,
    },
    Disconnected {
        session_id: String,
        failed_pending: usize,
    },
}

/// Capacity of the event channel; slow subscribers see `Lagged`.
pub const EVENT_CAPACITY: usize = 256;
