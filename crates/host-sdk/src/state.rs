//! Connection lifecycle state machine.
//!
//! ```text
//! Disconnected ──begin_connect──▶ Connecting ──on_connected──▶ Connected
//!      ▲                              │                            │
//!      └──────── on_dial_failed ──────┘                            │
//!      └──────────────────────── on_closed ────────────────────────┘
//!
//! any ──tear_down──▶ TornDown ──resume──▶ Disconnected
//! ```
//!
//! The machine is pure: it never sleeps or dials.  The client loop asks it
//! what to do next.

use std::time::Duration;

use serde::Serialize;

use crate::reconnect::ReconnectBackoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Proactively closed ahead of a host lifecycle event; no reconnects
    /// until resumed.
    TornDown,
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    consecutive_failures: u32,
    backoff: ReconnectBackoff,
}

impl ConnectionStateMachine {
    pub fn new(backoff: ReconnectBackoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Start a dial.  Returns `false` (no-op) unless currently
    /// `Disconnected`.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// The dial and registration handshake succeeded.
    pub fn on_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
            self.consecutive_failures = 0;
        }
    }

    /// The dial failed.  Returns the delay before the next attempt.
    pub fn on_dial_failed(&mut self) -> Duration {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
        let delay = self.backoff.delay_for_attempt(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.backoff.is_exhausted(self.consecutive_failures)
            && !self.backoff.is_exhausted(self.consecutive_failures - 1)
        {
            tracing::warn!(
                failures = self.consecutive_failures,
                delay_ms = delay.as_millis() as u64,
                "reconnect schedule exhausted, retrying at the final delay"
            );
        }
        delay
    }

    /// A live connection dropped unexpectedly.  The failure count starts
    /// over so the next dial happens right away.
    pub fn on_closed(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            self.consecutive_failures = 0;
        }
    }

    /// The hub replaced this connection with a newer one for the same host.
    /// Counted as a failure so two hosts sharing an identity do not evict
    /// each other in a tight loop.
    pub fn on_superseded(&mut self) -> Duration {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Connecting;
        }
        self.on_dial_failed()
    }

    /// Enter `TornDown` from any state.
    pub fn tear_down(&mut self) {
        self.state = ConnectionState::TornDown;
    }

    /// Leave `TornDown`.  Returns `false` if not torn down.
    pub fn resume(&mut self) -> bool {
        if self.state != ConnectionState::TornDown {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        self.consecutive_failures = 0;
        true
    }
}
