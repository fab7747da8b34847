use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Per-command deadline, measured from send time.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    /// How long an untargeted command waits for a first session to appear.
    /// `0` fails immediately with NOT_CONNECTED.
    #[serde(default = "d_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Maximum in-flight commands per session (`0` = unlimited).
    #[serde(default)]
    pub max_pending_per_session: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_timeout_secs(),
            grace_period_ms: d_grace_period_ms(),
            max_pending_per_session: 0,
        }
    }
}

impl CommandsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Per-session fixed-window rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_window_ms")]
    pub window_ms: u64,
    #[serde(default = "d_max_commands")]
    pub max_commands: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: d_window_ms(),
            max_commands: d_max_commands(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn d_timeout_secs() -> u64 {
    30
}
fn d_grace_period_ms() -> u64 {
    10_000
}
fn d_window_ms() -> u64 {
    1_000
}
fn d_max_commands() -> u32 {
    50
}
