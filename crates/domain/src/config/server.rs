use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// How many consecutive ports (starting at `port`) to try before giving
    /// up on the inbound listener.
    #[serde(default = "d_port_attempts")]
    pub port_attempts: u16,
    /// Environment variable holding the pre-shared host token.
    /// If the env var is unset, hosts connect without authentication.
    #[serde(default = "d_token_env")]
    pub token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            port_attempts: d_port_attempts(),
            token_env: d_token_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval hosts are told to ping at (advisory, sent in `welcome`).
    #[serde(default = "d_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Advisory server-side timeout, sent in `welcome`.
    #[serde(default = "d_server_timeout_secs")]
    pub server_timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: d_keep_alive_secs(),
            server_timeout_secs: d_server_timeout_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    6400
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port_attempts() -> u16 {
    10
}
fn d_token_env() -> String {
    "HOSTLINK_TOKEN".into()
}
fn d_keep_alive_secs() -> u64 {
    15
}
fn d_server_timeout_secs() -> u64 {
    30
}
