use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Watch the shared host file and health-check its entries.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Location of the shared host file.  `None` resolves to
    /// [`default_registry_path`].
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "d_health_interval_secs")]
    pub health_interval_secs: u64,
    /// An entry unreachable for this long is stale even if still listed.
    #[serde(default = "d_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "d_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Re-probe attempts (1s, 2s, 4s, ...) after a connected entry drops.
    #[serde(default = "d_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            health_interval_secs: d_health_interval_secs(),
            stale_after_secs: d_stale_after_secs(),
            probe_timeout_ms: d_probe_timeout_ms(),
            retry_max_attempts: d_retry_max_attempts(),
        }
    }
}

impl RegistryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_registry_path)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// `<data dir>/hostlink/hosts.json`, falling back to the temp dir when the
/// platform has no data dir.
pub fn default_registry_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("hostlink")
        .join("hosts.json")
}

fn d_true() -> bool {
    true
}
fn d_health_interval_secs() -> u64 {
    5
}
fn d_stale_after_secs() -> u64 {
    30
}
fn d_probe_timeout_ms() -> u64 {
    1_000
}
fn d_retry_max_attempts() -> u32 {
    5
}
