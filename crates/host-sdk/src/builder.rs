//! Builder pattern for constructing a [`HostClient`].

use std::path::PathBuf;
use std::time::Duration;

use crate::client::HostClient;
use crate::queue::DEFAULT_TICK;
use crate::reconnect::ReconnectBackoff;
use crate::types::HostSdkError;

/// Fluent builder for [`HostClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use hl_host_sdk::HostClientBuilder;
/// let client = HostClientBuilder::new()
///     .hub_ws_url("ws://127.0.0.1:6400/v1/hosts/ws")
///     .token("secret")
///     .project_name("demo")
///     .project_path("/work/demo")
///     .host_version(env!("CARGO_PKG_VERSION"))
///     .heartbeat_interval(std::time::Duration::from_secs(15))
///     .build()
///     .unwrap();
/// ```
pub struct HostClientBuilder {
    pub(crate) hub_ws_url: String,
    pub(crate) token: Option<String>,
    pub(crate) project_name: String,
    pub(crate) project_path: Option<PathBuf>,
    pub(crate) host_label: Option<String>,
    pub(crate) host_version: String,
    pub(crate) client_name: Option<String>,
    pub(crate) platform: Option<String>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
    pub(crate) tick_interval: Duration,
    pub(crate) max_request_bytes: usize,
    pub(crate) max_response_bytes: usize,
    pub(crate) host_file: Option<PathBuf>,
}

impl Default for HostClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClientBuilder {
    pub fn new() -> Self {
        Self {
            hub_ws_url: "ws://127.0.0.1:6400/v1/hosts/ws".into(),
            token: None,
            project_name: "unnamed-project".into(),
            project_path: None,
            host_label: None,
            host_version: "0.1.0".into(),
            client_name: None,
            platform: Some(std::env::consts::OS.to_string()),
            heartbeat_interval: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(10),
            reconnect_backoff: ReconnectBackoff::default(),
            tick_interval: DEFAULT_TICK,
            max_request_bytes: 256 * 1024,   // 256 KB
            max_response_bytes: 1024 * 1024, // 1 MB
            host_file: None,
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Set the hub WebSocket URL (e.g. `ws://127.0.0.1:6400/v1/hosts/ws`).
    pub fn hub_ws_url(mut self, url: impl Into<String>) -> Self {
        self.hub_ws_url = url.into();
        self
    }

    /// Set the pre-shared hub token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    // ── Identity / metadata ──────────────────────────────────────────

    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Working directory the host identity is derived from.  Defaults to
    /// the process's current directory.
    pub fn project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Label published in the host file (defaults to the project name).
    pub fn host_label(mut self, label: impl Into<String>) -> Self {
        self.host_label = Some(label.into());
        self
    }

    pub fn host_version(mut self, v: impl Into<String>) -> Self {
        self.host_version = v.into();
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the heartbeat interval (default 15s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    /// How long to wait for `registered` after dialing (default 10s).
    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    /// Override the reconnect schedule.
    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.reconnect_backoff = cfg;
        self
    }

    /// Scheduler tick that drains the execution queue (default 10ms).
    pub fn tick_interval(mut self, d: Duration) -> Self {
        self.tick_interval = d;
        self
    }

    /// Publish this host into the shared host file and answer health probes.
    pub fn host_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_file = Some(path.into());
        self
    }

    // ── Wire limits ──────────────────────────────────────────────────

    /// Maximum inbound message size (default 256 KB).
    pub fn max_request_bytes(mut self, n: usize) -> Self {
        self.max_request_bytes = n;
        self
    }

    /// Maximum serialized result size before truncation (default 1 MB).
    pub fn max_response_bytes(mut self, n: usize) -> Self {
        self.max_response_bytes = n;
        self
    }

    /// Validate and build the [`HostClient`].
    pub fn build(self) -> Result<HostClient, HostSdkError> {
        if !(self.hub_ws_url.starts_with("ws://") || self.hub_ws_url.starts_with("wss://")) {
            return Err(HostSdkError::Config(format!(
                "hub_ws_url must start with ws:// or wss:// (got {})",
                self.hub_ws_url
            )));
        }
        if self.project_name.trim().is_empty() {
            return Err(HostSdkError::Config("project_name must not be empty".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(HostSdkError::Config("heartbeat_interval must be non-zero".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(HostSdkError::Config("tick_interval must be non-zero".into()));
        }
        if self.reconnect_backoff.delays.is_empty() {
            return Err(HostSdkError::Config("reconnect_backoff needs at least one delay".into()));
        }

        let dir = match self.project_path {
            Some(p) => p,
            None => std::env::current_dir()
                .map_err(|e| HostSdkError::Config(format!("resolving current dir: {e}")))?,
        };
        let canonical = dir.canonicalize().unwrap_or(dir);
        let host_path = canonical.to_string_lossy().into_owned();
        let identity_hash = hl_domain::identity::host_identity_hash(&host_path);

        Ok(HostClient {
            hub_ws_url: self.hub_ws_url,
            token: self.token,
            host_label: self.host_label.unwrap_or_else(|| self.project_name.clone()),
            project_name: self.project_name,
            host_path,
            identity_hash,
            host_version: self.host_version,
            client_name: self.client_name,
            platform: self.platform,
            heartbeat_interval: self.heartbeat_interval,
            handshake_timeout: self.handshake_timeout,
            reconnect_backoff: self.reconnect_backoff,
            tick_interval: self.tick_interval,
            max_request_bytes: self.max_request_bytes,
            max_response_bytes: self.max_response_bytes,
            host_file: self.host_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_ws_url() {
        let err = HostClientBuilder::new()
            .hub_ws_url("http://localhost:6400")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, HostSdkError::Config(_)));
    }

    #[test]
    fn identity_follows_project_path() {
        let a = HostClientBuilder::new()
            .project_path("/nonexistent/hostlink/a")
            .build()
            .unwrap();
        let b = HostClientBuilder::new()
            .project_path("/nonexistent/hostlink/a")
            .build()
            .unwrap();
        let c = HostClientBuilder::new()
            .project_path("/nonexistent/hostlink/c")
            .build()
            .unwrap();
        assert_eq!(a.identity_hash(), b.identity_hash());
        assert_ne!(a.identity_hash(), c.identity_hash());
        assert_eq!(
            a.identity_hash(),
            hl_domain::identity::host_identity_hash("/nonexistent/hostlink/a")
        );
    }

    #[test]
    fn label_defaults_to_project_name() {
        let client = HostClientBuilder::new()
            .project_name("demo")
            .project_path("/nonexistent/demo")
            .build()
            .unwrap();
        assert_eq!(client.host_label, "demo");
    }
}
