mod commands;
mod observability;
mod registry;
mod server;

pub use commands::*;
pub use observability::*;
pub use registry::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const ENV_PORT: &str = "HOSTLINK_PORT";
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "HOSTLINK_COMMAND_TIMEOUT_SECS";
pub const ENV_GRACE_PERIOD_MS: &str = "HOSTLINK_GRACE_PERIOD_MS";
pub const ENV_RATE_LIMIT_WINDOW_MS: &str = "HOSTLINK_RATE_LIMIT_WINDOW_MS";
pub const ENV_RATE_LIMIT_MAX: &str = "HOSTLINK_RATE_LIMIT_MAX";
pub const ENV_REGISTRY_PATH: &str = "HOSTLINK_REGISTRY_PATH";

impl Config {
    /// Apply `HOSTLINK_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.  Values that fail to parse
    /// are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_override(&lookup, ENV_PORT) {
            self.server.port = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_COMMAND_TIMEOUT_SECS) {
            self.commands.timeout_secs = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_GRACE_PERIOD_MS) {
            self.commands.grace_period_ms = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_RATE_LIMIT_WINDOW_MS) {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_RATE_LIMIT_MAX) {
            self.rate_limit.max_commands = v;
        }
        if let Some(path) = lookup(ENV_REGISTRY_PATH).filter(|p| !p.trim().is_empty()) {
            self.registry.path = Some(path.into());
        }
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if self.server.port_attempts == 0 {
            error("server.port_attempts", "at least one bind attempt is required");
        }
        if self.commands.timeout_secs == 0 {
            error("commands.timeout_secs", "timeout must be greater than 0");
        }
        if self.rate_limit.window_ms == 0 {
            error("rate_limit.window_ms", "window must be greater than 0");
        }
        if self.rate_limit.max_commands == 0 {
            error("rate_limit.max_commands", "max_commands must be greater than 0");
        }
        if self.heartbeat.keep_alive_secs == 0 {
            error("heartbeat.keep_alive_secs", "keep-alive interval must be greater than 0");
        }
        if self.registry.enabled && self.registry.health_interval_secs == 0 {
            error(
                "registry.health_interval_secs",
                "health interval must be greater than 0",
            );
        }

        if self.commands.grace_period_ms > self.commands.timeout_secs.saturating_mul(1000) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "commands.grace_period_ms".into(),
                message: "grace period exceeds the command timeout".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_validate_clean() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn overrides_apply() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            (ENV_PORT, "7000"),
            (ENV_COMMAND_TIMEOUT_SECS, "5"),
            (ENV_RATE_LIMIT_WINDOW_MS, "250"),
            (ENV_RATE_LIMIT_MAX, "3"),
            (ENV_GRACE_PERIOD_MS, "0"),
            (ENV_REGISTRY_PATH, "/tmp/hosts.json"),
        ]));
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.commands.timeout_secs, 5);
        assert_eq!(config.commands.grace_period_ms, 0);
        assert_eq!(config.rate_limit.window_ms, 250);
        assert_eq!(config.rate_limit.max_commands, 3);
        assert_eq!(
            config.registry.path.as_deref(),
            Some(std::path::Path::new("/tmp/hosts.json"))
        );
    }

    #[test]
    fn bad_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[(ENV_PORT, "not-a-port")]));
        assert_eq!(config.server.port, ServerConfig::default().port);
    }

    #[test]
    fn zero_rate_limit_is_an_error() {
        let mut config = Config::default();
        config.rate_limit.max_commands = 0;
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Error);
        assert_eq!(issues[0].field, "rate_limit.max_commands");
    }

    #[test]
    fn long_grace_period_warns() {
        let mut config = Config::default();
        config.commands.timeout_secs = 5;
        config.commands.grace_period_ms = 10_000;
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    }
}
