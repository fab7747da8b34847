//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Instant;

use hl_domain::config::{Config, ConfigSeverity};
use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::hosts::health::TcpHealthProbe;
use crate::hosts::{HostRegistry, RegistrySettings};
use crate::sessions::{HubSettings, SessionHub};
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>, shutdown: CancellationToken) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Session hub ──────────────────────────────────────────────────
    let settings = HubSettings::from_config(&config);
    tracing::info!(
        command_timeout_ms = settings.command_timeout.as_millis() as u64,
        grace_period_ms = settings.grace_period.as_millis() as u64,
        rate_window_ms = settings.rate_window.as_millis() as u64,
        rate_max = settings.rate_max,
        "session hub ready"
    );
    let hub = Arc::new(SessionHub::new(settings));

    // ── Host registry ────────────────────────────────────────────────
    let hosts = if config.registry.enabled {
        let path = config.registry.resolved_path();
        tracing::info!(path = %path.display(), "host registry enabled");
        Some(Arc::new(HostRegistry::new(
            path,
            RegistrySettings::from_config(&config.registry),
            Arc::new(TcpHealthProbe::new(config.registry.probe_timeout())),
        )))
    } else {
        tracing::info!("host registry disabled");
        None
    };

    let bridge = Arc::new(Bridge::new(hub.clone(), hosts.clone()));

    // ── Token ────────────────────────────────────────────────────────
    let token = read_token(&config.server.token_env);
    if token.is_none() {
        tracing::warn!(
            env = %config.server.token_env,
            "no host token configured, accepting unauthenticated connections"
        );
    }

    Ok(AppState {
        config,
        hub,
        bridge,
        hosts,
        token,
        started_at: Instant::now(),
        shutdown,
    })
}

/// Start the host registry loop.  It stops with `state.shutdown`.
pub fn spawn_background_tasks(state: &AppState) {
    if let Some(hosts) = state.hosts.clone() {
        let shutdown = state.shutdown.clone();
        tokio::spawn(hosts.run(shutdown));
    }
}

fn read_token(env: &str) -> Option<Arc<str>> {
    std::env::var(env)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(Arc::from)
}
