//! Reference "hello-world" host for hostlink.
//!
//! Dials the hub, registers under the identity of the current directory and
//! serves three commands:
//!
//! - `ping`        — built in; pong with timestamp
//! - `hello.echo`  — echo the params back
//! - `hello.sleep` — sleep `{"ms": N}` milliseconds, honoring cancellation
//!
//! Usage:
//!   HOSTLINK_TOKEN=secret hl-hello-host ws://127.0.0.1:6400/v1/hosts/ws
//!
//! Env vars:
//!   HOSTLINK_HUB_URL        — hub socket URL (overridden by the first argument)
//!   HOSTLINK_TOKEN          — auth token (must match the hub)
//!   HOSTLINK_PROJECT        — project name (default: current directory name)
//!   HOSTLINK_REGISTRY_PATH  — shared host file to publish into

use std::time::Duration;

use hl_host_sdk::{
    CommandContext, CommandError, CommandHandler, CommandRegistry, CommandResult,
    HostClientBuilder,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

/// Longest sleep `hello.sleep` accepts.
const MAX_SLEEP_MS: u64 = 60_000;

struct Echo;

#[async_trait::async_trait]
impl CommandHandler for Echo {
    async fn call(&self, _ctx: CommandContext, params: Value) -> CommandResult {
        Ok(json!({ "echo": params }))
    }
}

struct Sleep;

#[async_trait::async_trait]
impl CommandHandler for Sleep {
    async fn call(&self, ctx: CommandContext, params: Value) -> CommandResult {
        let ms = params
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| CommandError::InvalidParams("`ms` must be a non-negative integer".into()))?;
        if ms > MAX_SLEEP_MS {
            return Err(CommandError::InvalidParams(format!(
                "`ms` must be at most {MAX_SLEEP_MS}"
            )));
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({ "slept_ms": ms })),
            _ = ctx.cancel.cancelled() => Err(CommandError::Cancelled("sleep interrupted".into())),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let hub_url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HOSTLINK_HUB_URL").ok())
        .unwrap_or_else(|| "ws://127.0.0.1:6400/v1/hosts/ws".into());

    let cwd = std::env::current_dir()?;
    let project = std::env::var("HOSTLINK_PROJECT").unwrap_or_else(|_| {
        cwd.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hello-host".into())
    });
    let host_file = std::env::var("HOSTLINK_REGISTRY_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| hl_domain::config::default_registry_path());

    let mut builder = HostClientBuilder::new()
        .hub_ws_url(hub_url.clone())
        .project_name(project.clone())
        .project_path(cwd)
        .host_version(env!("CARGO_PKG_VERSION"))
        .client_name("hl-hello-host")
        .host_file(host_file);
    if let Ok(token) = std::env::var("HOSTLINK_TOKEN") {
        if !token.is_empty() {
            builder = builder.token(token);
        }
    }
    let client = builder.build()?;

    let mut registry = CommandRegistry::with_defaults();
    registry.declare("hello.echo", "Echo the params back", None, Echo);
    registry.declare(
        "hello.sleep",
        "Sleep for `ms` milliseconds",
        Some(json!({
            "type": "object",
            "properties": { "ms": { "type": "integer", "minimum": 0 } },
            "required": ["ms"],
        })),
        Sleep,
    );

    tracing::info!(
        hub = %hub_url,
        project = %project,
        identity = %client.identity_hash(),
        "starting hello host"
    );
    let handle = client.spawn(registry);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown().await?;
    Ok(())
}
