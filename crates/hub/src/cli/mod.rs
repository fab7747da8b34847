pub mod config;
pub mod hosts;

use clap::{Parser, Subcommand};

use hl_domain::config::Config;

/// hostlink hub: drives remote hosts over host-initiated WebSockets.
#[derive(Debug, Parser)]
#[command(name = "hostlink-hub", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the hub (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the host registry file with live probe status.
    Hosts {
        /// Output JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `HOSTLINK_CONFIG` (or
/// `hostlink.toml` by default), then apply `HOSTLINK_*` overrides.
/// A missing file means defaults.  Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path =
        std::env::var("HOSTLINK_CONFIG").unwrap_or_else(|_| "hostlink.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };
    config.apply_env_overrides();

    Ok((config, config_path))
}
