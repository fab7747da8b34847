//! `hostlink-hub hosts`: one probe round over the registry file.

use std::sync::Arc;

use hl_domain::config::Config;

use crate::hosts::health::TcpHealthProbe;
use crate::hosts::{HostRegistry, HostStatus, RegistrySettings};

pub async fn run(config: &Config, json: bool) -> anyhow::Result<()> {
    let path = config.registry.resolved_path();
    let registry = HostRegistry::new(
        path.clone(),
        RegistrySettings::from_config(&config.registry),
        Arc::new(TcpHealthProbe::new(config.registry.probe_timeout())),
    );
    if !registry.reload() {
        anyhow::bail!("{} could not be parsed", path.display());
    }
    registry.probe_round(true).await;
    let snapshot = registry.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if snapshot.entries.is_empty() {
        println!("No hosts in {}", path.display());
        return Ok(());
    }

    println!(
        "{:<2} {:<13} {:<20} {:<22} {:>7}  PATH",
        "", "STATUS", "LABEL", "ENDPOINT", "PID"
    );
    for entry in &snapshot.entries {
        let marker = if snapshot.active.as_deref() == Some(entry.record.host_path.as_str()) {
            "*"
        } else {
            ""
        };
        let status = match entry.status {
            HostStatus::Connected => "connected",
            HostStatus::Disconnected => "disconnected",
            HostStatus::Unknown => "unknown",
        };
        println!(
            "{:<2} {:<13} {:<20} {:<22} {:>7}  {}",
            marker,
            status,
            entry.record.host_label,
            entry.record.advertised_endpoint,
            entry.record.pid,
            entry.record.host_path,
        );
    }
    Ok(())
}
