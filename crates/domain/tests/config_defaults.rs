use hl_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_dispatch_limits() {
    let config = Config::default();
    assert_eq!(config.commands.timeout_secs, 30);
    assert_eq!(config.commands.grace_period_ms, 10_000);
    assert_eq!(config.rate_limit.window_ms, 1_000);
    assert_eq!(config.rate_limit.max_commands, 50);
    assert_eq!(config.heartbeat.keep_alive_secs, 15);
}

#[test]
fn default_registry_timings() {
    let config = Config::default();
    assert!(config.registry.enabled);
    assert_eq!(config.registry.health_interval_secs, 5);
    assert_eq!(config.registry.stale_after_secs, 30);
    assert_eq!(config.registry.retry_max_attempts, 5);
    assert!(config.registry.resolved_path().ends_with("hosts.json"));
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let toml_str = r#"
[server]
port = 7100

[rate_limit]
max_commands = 5
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 7100);
    assert_eq!(config.server.port_attempts, 10);
    assert_eq!(config.rate_limit.max_commands, 5);
    assert_eq!(config.rate_limit.window_ms, 1_000);
}

#[test]
fn explicit_registry_path_parses() {
    let toml_str = r#"
[registry]
path = "/var/lib/hostlink/hosts.json"
enabled = false
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(!config.registry.enabled);
    assert_eq!(
        config.registry.resolved_path(),
        std::path::PathBuf::from("/var/lib/hostlink/hosts.json")
    );
}

#[test]
fn empty_config_is_valid() {
    let config: Config = toml::from_str("").unwrap();
    assert!(config.validate().is_empty());
}
