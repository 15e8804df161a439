// Configuration parsing tests

use lanledger::config;
use lanledger::SyncSettings;
use std::time::Duration;

#[test]
fn shipped_config_parses_with_reference_values() {
    let cfg = config::load_from_str(include_str!("../config.toml")).expect("shipped config");
    assert_eq!(cfg.net.listen_port, 8888);
    assert_eq!(cfg.net.seeds.len(), 3);
    assert_eq!(cfg.peers.discovery_interval_secs, 30);
    assert_eq!(cfg.peers.health_interval_secs, 15);
    assert_eq!(cfg.peers.staleness_secs, 60);
    assert!(cfg.ledger.apply_remote_balances);
    assert!(!cfg.metrics.enabled);
}

#[test]
fn minimal_config_fills_defaults() {
    let cfg = config::load_from_str(
        r#"[net]
[storage]
path = "/tmp/ledger"
"#,
    )
    .expect("minimal config");
    assert_eq!(cfg.node.username, "anonymous");
    assert!(cfg.node.peer_id.is_none());
    assert_eq!(cfg.net.bind, "0.0.0.0");
    assert_eq!(cfg.net.send_timeout_ms, 5_000);
    assert_eq!(cfg.crypto.key_file, "network.key");
    assert!(cfg.crypto.shared_key_hex.is_none());

    let settings = SyncSettings::from_config(&cfg, "peer-1");
    assert_eq!(settings.peer_id, "peer-1");
    assert_eq!(settings.bind, "0.0.0.0:8888");
    assert_eq!(settings.staleness, Duration::from_secs(60));
    assert_eq!(settings.send_timeout, Duration::from_secs(5));
}

#[test]
fn bad_config_is_reported() {
    assert!(config::load_from_str("[net\nlisten_port = 1").is_err());
    assert!(config::load_from_str("[net]\nlisten_port = \"eighty\"\n[storage]\npath = \"x\"").is_err());
    assert!(config::load("/definitely/not/here.toml").is_err());
}
