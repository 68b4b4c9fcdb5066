//! Integration tests for configuration loading

use parking_gateway::domain::types::SlotId;
use parking_gateway::infra::{Config, TransportKind};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "north-lot"

[slots]
ids = [1, 2, 3, 4]
closed_log_capacity = 20

[sensors]
poll_interval_ms = 50
entry_distance_cm = 20.0
detect_hits = 4
miss_hits = 12

[occupancy]
exit_grace_ms = 1500
fee_per_min = 0.25

[gate]
open_pulse_us = 2000
close_pulse_us = 1000

[dashboard]
ports = [9090]
bind_attempts = 2

[notify]
transport = "telegram"
recipients = ["-1001234"]
notify_slot_free = true
startup_message = "gateway online"

[telegram]
bot_token = "123:abc"

[hardware]
range_path = "/tmp/distance"

[hardware.presence_paths]
1 = "/tmp/bay1"
4 = "/tmp/bay4"

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "north-lot");
    assert_eq!(config.slot_ids(), &[SlotId(1), SlotId(2), SlotId(3), SlotId(4)]);
    assert_eq!(config.closed_log_capacity(), 20);
    assert_eq!(config.poll_interval_ms(), 50);
    assert_eq!(config.entry_distance_cm(), 20.0);
    assert_eq!(config.detect_hits(), 4);
    assert_eq!(config.miss_hits(), 12);
    assert_eq!(config.exit_grace_ms(), 1500);
    assert_eq!(config.fee_per_min(), 0.25);
    assert_eq!(config.open_pulse_us(), 2000);
    assert_eq!(config.close_pulse_us(), 1000);
    assert_eq!(config.dashboard_ports(), &[9090]);
    assert_eq!(config.dashboard_bind_attempts(), 2);
    assert_eq!(config.notify_transport(), TransportKind::Telegram);
    assert_eq!(config.notify_recipients(), &["-1001234".to_string()]);
    assert!(config.notify_on_entry());
    assert!(config.notify_slot_free());
    assert_eq!(config.startup_message(), Some("gateway online"));
    assert_eq!(config.telegram_bot_token(), "123:abc");
    assert_eq!(config.range_path(), "/tmp/distance");
    assert_eq!(config.presence_paths().len(), 2);
    assert_eq!(config.metrics_interval_secs(), 15);
    // Untouched sections keep their defaults
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.display_columns(), 16);
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[sensors]\ndetect_hits = 0\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("detect_hits"));
}

#[test]
fn test_unknown_transport_fails_to_parse() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[notify]\ntransport = \"carrier-pigeon\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.slot_ids(), &[SlotId(1), SlotId(2), SlotId(3)]);
    assert_eq!(config.exit_grace_ms(), 1000);
    assert_eq!(config.notify_transport(), TransportKind::Log);
    assert_eq!(config.config_file(), "default");
}
