use std::collections::BTreeSet;
use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use super::{load_config_from, Settings};

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.relay.queue_size, 1000);
    assert!(settings.relay.input_groups.is_none());
    assert_eq!(settings.sender.interval_ms, 2000);
    assert!(!settings.sender.enabled);
    assert_eq!(settings.bridge.poll_timeout_ms, 5000);
    assert_eq!(settings.bridge.group_id, "relaysub-bridge");
    assert_eq!(settings.scheduler.pool_size, 1);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent");
    let settings = load_config_from(path.to_str().unwrap()).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    fs::write(
        &path,
        r#"
[relay]
input_groups = ["Blue"]
output_groups = ["Green", "Yellow"]
queue_size = 2

[bridge]
url = "ws://127.0.0.1:9000"
consumer_topic = "tak-in"
producer_topic = "tak-out"
"#,
    )
    .unwrap();

    let settings = load_config_from(path.to_str().unwrap()).unwrap();
    assert_eq!(settings.relay.input_groups, Some(set(&["Blue"])));
    assert_eq!(settings.relay.output_groups, Some(set(&["Green", "Yellow"])));
    assert_eq!(settings.relay.queue_size, 2);
    assert_eq!(settings.bridge.url.as_deref(), Some("ws://127.0.0.1:9000"));
    assert_eq!(settings.bridge.consumer_topic.as_deref(), Some("tak-in"));
    // untouched sections keep their defaults
    assert_eq!(settings.bridge.poll_timeout_ms, 5000);
    assert_eq!(settings.server.port, 8080);
}

#[test]
#[serial]
fn env_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    fs::write(&path, "[relay]\nqueue_size = 2\n").unwrap();

    temp_env::with_vars(
        [
            ("RELAYSUB_RELAY__QUEUE_SIZE", Some("50")),
            ("RELAYSUB_RELAY__INPUT_GROUPS", Some("Blue,Red")),
            ("RELAYSUB_SERVER__PORT", Some("9191")),
            ("RELAYSUB_SENDER__ENABLED", Some("true")),
        ],
        || {
            let settings = load_config_from(path.to_str().unwrap()).unwrap();
            assert_eq!(settings.relay.queue_size, 50);
            assert_eq!(settings.relay.input_groups, Some(set(&["Blue", "Red"])));
            assert_eq!(settings.server.port, 9191);
            assert!(settings.sender.enabled);
        },
    );
}
