//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a config file: defaults,
//! derived values and the errors reported for invalid input.

use std::io::Write;
use std::time::Duration;
use system2mqtt::config::{ConfigError, S2mConfig};
use system2mqtt::transport::mqtt::{ConnectionConfig, LivenessConfig};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_minimal_config_gets_defaults() {
    let file = write_config(
        r#"
[host]
name = "host1"

[mqtt]
broker_url = "mqtt://broker.local:1883"
"#,
    );

    let config = S2mConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.computer_name(), "host1");
    assert_eq!(config.base_topic(), "system2mqtt/host1");
    assert_eq!(config.publish.interval_secs, 60);
    assert!(!config.discovery.enabled);
    assert_eq!(config.discovery.prefix, "homeassistant");
    assert!(config.storage.include.is_empty());
    assert!(!config.hardware.any_enabled());
    assert!(!config.is_hypervisor_mode());
}

#[test]
fn test_full_config_loads() {
    let file = write_config(
        r#"
[host]
name = "pve1"

[mqtt]
broker_url = "mqtts://broker.local"
username_env = "S2M_TEST_UNSET_USER"
base_topic = "s2m/pve1/"
keep_alive_secs = 30
reconnect_min_delay_secs = 2
reconnect_max_delay_secs = 60

[publish]
interval_secs = 15

[discovery]
enabled = true
prefix = "ha"

[storage]
include = ["sysroot", "/srv/data"]
exclude = ["data"]

[hardware]
fan = true
disk_temperatures = true

[hypervisor]
node = "pve1"
verify_tls = true
"#,
    );

    let config = S2mConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.base_topic(), "s2m/pve1");
    assert_eq!(config.publish.interval_secs, 15);
    assert!(config.discovery.enabled);
    assert_eq!(config.discovery.prefix, "ha");
    assert_eq!(config.storage.include, vec!["sysroot", "/srv/data"]);
    assert!(config.hardware.any_enabled());
    assert!(config.is_hypervisor_mode());

    let hypervisor = config.hypervisor.as_ref().unwrap();
    assert_eq!(hypervisor.url, "https://localhost:8006");
    assert_eq!(hypervisor.username, "root@pam");
    assert!(hypervisor.verify_tls);
    assert_eq!(config.get_hypervisor_password().unwrap(), None);

    // The username env var is not set: no credentials are sent
    assert_eq!(config.get_mqtt_username(), None);
}

#[test]
fn test_connection_config_from_file() {
    let file = write_config(
        r#"
[host]
name = "host1"

[mqtt]
broker_url = "mqtts://broker.local"
reconnect_min_delay_secs = 2
reconnect_max_delay_secs = 30
"#,
    );
    let config = S2mConfig::load_from_file(file.path()).unwrap();

    let connection = ConnectionConfig::from_config(&config).unwrap();
    assert_eq!(connection.host, "broker.local");
    assert_eq!(connection.port, 8883);
    assert!(connection.use_tls);
    assert!(connection.client_id.starts_with("s2m-host1-"));
    assert_eq!(connection.reconnect.min_delay, Duration::from_secs(2));
    assert_eq!(connection.reconnect.max_delay, Duration::from_secs(30));

    let liveness = LivenessConfig::for_base(&config.base_topic());
    assert_eq!(liveness.topic, "system2mqtt/host1/LWT");
    assert_eq!(liveness.online, "online");
    assert_eq!(liveness.offline, "offline");
    assert!(liveness.retain);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = S2mConfig::load_from_file(std::path::Path::new("/nonexistent/s2m.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let file = write_config("[mqtt\nbroker_url = ");
    let result = S2mConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_mqtt_section_is_parse_error() {
    let file = write_config("[host]\nname = \"host1\"\n");
    let result = S2mConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        (
            "zero interval",
            "[mqtt]\nbroker_url = \"mqtt://b\"\n[publish]\ninterval_secs = 0\n",
        ),
        (
            "inverted backoff",
            concat!(
                "[mqtt]\nbroker_url = \"mqtt://b\"\n",
                "reconnect_min_delay_secs = 10\nreconnect_max_delay_secs = 5\n",
            ),
        ),
        ("http broker", "[mqtt]\nbroker_url = \"http://b\"\n"),
        (
            "wildcard base topic",
            "[mqtt]\nbroker_url = \"mqtt://b\"\nbase_topic = \"s2m/#\"\n",
        ),
    ];

    for (name, content) in cases {
        let result = S2mConfig::from_toml(content);
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "{name}: expected InvalidConfig, got {result:?}"
        );
    }
}

#[test]
fn test_invalid_host_name_is_rejected() {
    let result =
        S2mConfig::from_toml("[host]\nname = \"my host\"\n[mqtt]\nbroker_url = \"mqtt://b\"\n");
    assert!(matches!(result, Err(ConfigError::InvalidHostName(_))));
}

#[test]
fn test_required_hypervisor_password_must_be_set() {
    let config = S2mConfig::from_toml(
        r#"
[mqtt]
broker_url = "mqtt://b"

[hypervisor]
password_env = "S2M_TEST_UNSET_PVE_PASSWORD"
"#,
    )
    .unwrap();

    assert!(matches!(
        config.get_hypervisor_password(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "S2M_TEST_UNSET_PVE_PASSWORD"
    ));
}

#[test]
fn test_config_round_trips_through_show_output() {
    let config = S2mConfig::from_toml(
        concat!(
            "[host]\nname = \"host1\"\n",
            "[mqtt]\nbroker_url = \"mqtt://b\"\npassword_env = \"MQTT_PASSWORD\"\n",
        ),
    )
    .unwrap();

    let shown = toml::to_string_pretty(&config).unwrap();
    assert!(shown.contains("password_env = \"MQTT_PASSWORD\""));
    assert_eq!(S2mConfig::from_toml(&shown).unwrap(), config);
}
