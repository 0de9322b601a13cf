//! Configuration system for system2mqtt
//!
//! The configuration is read once at startup from a TOML file and resolved
//! into immutable values that are handed to the components that need them.
//! Secrets are never stored in the file: credentials are referenced by the
//! name of the environment variable that holds them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct S2mConfig {
    #[serde(default)]
    pub host: HostSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub hardware: HardwareSection,
    /// Proxmox VE hypervisor mode (optional, presence enables it)
    pub hypervisor: Option<HypervisorSection>,
}

/// Host identity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// Computer name used in topics and discovery ids (defaults to the OS hostname)
    pub name: Option<String>,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port (`mqtt://` or `mqtts://`)
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Root of every topic we publish (default: `system2mqtt/<name>`)
    pub base_topic: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_min_delay")]
    pub reconnect_min_delay_secs: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_min_delay() -> u64 {
    1
}

fn default_reconnect_max_delay() -> u64 {
    120
}

/// Publish loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Seconds between publish cycles, also the fallback for bad period payloads
    #[serde(default = "default_publish_interval")]
    pub interval_secs: u64,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            interval_secs: default_publish_interval(),
        }
    }
}

fn default_publish_interval() -> u64 {
    60
}

/// Home Assistant discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: default_discovery_prefix(),
        }
    }
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

/// Storage filters, matched against mount labels or mountpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Hardware specific metrics (fan controller, SMART disk temperatures)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareSection {
    #[serde(default)]
    pub fan: bool,
    #[serde(default = "default_fan_device")]
    pub fan_device: PathBuf,
    #[serde(default)]
    pub disk_temperatures: bool,
    #[serde(default = "default_smartctl_path")]
    pub smartctl_path: PathBuf,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            fan: false,
            fan_device: default_fan_device(),
            disk_temperatures: false,
            smartctl_path: default_smartctl_path(),
        }
    }
}

impl HardwareSection {
    pub fn any_enabled(&self) -> bool {
        self.fan || self.disk_temperatures
    }
}

fn default_fan_device() -> PathBuf {
    PathBuf::from("/sys/class/thermal/cooling_device0")
}

fn default_smartctl_path() -> PathBuf {
    PathBuf::from("/usr/sbin/smartctl")
}

/// Proxmox VE node polled over its HTTP API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HypervisorSection {
    #[serde(default = "default_hypervisor_url")]
    pub url: String,
    #[serde(default = "default_hypervisor_node")]
    pub node: String,
    #[serde(default = "default_hypervisor_user")]
    pub username: String,
    /// Environment variable containing the API password
    pub password_env: Option<String>,
    #[serde(default)]
    pub verify_tls: bool,
}

fn default_hypervisor_url() -> String {
    "https://localhost:8006".to_string()
}

fn default_hypervisor_node() -> String {
    "pve".to_string()
}

fn default_hypervisor_user() -> String {
    "root@pam".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid host name: {0}")]
    InvalidHostName(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl S2mConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: S2mConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.host.name {
            validate_host_name(name)?;
        }

        if self.publish.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.reconnect_min_delay_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect_min_delay_secs must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.reconnect_min_delay_secs > self.mqtt.reconnect_max_delay_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.reconnect_min_delay_secs ({}) exceeds mqtt.reconnect_max_delay_secs ({})",
                self.mqtt.reconnect_min_delay_secs, self.mqtt.reconnect_max_delay_secs
            )));
        }

        let scheme = self
            .mqtt
            .broker_url
            .split_once("://")
            .map(|(scheme, _)| scheme);
        if !matches!(scheme, Some("mqtt") | Some("mqtts")) {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.broker_url must start with mqtt:// or mqtts://, got '{}'",
                self.mqtt.broker_url
            )));
        }

        if let Some(base) = &self.mqtt.base_topic {
            // Checked as used: trailing slashes are dropped by base_topic()
            let trimmed = base.trim_end_matches('/');
            if trimmed.is_empty() || trimmed.contains('#') || trimmed.contains('+') {
                return Err(ConfigError::InvalidConfig(format!(
                    "mqtt.base_topic '{base}' must be non-empty and free of wildcards"
                )));
            }
        }

        Ok(())
    }

    /// Computer name: configured value, then the OS hostname
    pub fn computer_name(&self) -> String {
        self.host
            .name
            .clone()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Base topic every metric is published under
    pub fn base_topic(&self) -> String {
        match &self.mqtt.base_topic {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("system2mqtt/{}", self.computer_name()),
        }
    }

    /// True when metrics come from a Proxmox VE node instead of the local host
    pub fn is_hypervisor_mode(&self) -> bool {
        self.hypervisor.is_some()
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Get the Proxmox API password, required in hypervisor mode
    pub fn get_hypervisor_password(&self) -> Result<Option<String>, ConfigError> {
        match self
            .hypervisor
            .as_ref()
            .and_then(|h| h.password_env.as_ref())
        {
            Some(env_name) => Self::get_env_var_required(env_name).map(Some),
            None => Ok(None),
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[host]
name = "host1"

[mqtt]
broker_url = "mqtt://localhost:1883"
base_topic = "s2m/host1"

[discovery]
enabled = true
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Host names end up in topics and discovery ids, keep them to `[a-zA-Z0-9._-]+`
fn validate_host_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidHostName(format!(
            "Host name '{name}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
