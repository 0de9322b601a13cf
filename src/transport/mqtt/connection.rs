//! Pure connection state management for the MQTT transport
//!
//! This module contains pure functions for connection state management,
//! configuration handling, and `rumqttc` option building.

use crate::config::S2mConfig;
use crate::topics::TopicBuilder;
use crate::transport::RefusalReason;
use rumqttc::{ConnectReturnCode, LastWill, MqttOptions, QoS, Transport as RumqttcTransport};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying (initial state, refused attempt, or stopped)
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// CONNACK accepted, ready for operations
    Connected,
    /// An established session dropped; the event loop will retry
    Lost,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reconnection backoff bounds
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before the given attempt (1-based): the minimum delay
    /// doubled per failed attempt, capped at the maximum delay
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.min_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscription to {topic} failed")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Event loop already started")]
    AlreadyStarted,
    #[error("No tokio runtime available to drive the event loop")]
    NoRuntime,
}

/// Resolved broker connection parameters, immutable after startup
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    /// Resolve the `[mqtt]` section, reading credentials from the environment
    pub fn from_config(config: &S2mConfig) -> Result<Self, MqttError> {
        let (host, port, use_tls) = parse_broker_url(&config.mqtt.broker_url)?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let client_id = format!("s2m-{}-{}", config.computer_name(), &suffix[..8]);

        Ok(Self {
            host,
            port,
            use_tls,
            client_id,
            username: config.get_mqtt_username(),
            password: config.get_mqtt_password(),
            keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
            reconnect: ReconnectConfig {
                min_delay: Duration::from_secs(config.mqtt.reconnect_min_delay_secs),
                max_delay: Duration::from_secs(config.mqtt.reconnect_max_delay_secs),
            },
        })
    }
}

/// Last-will / liveness parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    pub topic: String,
    pub online: String,
    pub offline: String,
    pub retain: bool,
}

impl LivenessConfig {
    /// Retained `online` / `offline` on `<base>/LWT`
    pub fn for_base(base_topic: &str) -> Self {
        Self {
            topic: TopicBuilder::liveness(base_topic),
            online: "online".to_string(),
            offline: "offline".to_string(),
            retain: true,
        }
    }
}

/// Pure function to split a broker URL into host, port and TLS flag
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let use_tls = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if use_tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, use_tls))
}

/// Pure function to build `rumqttc` options from the resolved configuration
pub fn configure_mqtt_options(
    config: &ConnectionConfig,
    liveness: Option<&LivenessConfig>,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if config.use_tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive);

    // The broker publishes the offline payload if we vanish without DISCONNECT
    if let Some(liveness) = liveness {
        mqtt_options.set_last_will(LastWill::new(
            &liveness.topic,
            liveness.offline.clone(),
            QoS::AtLeastOnce,
            liveness.retain,
        ));
    }

    mqtt_options
}

/// Map a CONNACK return code to a refusal reason (`None` on success)
pub fn refusal_reason(code: ConnectReturnCode) -> Option<RefusalReason> {
    match code {
        ConnectReturnCode::Success => None,
        ConnectReturnCode::RefusedProtocolVersion => Some(RefusalReason::BadProtocolVersion),
        ConnectReturnCode::BadClientId => Some(RefusalReason::InvalidClientId),
        ConnectReturnCode::ServiceUnavailable => Some(RefusalReason::ServerUnavailable),
        ConnectReturnCode::BadUserNamePassword => Some(RefusalReason::BadCredentials),
        ConnectReturnCode::NotAuthorized => Some(RefusalReason::NotAuthorized),
    }
}
