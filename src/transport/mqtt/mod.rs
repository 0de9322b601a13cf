//! MQTT 3.1.1 transport built on `rumqttc`
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, configuration and option building
//! - [`message_handler`] - Pure routing of `rumqttc` events
//! - [`health_monitor`] - Pure state transitions and reconnection decisions
//! - [`client`] - Impure I/O: the event loop driver
//!
//! # Usage
//!
//! ```rust,no_run
//! use system2mqtt::transport::mqtt::{ConnectionConfig, LivenessConfig, MqttTransport};
//! use system2mqtt::config::S2mConfig;
//!
//! # fn demo(config: &S2mConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let connection = ConnectionConfig::from_config(config)?;
//! let liveness = LivenessConfig::for_base(&config.base_topic());
//! let transport = MqttTransport::new(&connection, Some(&liveness));
//! # let _ = transport;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{
    configure_mqtt_options, refusal_reason, ConnectionConfig, ConnectionState, LivenessConfig,
    MqttError, ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
