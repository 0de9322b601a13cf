//! Transport layer for broker communication
//!
//! This module provides the transport abstraction and the MQTT implementation
//! the broker connection sits on. The transport owns the network session and
//! its background event loop; it reports what happens on that session through
//! [`ConnectionEvents`] and never decides anything about application state.

use std::fmt;
use std::sync::Arc;

pub mod mqtt;

pub use rumqttc::QoS;

use mqtt::MqttError;

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the MQTT client to enable
/// dependency injection and testing. Every method returns immediately:
/// requests are enqueued for the background event loop, which is why they
/// are safe to call from inside connection callbacks.
pub trait Transport: Send + Sync {
    /// Start the background event loop and begin connecting.
    ///
    /// Connection outcomes, retries, disconnects and inbound messages are
    /// delivered to `events` from the event loop's own task.
    fn start(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), MqttError>;

    /// Enqueue a publish
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool)
        -> Result<(), MqttError>;

    /// Enqueue a subscription request
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Request a clean disconnect and stop the event loop
    fn stop(&self) -> Result<(), MqttError>;
}

/// Callbacks fired by the transport's event loop
///
/// Implementations must return quickly and must not wait on network I/O.
pub trait ConnectionEvents: Send + Sync {
    /// A (re)connection attempt is about to be made
    fn on_connecting(&self, attempt: u32);

    /// The broker answered our CONNECT
    fn on_connect(&self, outcome: ConnectOutcome);

    /// The session ended
    fn on_disconnect(&self, reason: DisconnectReason);

    /// A message arrived on a subscribed topic
    fn on_message(&self, topic: &str, payload: &[u8], retain: bool);
}

/// Result of a connection attempt as reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accepted,
    Refused(RefusalReason),
}

/// Reasons a broker may refuse a connection (CONNACK return codes 1-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    BadProtocolVersion,
    InvalidClientId,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RefusalReason::BadProtocolVersion => "incorrect protocol version",
            RefusalReason::InvalidClientId => "invalid client identifier",
            RefusalReason::ServerUnavailable => "server unavailable",
            RefusalReason::BadCredentials => "bad username or password",
            RefusalReason::NotAuthorized => "not authorised",
        };
        write!(f, "Connection refused - {reason}")
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The broker sent DISCONNECT or closed the socket
    BrokerClosed,
    /// Network or protocol error
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::BrokerClosed => write!(f, "broker closed the connection"),
            DisconnectReason::Transport(error) => write!(f, "transport error: {error}"),
        }
    }
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
