//! Liveness announcer
//!
//! The broker publishes the offline payload as our last will when the session
//! dies uncleanly; we publish the online payload on every connect and
//! re-assert it alongside every application publish.

use crate::transport::mqtt::{LivenessConfig, MqttError};
use crate::transport::{QoS, Transport};
use tracing::{debug, warn};

/// Optional liveness tracking around a [`LivenessConfig`]
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    config: Option<LivenessConfig>,
}

impl Liveness {
    pub fn new(config: Option<LivenessConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> Option<&LivenessConfig> {
        self.config.as_ref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.topic.as_str())
    }

    /// True if publishing to `topic` should also re-assert "online"
    pub fn needs_reassert(&self, topic: &str) -> bool {
        self.topic().is_some_and(|lwt| lwt != topic)
    }

    /// Announce "online" after a successful connect
    pub fn announce_online(&self, transport: &dyn Transport) -> Result<(), MqttError> {
        match &self.config {
            Some(config) => {
                debug!("Publishing liveness '{}' to {}", config.online, config.topic);
                self.publish(transport, &config.online)
            }
            None => {
                warn!("No liveness topic set");
                Ok(())
            }
        }
    }

    /// Publish an arbitrary payload to the liveness topic (no-op without one)
    pub fn publish(&self, transport: &dyn Transport, payload: &str) -> Result<(), MqttError> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        transport.publish(
            &config.topic,
            payload.as_bytes().to_vec(),
            QoS::AtMostOnce,
            config.retain,
        )
    }
}
