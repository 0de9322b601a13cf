//! Pure health monitoring and reconnection logic for the MQTT transport
//!
//! This module contains pure functions for connection state transitions
//! and reconnection decision making.

use super::connection::{ConnectionState, ReconnectConfig};
use crate::transport::RefusalReason;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether the driver should retry after a failed poll (pure function)
    ///
    /// Retries are unlimited; only a shutdown request stops them.
    pub fn should_attempt_reconnection(
        failed_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = failed_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(
        current_state: &ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::StartRequested | ConnectionEvent::RetryStarted(_) => {
                ConnectionState::Connecting
            }
            ConnectionEvent::ConnAckAccepted => ConnectionState::Connected,
            ConnectionEvent::ConnAckRefused(_) | ConnectionEvent::StopRequested => {
                ConnectionState::Disconnected
            }
            ConnectionEvent::SessionEnded(_) => match current_state {
                ConnectionState::Connected | ConnectionState::Lost => ConnectionState::Lost,
                ConnectionState::Connecting | ConnectionState::Disconnected => {
                    ConnectionState::Disconnected
                }
            },
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(
        from: &ConnectionState,
        to: &ConnectionState,
        event: &ConnectionEvent,
    ) {
        match (from, to, event) {
            (_, ConnectionState::Connected, _) => {
                info!("Connection successful");
            }
            (_, _, ConnectionEvent::ConnAckRefused(reason)) => {
                error!("{}", reason);
            }
            (
                ConnectionState::Connected,
                ConnectionState::Lost,
                ConnectionEvent::SessionEnded(reason),
            ) => {
                warn!("Disconnected from broker: {}", reason);
            }
            (_, ConnectionState::Connecting, ConnectionEvent::RetryStarted(attempt)) => {
                info!("Starting reconnection attempt {}", attempt);
            }
            (_, _, ConnectionEvent::SessionEnded(reason)) => {
                debug!("Connection attempt failed: {}", reason);
            }
            _ => {
                debug!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt after the delay
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// `start()` was called
    StartRequested,
    /// The driver is about to retry after a backoff delay
    RetryStarted(u32),
    /// CONNACK with success return code
    ConnAckAccepted,
    /// CONNACK with a refusal return code
    ConnAckRefused(RefusalReason),
    /// Broker disconnect or network error
    SessionEnded(String),
    /// Client requested disconnect
    StopRequested,
}
