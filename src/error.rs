//! Error types for system2mqtt
//!
//! Every failure mode is recoverable except configuration errors at startup:
//! transport errors are retried by the event loop driver, metric errors skip a
//! single metric for one cycle, control payload errors fall back to defaults.

use crate::config::ConfigError;
use crate::metrics::MetricError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for system2mqtt operations
#[derive(Debug, Error)]
pub enum S2mError {
    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to encode discovery payload: {0}")]
    Discovery(#[from] serde_json::Error),

    #[error("Invalid payload on {topic}: {message}")]
    InvalidPayload { topic: String, message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl S2mError {
    /// Create invalid control payload error
    pub fn invalid_payload<T: Into<String>, M: Into<String>>(topic: T, message: M) -> Self {
        Self::InvalidPayload {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// True for errors that only mean "this metric is unavailable right now"
    pub fn is_metric_unavailable(&self) -> bool {
        matches!(self, S2mError::Metric(e) if e.is_unavailable())
    }
}

/// Result type for system2mqtt operations
pub type S2mResult<T> = Result<T, S2mError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::ConnectionState;

    #[test]
    fn test_invalid_payload_constructor() {
        let error = S2mError::invalid_payload("s2m/host1/tele/PUBLISH_PERIOD", "not a number");
        assert!(matches!(error, S2mError::InvalidPayload { .. }));
        assert_eq!(
            error.to_string(),
            "Invalid payload on s2m/host1/tele/PUBLISH_PERIOD: not a number"
        );
    }

    #[test]
    fn test_internal_error_constructor() {
        let error = S2mError::internal_error("handler panicked");
        assert_eq!(error.to_string(), "Internal error: handler panicked");
    }

    #[test]
    fn test_transport_error_conversion() {
        let error: S2mError = MqttError::NotConnected {
            state: ConnectionState::Lost,
        }
        .into();
        assert!(matches!(error, S2mError::Transport(_)));
        assert!(error.to_string().contains("Lost"));
    }

    #[test]
    fn test_metric_unavailable_classification() {
        let unavailable: S2mError = MetricError::unavailable("cpu temperature").into();
        assert!(unavailable.is_metric_unavailable());

        let parse: S2mError = MetricError::parse("memory", "garbage").into();
        assert!(!parse.is_metric_unavailable());

        assert!(!S2mError::internal_error("x").is_metric_unavailable());
    }
}
