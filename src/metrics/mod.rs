//! Metric sources
//!
//! A [`MetricSource`] answers the per-cycle questions the publish jobs ask.
//! Every call may fail independently; callers log the failure and skip that
//! metric for the cycle.
//!
//! - [`system::SystemMetrics`] - the local host via `sysinfo`, plus the
//!   optional fan controller and SMART disk temperatures
//! - [`hypervisor::ProxmoxMetrics`] - storage, CPU and memory of a Proxmox VE
//!   node over its HTTP API

pub mod fan;
pub mod hypervisor;
pub mod smart;
pub mod system;

pub use hypervisor::ProxmoxMetrics;
pub use system::SystemMetrics;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while sampling a metric
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("{metric} is unavailable on this host")]
    Unavailable { metric: String },

    #[error("Failed to parse {metric}: {reason}")]
    Parse { metric: String, reason: String },

    #[error("Failed to read {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed")]
    CommandExecution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Hypervisor API request failed")]
    Http(#[from] reqwest::Error),

    #[error("Hypervisor API returned {status} for {endpoint}")]
    HttpStatus { endpoint: String, status: u16 },
}

impl MetricError {
    pub fn unavailable<S: Into<String>>(metric: S) -> Self {
        Self::Unavailable {
            metric: metric.into(),
        }
    }

    pub fn parse<M: Into<String>, R: Into<String>>(metric: M, reason: R) -> Self {
        Self::Parse {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    /// True when the sensor or mount simply isn't there (not worth more than a warning)
    pub fn is_unavailable(&self) -> bool {
        matches!(self, MetricError::Unavailable { .. })
    }
}

pub type MetricResult<T> = Result<T, MetricError>;

/// A storage location whose state and usage are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Topic label (`sysroot` for `/`, storage id in hypervisor mode)
    pub label: String,
    /// Mountpoint, or storage id in hypervisor mode
    pub target: String,
    pub mounted: bool,
}

impl Mount {
    pub fn mounted(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: target.into(),
            mounted: true,
        }
    }

    /// `mounted` / `unmounted` state payload
    pub fn state_payload(&self) -> &'static str {
        if self.mounted {
            "mounted"
        } else {
            "unmounted"
        }
    }
}

/// Source of host metrics
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Storage locations to report on
    async fn sample_disks(&self) -> MetricResult<Vec<Mount>>;

    /// Used space in percent
    async fn disk_usage(&self, mount: &Mount) -> MetricResult<f64>;

    /// CPU load in percent
    async fn cpu_usage(&self) -> MetricResult<f64>;

    /// CPU temperature in degrees Celsius
    async fn cpu_temperature(&self) -> MetricResult<f64>;

    /// Used memory in percent
    async fn memory_usage(&self) -> MetricResult<f64>;

    /// Fan speed in percent, `None` when no fan controller is configured
    async fn fan_speed(&self) -> MetricResult<Option<f64>>;

    /// Disk temperatures in degrees Celsius, keyed by device name
    async fn disk_temperatures(&self) -> MetricResult<BTreeMap<String, f64>>;
}

/// Render a metric value the way it is published: one decimal place
pub fn format_value(value: f64) -> String {
    format!("{value:.1}")
}

/// `used / total` in percent, `None` for an empty total
pub fn percent(used: f64, total: f64) -> Option<f64> {
    (total > 0.0).then(|| used / total * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42.0");
        assert_eq!(format_value(57.24), "57.2");
        assert_eq!(format_value(3.96), "4.0");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1.0, 4.0), Some(25.0));
        assert_eq!(percent(1.0, 0.0), None);
    }

    #[test]
    fn test_mount_state_payload() {
        let mut mount = Mount::mounted("sysroot", "/");
        assert_eq!(mount.state_payload(), "mounted");
        mount.mounted = false;
        assert_eq!(mount.state_payload(), "unmounted");
    }

    #[test]
    fn test_metric_error_classification() {
        assert!(MetricError::unavailable("fan speed").is_unavailable());
        assert!(!MetricError::parse("memory", "bad").is_unavailable());
        assert_eq!(
            MetricError::parse("memory", "bad").to_string(),
            "Failed to parse memory: bad"
        );
    }
}
