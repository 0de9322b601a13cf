//! Fan speed from a sysfs cooling device
//!
//! The device exposes `cur_state` and `max_state`; the speed is the ratio in
//! percent.

use super::{MetricError, MetricResult};
use std::path::{Path, PathBuf};

pub struct FanController {
    device: PathBuf,
}

impl FanController {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }

    /// Current fan speed in percent
    pub async fn read_speed(&self) -> MetricResult<f64> {
        let current = read_state(&self.device.join("cur_state")).await?;
        let max = read_state(&self.device.join("max_state")).await?;
        fan_percent(current, max)
    }
}

async fn read_state(path: &Path) -> MetricResult<u64> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MetricError::unavailable("fan speed")
        } else {
            MetricError::FileRead {
                path: path.display().to_string(),
                source: e,
            }
        }
    })?;

    raw.trim()
        .parse()
        .map_err(|e| MetricError::parse("fan speed", format!("{}: {e}", path.display())))
}

/// Pure conversion of cooling device states to percent
pub fn fan_percent(current: u64, max: u64) -> MetricResult<f64> {
    if max == 0 {
        return Err(MetricError::parse("fan speed", "max_state is 0"));
    }
    Ok((current.min(max) as f64) / (max as f64) * 100.0)
}
