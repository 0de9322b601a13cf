//! Disk temperatures via `smartctl`
//!
//! Sleeping disks are never woken (`-n standby,0`). SATA pass-through is
//! tried first, then smartctl's auto-detection.

use super::{MetricError, MetricResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// SMART attribute rows carrying the temperature (194 Temperature_Celsius,
/// 190 Airflow_Temperature_Cel); the raw value is the 10th column
static ATTRIBUTE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(194|190)\s").expect("attribute row regex is valid")
});

/// NVMe / SCSI style `Temperature: 38 Celsius`
static TEMPERATURE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Temperature:\s+(\d+(?:\.\d+)?)").expect("temperature line regex is valid")
});

pub struct SmartReader {
    smartctl: PathBuf,
}

impl SmartReader {
    pub fn new(smartctl: impl Into<PathBuf>) -> Self {
        Self {
            smartctl: smartctl.into(),
        }
    }

    /// Temperatures of all SATA/IDE disks that report one
    pub async fn read_temperatures(&self) -> MetricResult<BTreeMap<String, f64>> {
        if !self.smartctl.exists() {
            return Err(MetricError::unavailable("disk temperatures"));
        }

        let output = Command::new("lsblk")
            .args(["-dn", "-o", "NAME,TYPE"])
            .output()
            .await
            .map_err(|e| MetricError::CommandExecution {
                command: "lsblk".to_string(),
                source: e,
            })?;

        let mut temperatures = BTreeMap::new();
        for device in parse_block_devices(&String::from_utf8_lossy(&output.stdout)) {
            match self.device_temperature(&device).await? {
                Some(temperature) => {
                    temperatures.insert(device, temperature);
                }
                None => debug!("No temperature reported for {}", device),
            }
        }
        Ok(temperatures)
    }

    async fn device_temperature(&self, device: &str) -> MetricResult<Option<f64>> {
        let path = format!("/dev/{device}");
        let sat = ["-d", "sat", "-n", "standby,0", "-A", path.as_str()];
        if let Some(temperature) = self.query(&sat).await? {
            return Ok(Some(temperature));
        }
        self.query(&["-n", "standby,0", "-A", &path]).await
    }

    async fn query(&self, args: &[&str]) -> MetricResult<Option<f64>> {
        let output = Command::new(&self.smartctl)
            .args(args)
            .output()
            .await
            .map_err(|e| MetricError::CommandExecution {
                command: self.smartctl.display().to_string(),
                source: e,
            })?;

        // smartctl uses its exit status as a bit mask, so read the output regardless
        Ok(parse_smart_temperature(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Whole-disk SATA/IDE device names from `lsblk -dn -o NAME,TYPE`
pub fn parse_block_devices(lsblk_output: &str) -> Vec<String> {
    lsblk_output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            match (columns.next(), columns.next()) {
                (Some(name), Some("disk")) if name.starts_with("sd") || name.starts_with("hd") => {
                    Some(name.to_string())
                }
                _ => None,
            }
        })
        .collect()
}

/// Temperature from `smartctl -A` output, `None` if it reports none
pub fn parse_smart_temperature(output: &str) -> Option<f64> {
    let attribute = output
        .lines()
        .filter(|line| ATTRIBUTE_ROW.is_match(line))
        .find_map(|line| line.split_whitespace().nth(9)?.parse::<f64>().ok());

    attribute.or_else(|| {
        output.lines().find_map(|line| {
            TEMPERATURE_LINE
                .captures(line)
                .and_then(|captures| captures.get(1))
                .and_then(|value| value.as_str().parse().ok())
        })
    })
}
