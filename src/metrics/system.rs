//! Local host metrics via `sysinfo`

use super::fan::FanController;
use super::smart::SmartReader;
use super::{percent, MetricError, MetricResult, MetricSource, Mount};
use crate::config::{HardwareSection, StorageSection};
use crate::topics::mount_label;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use sysinfo::{Components, CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::trace;

/// Sensor label prefixes that identify CPU package/core temperatures
const CPU_SENSOR_PREFIXES: &[&str] = &["coretemp", "cpu_thermal", "k10temp", "zenpower", "cpu"];

/// Metrics of the machine we run on
pub struct SystemMetrics {
    system: Mutex<System>,
    storage: StorageSection,
    fan: Option<FanController>,
    smart: Option<SmartReader>,
}

impl SystemMetrics {
    pub fn new(storage: StorageSection, hardware: &HardwareSection) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());

        // The first usage sample is the baseline for the next one
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
            storage,
            fan: hardware
                .fan
                .then(|| FanController::new(hardware.fan_device.clone())),
            smart: hardware
                .disk_temperatures
                .then(|| SmartReader::new(hardware.smartctl_path.clone())),
        }
    }

    fn with_system<R>(&self, f: impl FnOnce(&mut System) -> R) -> R {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut system)
    }
}

#[async_trait]
impl MetricSource for SystemMetrics {
    async fn sample_disks(&self) -> MetricResult<Vec<Mount>> {
        let disks = Disks::new_with_refreshed_list();
        let mountpoints: Vec<String> = disks
            .list()
            .iter()
            .map(|disk| disk.mount_point().to_string_lossy().into_owned())
            .collect();
        trace!("Mountpoints: {:?}", mountpoints);

        Ok(select_mounts(&mountpoints, &self.storage))
    }

    async fn disk_usage(&self, mount: &Mount) -> MetricResult<f64> {
        if !mount.mounted {
            return Err(MetricError::unavailable(format!("disk usage of {}", mount.label)));
        }

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point().to_string_lossy() == mount.target)
            .ok_or_else(|| MetricError::unavailable(format!("disk usage of {}", mount.label)))?;

        let total = disk.total_space() as f64;
        let used = total - disk.available_space() as f64;
        percent(used, total).ok_or_else(|| {
            MetricError::parse("disk usage", format!("{} reports no capacity", mount.target))
        })
    }

    async fn cpu_usage(&self) -> MetricResult<f64> {
        let usage = self.with_system(|system| {
            system.refresh_cpu_usage();
            system.global_cpu_usage()
        });
        Ok(f64::from(usage))
    }

    async fn cpu_temperature(&self) -> MetricResult<f64> {
        let components = Components::new_with_refreshed_list();
        let readings: Vec<(String, f32)> = components
            .list()
            .iter()
            .filter_map(|component| {
                Some((component.label().to_string(), component.temperature()?))
            })
            .collect();

        hottest_cpu_temperature(&readings)
            .ok_or_else(|| MetricError::unavailable("cpu temperature"))
    }

    async fn memory_usage(&self) -> MetricResult<f64> {
        let (used, total) = self.with_system(|system| {
            system.refresh_memory();
            (system.used_memory() as f64, system.total_memory() as f64)
        });
        percent(used, total).ok_or_else(|| MetricError::unavailable("memory usage"))
    }

    async fn fan_speed(&self) -> MetricResult<Option<f64>> {
        match &self.fan {
            Some(fan) => fan.read_speed().await.map(Some),
            None => Ok(None),
        }
    }

    async fn disk_temperatures(&self) -> MetricResult<BTreeMap<String, f64>> {
        match &self.smart {
            Some(smart) => smart.read_temperatures().await,
            None => Ok(BTreeMap::new()),
        }
    }
}

/// Mountpoints we report on by default
fn is_candidate_mount(mountpoint: &str) -> bool {
    if mountpoint == "/" {
        return true;
    }
    if cfg!(target_os = "macos") {
        mountpoint.starts_with("/Volumes/")
    } else {
        mountpoint.starts_with("/mnt/") || mountpoint.starts_with("/media/")
    }
}

fn matches_filter(filter: &[String], label: &str, mountpoint: &str) -> bool {
    filter.iter().any(|entry| entry == label || entry == mountpoint)
}

/// Apply the default mountpoint selection and the storage filters (pure function)
///
/// Included mountpoints that are not currently mounted are reported as
/// unmounted so their state topic flips instead of going stale.
pub fn select_mounts(mountpoints: &[String], storage: &StorageSection) -> Vec<Mount> {
    let mut mounts: Vec<Mount> = Vec::new();

    for mountpoint in mountpoints {
        let label = mount_label(mountpoint);
        let selected = if storage.include.is_empty() {
            is_candidate_mount(mountpoint)
        } else {
            matches_filter(&storage.include, &label, mountpoint)
        };

        if selected
            && !matches_filter(&storage.exclude, &label, mountpoint)
            && !mounts.iter().any(|m| m.target == *mountpoint)
        {
            mounts.push(Mount::mounted(label, mountpoint.clone()));
        }
    }

    for entry in storage.include.iter().filter(|entry| entry.starts_with('/')) {
        let label = mount_label(entry);
        let absent = !mountpoints.iter().any(|m| m == entry)
            && !mounts.iter().any(|m| m.target == *entry);

        if absent && !matches_filter(&storage.exclude, &label, entry) {
            mounts.push(Mount {
                label,
                target: entry.clone(),
                mounted: false,
            });
        }
    }

    mounts
}

/// Hottest CPU sensor, or the hottest sensor overall if none looks like a CPU
pub fn hottest_cpu_temperature(readings: &[(String, f32)]) -> Option<f64> {
    let is_cpu = |label: &str| {
        let label = label.to_lowercase();
        CPU_SENSOR_PREFIXES
            .iter()
            .any(|prefix| label.starts_with(prefix))
    };

    let cpu: Vec<f32> = readings
        .iter()
        .filter(|(label, _)| is_cpu(label))
        .map(|(_, temperature)| *temperature)
        .collect();
    let all: Vec<f32> = readings.iter().map(|(_, temperature)| *temperature).collect();

    hottest(&cpu).or_else(|| hottest(&all))
}

fn hottest(temperatures: &[f32]) -> Option<f64> {
    temperatures
        .iter()
        .filter(|temperature| temperature.is_finite())
        .map(|temperature| f64::from(*temperature))
        .fold(None, |max, t| Some(max.map_or(t, |m: f64| m.max(t))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_mount_selection() {
        let mountpoints = if cfg!(target_os = "macos") {
            paths(&["/", "/Volumes/usb", "/System/Volumes/Data"])
        } else {
            paths(&["/", "/media/usb", "/boot/efi", "/run/user/1000"])
        };

        let mounts = select_mounts(&mountpoints, &StorageSection::default());
        let labels: Vec<&str> = mounts.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["sysroot", "usb"]);
        assert!(mounts.iter().all(|m| m.mounted));
    }

    #[test]
    fn test_include_and_exclude_filters() {
        let storage = StorageSection {
            include: paths(&["sysroot", "/srv/data", "/mnt/offline"]),
            exclude: paths(&["data"]),
        };
        let mountpoints = paths(&["/", "/srv/data", "/media/usb"]);

        let mounts = select_mounts(&mountpoints, &storage);
        assert_eq!(
            mounts,
            vec![
                Mount::mounted("sysroot", "/"),
                Mount {
                    label: "offline".to_string(),
                    target: "/mnt/offline".to_string(),
                    mounted: false,
                },
            ]
        );
    }

    #[test]
    fn test_excluded_include_path_is_never_reported() {
        // Mounted or not, an excluded path stays out
        let storage = StorageSection {
            include: paths(&["/srv/data", "/mnt/gone"]),
            exclude: paths(&["data", "/mnt/gone"]),
        };

        assert!(select_mounts(&paths(&["/srv/data"]), &storage).is_empty());
        assert!(select_mounts(&paths(&[]), &storage).is_empty());
    }

    #[test]
    fn test_duplicate_mountpoints_reported_once() {
        let mounts = select_mounts(&paths(&["/", "/"]), &StorageSection::default());
        assert_eq!(mounts.len(), 1);
    }

    #[test]
    fn test_hottest_cpu_sensor_wins() {
        let readings = vec![
            ("acpitz temp1".to_string(), 80.0),
            ("coretemp Package id 0".to_string(), 55.5),
            ("coretemp Core 1".to_string(), 61.0),
        ];
        assert_eq!(hottest_cpu_temperature(&readings), Some(61.0));
    }

    #[test]
    fn test_falls_back_to_any_sensor() {
        let readings = vec![
            ("acpitz temp1".to_string(), 48.0),
            ("nvme Composite".to_string(), 39.0),
            ("broken".to_string(), f32::NAN),
        ];
        assert_eq!(hottest_cpu_temperature(&readings), Some(48.0));
        assert_eq!(hottest_cpu_temperature(&[]), None);
    }

    #[tokio::test]
    async fn test_hardware_disabled_reports_nothing() {
        let metrics = SystemMetrics::new(StorageSection::default(), &HardwareSection::default());
        assert_eq!(metrics.fan_speed().await.unwrap(), None);
        assert!(metrics.disk_temperatures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmounted_disk_has_no_usage() {
        let metrics = SystemMetrics::new(StorageSection::default(), &HardwareSection::default());
        let mount = Mount {
            label: "offline".to_string(),
            target: "/mnt/offline".to_string(),
            mounted: false,
        };
        assert!(metrics.disk_usage(&mount).await.unwrap_err().is_unavailable());
    }
}
