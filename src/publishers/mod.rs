//! The per-cycle metric publish jobs
//!
//! Each job samples one metric family from the [`MetricSource`], publishes
//! the state topic and, on discovery cycles, the matching discovery config
//! right after it. Failures are per metric: the job logs and moves on.
//!
//! [`MetricSource`]: crate::metrics::MetricSource

use crate::discovery::MetricKind;
use crate::error::{S2mError, S2mResult};
use crate::metrics::{format_value, MetricError};
use crate::scheduler::{CycleContext, PublishJob};
use crate::topics::TopicBuilder;
use crate::transport::QoS;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Metric values are superseded every cycle
const METRIC_QOS: QoS = QoS::AtMostOnce;

fn publish_state(ctx: &CycleContext<'_>, topic: &str, payload: &str) -> S2mResult<()> {
    ctx.broker
        .publish(topic, payload.as_bytes().to_vec(), METRIC_QOS, false)?;
    Ok(())
}

/// Publish the retained discovery config for a state topic on discovery cycles
fn publish_discovery(
    ctx: &CycleContext<'_>,
    kind: MetricKind,
    label: Option<&str>,
    state_topic: &str,
) -> S2mResult<()> {
    let Some(discovery) = ctx.discovery else {
        return Ok(());
    };

    let result = discovery
        .config_for(kind, label, state_topic)
        .map_err(S2mError::from)
        .and_then(|(topic, payload)| {
            debug!("Discovery Topic: {}", topic);
            ctx.broker
                .publish(&topic, payload.into_bytes(), METRIC_QOS, true)
                .map_err(S2mError::from)
        });
    if let Err(e) = result {
        ctx.record_discovery_failure();
        return Err(e);
    }
    Ok(())
}

fn publish_with_discovery(
    ctx: &CycleContext<'_>,
    kind: MetricKind,
    label: Option<&str>,
    topic: &str,
    payload: &str,
) -> S2mResult<()> {
    publish_state(ctx, topic, payload)?;
    publish_discovery(ctx, kind, label, topic)
}

fn log_metric_error(what: &str, e: &MetricError) {
    if e.is_unavailable() {
        warn!("{}: {}", what, e);
    } else {
        error!("{}: {}", what, e);
    }
}

/// Re-publishes the online payload at the start of every cycle
pub struct LivenessJob {
    online: String,
}

impl LivenessJob {
    pub fn new(online: impl Into<String>) -> Self {
        Self {
            online: online.into(),
        }
    }
}

#[async_trait]
impl PublishJob for LivenessJob {
    fn name(&self) -> &str {
        "liveness"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        ctx.broker.publish_liveness(&self.online)?;
        Ok(())
    }
}

/// `<base>/disks/mount/<label>`: mounted / unmounted
pub struct MountStateJob;

#[async_trait]
impl PublishJob for MountStateJob {
    fn name(&self) -> &str {
        "mount_state"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        let mounts = ctx.metrics.sample_disks().await?;

        for mount in &mounts {
            let topic = TopicBuilder::mount_state(ctx.base_topic, &mount.label);
            info!(
                "{} is {} - publishing to '{}'",
                mount.label,
                mount.state_payload(),
                topic
            );
            if let Err(e) = publish_with_discovery(
                ctx,
                MetricKind::MountState,
                Some(&mount.label),
                &topic,
                mount.state_payload(),
            ) {
                error!("Failed to publish mount state of {}: {}", mount.label, e);
            }
        }
        Ok(())
    }
}

/// `<base>/disks/storage/<label>`: used space in percent
pub struct DiskSpaceJob;

#[async_trait]
impl PublishJob for DiskSpaceJob {
    fn name(&self) -> &str {
        "disk_space"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        let mounts = ctx.metrics.sample_disks().await?;

        for mount in mounts.iter().filter(|mount| mount.mounted) {
            let used = match ctx.metrics.disk_usage(mount).await {
                Ok(used) => used,
                Err(e) => {
                    log_metric_error(&format!("Disk usage of {}", mount.label), &e);
                    continue;
                }
            };

            let topic = TopicBuilder::disk_storage(ctx.base_topic, &mount.label);
            info!("Storage: {}: {:.1}%", mount.label, used);
            if let Err(e) = publish_with_discovery(
                ctx,
                MetricKind::DiskSpace,
                Some(&mount.label),
                &topic,
                &format_value(used),
            ) {
                error!("Failed to publish disk usage of {}: {}", mount.label, e);
            }
        }
        Ok(())
    }
}

/// `<base>/cpu/temperature`
pub struct CpuTemperatureJob;

#[async_trait]
impl PublishJob for CpuTemperatureJob {
    fn name(&self) -> &str {
        "cpu_temperature"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        let temperature = ctx.metrics.cpu_temperature().await?;
        info!("CPU temperature: {:.1}°C", temperature);
        publish_with_discovery(
            ctx,
            MetricKind::CpuTemperature,
            None,
            &TopicBuilder::cpu_temperature(ctx.base_topic),
            &format_value(temperature),
        )
    }
}

/// `<base>/cpu/usage`
pub struct CpuUsageJob;

#[async_trait]
impl PublishJob for CpuUsageJob {
    fn name(&self) -> &str {
        "cpu_usage"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        let usage = ctx.metrics.cpu_usage().await?;
        info!("CPU usage: {:.1}%", usage);
        publish_with_discovery(
            ctx,
            MetricKind::CpuUsage,
            None,
            &TopicBuilder::cpu_usage(ctx.base_topic),
            &format_value(usage),
        )
    }
}

/// `<base>/memory`
pub struct MemoryJob;

#[async_trait]
impl PublishJob for MemoryJob {
    fn name(&self) -> &str {
        "memory"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        let used = ctx.metrics.memory_usage().await?;
        info!("Memory Used: {:.1}%", used);
        publish_with_discovery(
            ctx,
            MetricKind::Memory,
            None,
            &TopicBuilder::memory(ctx.base_topic),
            &format_value(used),
        )
    }
}

/// Fan speed and SMART disk temperatures
pub struct HardwareJob;

#[async_trait]
impl PublishJob for HardwareJob {
    fn name(&self) -> &str {
        "hardware"
    }

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()> {
        match ctx.metrics.fan_speed().await {
            Ok(Some(speed)) => {
                info!("Fan Speed: {:.1}%", speed);
                if let Err(e) = publish_with_discovery(
                    ctx,
                    MetricKind::FanSpeed,
                    None,
                    &TopicBuilder::fan_speed(ctx.base_topic),
                    &format_value(speed),
                ) {
                    error!("Failed to publish fan speed: {}", e);
                }
            }
            Ok(None) => debug!("No fan controller configured"),
            Err(e) => log_metric_error("Fan speed", &e),
        }

        match ctx.metrics.disk_temperatures().await {
            Ok(temperatures) => {
                for (device, temperature) in &temperatures {
                    let topic = TopicBuilder::disk_temperature(ctx.base_topic, device);
                    info!("{}: {:.1}°C", device, temperature);
                    if let Err(e) = publish_with_discovery(
                        ctx,
                        MetricKind::DiskTemperature,
                        Some(device),
                        &topic,
                        &format_value(*temperature),
                    ) {
                        error!("Failed to publish temperature of {}: {}", device, e);
                    }
                }
            }
            Err(e) => log_metric_error("Disk temperatures", &e),
        }
        Ok(())
    }
}

/// The fixed job order: liveness, mount state, disk space, CPU temperature,
/// CPU usage, memory, then hardware when enabled
pub fn standard_jobs(online: Option<&str>, hardware: bool) -> Vec<Box<dyn PublishJob>> {
    let mut jobs: Vec<Box<dyn PublishJob>> = Vec::new();
    if let Some(online) = online {
        jobs.push(Box::new(LivenessJob::new(online)));
    }
    jobs.push(Box::new(MountStateJob));
    jobs.push(Box::new(DiskSpaceJob));
    jobs.push(Box::new(CpuTemperatureJob));
    jobs.push(Box::new(CpuUsageJob));
    jobs.push(Box::new(MemoryJob));
    if hardware {
        jobs.push(Box::new(HardwareJob));
    }
    jobs
}
