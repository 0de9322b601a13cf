//! Home Assistant MQTT discovery payloads
//!
//! Every published metric can be announced as a Home Assistant entity by
//! publishing a retained config document to
//! `<prefix>/<component>/<object_id>/config`. Building the document is a pure
//! function; publishing it is the job of the publish jobs.

use serde::Serialize;

const MANUFACTURER: &str = "TeamGREEN Tech";
const MODEL: &str = "System2Mqtt";

/// The metrics we know how to announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    MountState,
    DiskSpace,
    DiskTemperature,
    CpuTemperature,
    CpuUsage,
    Memory,
    FanSpeed,
}

impl MetricKind {
    /// Home Assistant component the entity is registered as
    pub fn component(&self) -> &'static str {
        match self {
            MetricKind::MountState => "binary_sensor",
            _ => "sensor",
        }
    }

    /// Trailing part of the object id
    fn metric_slug(&self) -> &'static str {
        match self {
            MetricKind::MountState => "mounted",
            MetricKind::DiskSpace => "storage",
            MetricKind::DiskTemperature | MetricKind::CpuTemperature => "temperature",
            MetricKind::CpuUsage => "usage",
            MetricKind::Memory => "memory",
            MetricKind::FanSpeed => "fan_speed",
        }
    }

    /// Label used for metrics that are not per-instance
    fn default_label(&self) -> Option<&'static str> {
        match self {
            MetricKind::CpuTemperature | MetricKind::CpuUsage => Some("cpu"),
            _ => None,
        }
    }

    fn unit(&self) -> Option<&'static str> {
        match self {
            MetricKind::MountState => None,
            MetricKind::DiskTemperature | MetricKind::CpuTemperature => Some("°C"),
            _ => Some("%"),
        }
    }

    fn icon(&self) -> Option<&'static str> {
        match self {
            MetricKind::MountState => None,
            MetricKind::DiskSpace => Some("mdi:harddisk"),
            MetricKind::DiskTemperature | MetricKind::CpuTemperature => Some("mdi:thermometer"),
            MetricKind::CpuUsage => Some("mdi:cpu-64-bit"),
            MetricKind::Memory => Some("mdi:memory"),
            MetricKind::FanSpeed => Some("mdi:fan"),
        }
    }

    fn device_class(&self) -> Option<&'static str> {
        match self {
            MetricKind::MountState => Some("connectivity"),
            MetricKind::DiskTemperature | MetricKind::CpuTemperature => Some("temperature"),
            _ => None,
        }
    }

    fn payloads(&self) -> (Option<&'static str>, Option<&'static str>) {
        match self {
            MetricKind::MountState => (Some("mounted"), Some("unmounted")),
            _ => (None, None),
        }
    }
}

/// Device block shared by every entity of one host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn new(device: &str) -> Self {
        Self {
            identifiers: device.to_string(),
            name: format!("S2M {}", title_case(device)),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
        }
    }
}

/// One discovery document, field order as published
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityConfig {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

/// `(discovery_topic, json_payload)` for an entity
pub fn entity_config(
    prefix: &str,
    component: &str,
    entity: &EntityConfig,
) -> Result<(String, String), serde_json::Error> {
    let topic = format!("{}/{}/{}/config", prefix, component, entity.object_id);
    let payload = serde_json::to_string(entity)?;
    Ok((topic, payload))
}

/// Everything about the host that goes into each discovery document
#[derive(Debug, Clone)]
pub struct DiscoveryContext {
    pub prefix: String,
    pub device: String,
    pub availability_topic: Option<String>,
}

impl DiscoveryContext {
    pub fn new(
        prefix: impl Into<String>,
        device: impl Into<String>,
        availability_topic: Option<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            device: device.into(),
            availability_topic,
        }
    }

    /// Entity description for `kind`, with `label` naming the instance (mount, disk)
    pub fn entity(&self, kind: MetricKind, label: Option<&str>, state_topic: &str) -> EntityConfig {
        let label = label.or(kind.default_label());
        let slug = kind.metric_slug();

        let (object_id, name) = match label {
            Some(label) => (
                object_id(&[&self.device, label, slug]),
                format!("{} {}", label, slug.replace('_', " ")),
            ),
            None => (object_id(&[&self.device, slug]), slug.replace('_', " ")),
        };
        let (payload_on, payload_off) = kind.payloads();

        EntityConfig {
            name,
            unique_id: object_id.clone(),
            object_id,
            state_topic: state_topic.to_string(),
            device: DeviceInfo::new(&self.device),
            availability_topic: self.availability_topic.clone(),
            payload_on: payload_on.map(str::to_string),
            payload_off: payload_off.map(str::to_string),
            unit_of_measurement: kind.unit().map(str::to_string),
            icon: kind.icon().map(str::to_string),
            device_class: kind.device_class().map(str::to_string),
        }
    }

    /// Discovery topic and payload for `kind`
    pub fn config_for(
        &self,
        kind: MetricKind,
        label: Option<&str>,
        state_topic: &str,
    ) -> Result<(String, String), serde_json::Error> {
        let entity = self.entity(kind, label, state_topic);
        entity_config(&self.prefix, kind.component(), &entity)
    }
}

/// `s2m_<parts...>` with everything outside `[A-Za-z0-9_]` mapped to `_`
fn object_id(parts: &[&str]) -> String {
    let mut id = String::from("s2m");
    for part in parts {
        id.push('_');
        id.extend(
            part.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }),
        );
    }
    id
}

/// Capitalize the first letter of every alphabetic run
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
