//! Topic construction and filter matching
//!
//! Every topic lives under a per-host base topic:
//! `<base>/<category>/<metric>[/<instance>]`.

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Liveness (last will) topic: `<base>/LWT`
    pub fn liveness(base: &str) -> String {
        format!("{base}/LWT")
    }

    /// Mount state topic: `<base>/disks/mount/<label>`
    pub fn mount_state(base: &str, label: &str) -> String {
        format!("{base}/disks/mount/{label}")
    }

    /// Disk usage topic: `<base>/disks/storage/<label>`
    pub fn disk_storage(base: &str, label: &str) -> String {
        format!("{base}/disks/storage/{label}")
    }

    /// SMART disk temperature topic: `<base>/disks/temperature/<device>`
    pub fn disk_temperature(base: &str, device: &str) -> String {
        format!("{base}/disks/temperature/{device}")
    }

    pub fn cpu_temperature(base: &str) -> String {
        format!("{base}/cpu/temperature")
    }

    pub fn cpu_usage(base: &str) -> String {
        format!("{base}/cpu/usage")
    }

    pub fn memory(base: &str) -> String {
        format!("{base}/memory")
    }

    pub fn fan_speed(base: &str) -> String {
        format!("{base}/fan_speed")
    }

    /// Publish period control topic: `<base>/tele/PUBLISH_PERIOD`
    pub fn publish_period(base: &str) -> String {
        format!("{base}/tele/PUBLISH_PERIOD")
    }

    /// Callback control topic: `<base>/callbacks/<name>`
    pub fn callback(base: &str, name: &str) -> String {
        format!("{base}/callbacks/{name}")
    }
}

/// Topic label for a mountpoint: `/` is `sysroot`, anything else its last
/// path segment
pub fn mount_label(mountpoint: &str) -> String {
    let trimmed = mountpoint.trim_end_matches('/');
    if trimmed.is_empty() {
        return "sysroot".to_string();
    }
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// Check whether a topic matches an MQTT subscription filter
///
/// `+` matches exactly one level, `#` (last level only) matches the parent
/// level and everything below it. Topics starting with `$` never match a
/// filter that starts with a wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// True if the filter contains a wildcard level
pub fn is_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}
