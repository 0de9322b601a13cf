//! End-to-end first cycle for a plain host with discovery enabled
//!
//! host1 publishes under `s2m/host1` and reports `/` and `/media/usb`. Every
//! state publish on the first cycle is followed by its retained discovery
//! config.


use serde_json::Value;
use system2mqtt::metrics::Mount;
use system2mqtt::testing::mocks::PublishedMessage;
use test_helpers::{lifecycle, Lifecycle};

async fn first_cycle() -> (Lifecycle, Vec<PublishedMessage>) {
    let l = lifecycle(60, true);
    l.broker.start().unwrap();
    l.transport.connect();
    l.transport.clear_published();

    l.scheduler.publish_all().await;
    let published = l.transport.published();
    (l, published)
}

fn position(published: &[PublishedMessage], topic: &str) -> usize {
    published
        .iter()
        .position(|m| m.topic == topic)
        .unwrap_or_else(|| panic!("{topic} was not published"))
}

#[tokio::test]
async fn test_mount_states_are_followed_by_their_discovery_configs() {
    let (_l, published) = first_cycle().await;

    for label in ["sysroot", "usb"] {
        let state_topic = format!("s2m/host1/disks/mount/{label}");
        let config_topic = format!("homeassistant/binary_sensor/s2m_host1_{label}_mounted/config");

        let state = position(&published, &state_topic);
        let config = position(&published, &config_topic);
        assert!(state < config, "{label}: state must precede its config");

        assert_eq!(published[state].payload, "mounted");
        assert!(!published[state].retain);

        let message = &published[config];
        assert!(message.retain);
        assert!(message
            .payload
            .contains(&format!(r#""state_topic":"{state_topic}""#)));
    }
}

#[tokio::test]
async fn test_discovery_payload_describes_the_device() {
    let (_l, published) = first_cycle().await;

    let config = &published[position(
        &published,
        "homeassistant/sensor/s2m_host1_memory/config",
    )];
    let json: Value = serde_json::from_str(&config.payload).unwrap();

    assert_eq!(json["unique_id"], "s2m_host1_memory");
    assert_eq!(json["state_topic"], "s2m/host1/memory");
    assert_eq!(json["unit_of_measurement"], "%");
    assert_eq!(json["availability_topic"], "s2m/host1/LWT");
    assert_eq!(json["device"]["identifiers"], "host1");
    assert_eq!(json["device"]["name"], "S2M Host1");
}

#[tokio::test]
async fn test_state_payloads_use_one_decimal() {
    let (_l, published) = first_cycle().await;

    let payload = |topic: &str| published[position(&published, topic)].payload.clone();
    assert_eq!(payload("s2m/host1/disks/storage/sysroot"), "42.0");
    assert_eq!(payload("s2m/host1/disks/storage/usb"), "10.0");
    assert_eq!(payload("s2m/host1/cpu/temperature"), "45.0");
    assert_eq!(payload("s2m/host1/cpu/usage"), "12.5");
    assert_eq!(payload("s2m/host1/memory"), "40.0");
}

#[tokio::test]
async fn test_unmounted_usb_skips_usage() {
    let l = lifecycle(60, true);
    l.metrics.set_disks(vec![
        Mount::mounted("sysroot", "/"),
        Mount {
            label: "usb".to_string(),
            target: "/media/usb".to_string(),
            mounted: false,
        },
    ]);
    l.broker.start().unwrap();
    l.transport.connect();

    l.scheduler.publish_all().await;

    let usb = l.transport.published_to("s2m/host1/disks/mount/usb");
    assert_eq!(usb.len(), 1);
    assert_eq!(usb[0].payload, "unmounted");
    assert!(l
        .transport
        .published_to("s2m/host1/disks/storage/usb")
        .is_empty());
}

#[tokio::test]
async fn test_second_cycle_publishes_state_only() {
    let (l, _) = first_cycle().await;
    l.transport.clear_published();

    l.scheduler.publish_all().await;

    let published = l.transport.published();
    assert!(!published.is_empty());
    assert!(published
        .iter()
        .all(|m| !m.topic.starts_with("homeassistant/")));
}
