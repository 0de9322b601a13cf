//! Broker connection lifecycle tests against the mock transport
//!
//! Covers the connect / subscribe / liveness sequence, reconnects, inbound
//! control messages routed through the dispatch table, and the quit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use system2mqtt::broker::{BrokerConnection, BrokerHandle, InboundMessage};
use system2mqtt::control::{register_control_handlers, PowerAction, EXITED_PAYLOAD};
use system2mqtt::error::{S2mError, S2mResult};
use system2mqtt::scheduler::SchedulerState;
use system2mqtt::testing::mocks::{MockPowerControl, MockTransport};
use system2mqtt::transport::mqtt::{ConnectionState, LivenessConfig};
use system2mqtt::transport::{QoS, RefusalReason};

const BASE: &str = "s2m/host1";

struct Harness {
    broker: Arc<BrokerConnection<MockTransport>>,
    transport: MockTransport,
    state: Arc<SchedulerState>,
    power: Arc<MockPowerControl>,
}

fn harness() -> Harness {
    let transport = MockTransport::new();
    let broker = Arc::new(BrokerConnection::new(
        transport.clone(),
        Some(LivenessConfig::for_base(BASE)),
    ));
    let state = Arc::new(SchedulerState::new(60));
    let power = Arc::new(MockPowerControl::new());
    register_control_handlers(&broker, BASE, &state, power.clone());

    Harness {
        broker,
        transport,
        state,
        power,
    }
}

#[test]
fn test_every_control_topic_is_subscribed_on_connect() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();

    assert_eq!(
        h.transport.subscriptions(),
        vec![
            "s2m/host1/callbacks/reboot",
            "s2m/host1/callbacks/s2m_quit",
            "s2m/host1/callbacks/shutdown",
            "s2m/host1/tele/PUBLISH_PERIOD",
        ]
    );
}

#[test]
fn test_reconnect_resubscribes_and_reannounces() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();
    h.transport.drop_connection();
    assert!(!h.broker.is_connected());

    h.transport.retry(1);
    h.transport.connect();

    assert_eq!(h.broker.connection_state(), ConnectionState::Connected);
    assert_eq!(h.transport.subscriptions().len(), 8);

    let online = h.transport.published_to("s2m/host1/LWT");
    assert_eq!(online.len(), 2);
    assert!(online.iter().all(|m| m.payload == "online" && m.retain));
}

#[test]
fn test_every_refusal_reason_leaves_state_disconnected() {
    for reason in [
        RefusalReason::BadProtocolVersion,
        RefusalReason::InvalidClientId,
        RefusalReason::ServerUnavailable,
        RefusalReason::BadCredentials,
        RefusalReason::NotAuthorized,
    ] {
        let h = harness();
        h.broker.start().unwrap();
        h.transport.refuse(reason);

        assert_eq!(h.broker.connection_state(), ConnectionState::Disconnected);
        assert!(h.transport.subscriptions().is_empty());
        assert!(h.transport.published().is_empty());
    }
}

#[test]
fn test_period_message_updates_scheduler_state() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();

    h.transport.deliver("s2m/host1/tele/PUBLISH_PERIOD", "30", false);
    assert_eq!(h.state.interval_secs(), 30);

    h.transport.deliver("s2m/host1/tele/PUBLISH_PERIOD", "abc", false);
    assert_eq!(h.state.interval_secs(), 60);
    assert!(h.broker.is_connected());
}

#[test]
fn test_quit_message_runs_the_quit_sequence() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();
    h.transport.clear_published();

    h.transport.deliver("s2m/host1/callbacks/s2m_quit", "1", false);

    assert!(!h.state.auto_reconnect());
    assert!(h.transport.is_stopped());
    assert_eq!(h.broker.connection_state(), ConnectionState::Disconnected);

    let acks = h.transport.published_to("s2m/host1/callbacks/s2m_quit");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload, "");

    // The last thing on the liveness topic is the retained terminal payload
    let liveness = h.transport.published_to("s2m/host1/LWT");
    let last = liveness.last().unwrap();
    assert_eq!(last.payload, EXITED_PAYLOAD);
    assert!(last.retain);
    assert_eq!(
        liveness.iter().filter(|m| m.payload == EXITED_PAYLOAD).count(),
        1
    );
}

#[test]
fn test_shutdown_message_acknowledges_and_powers_off() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();

    h.transport.deliver("s2m/host1/callbacks/shutdown", "1", false);
    // the broker echoes our acknowledgement back
    h.transport.deliver("s2m/host1/callbacks/shutdown", "", false);

    assert_eq!(h.power.executed(), vec![PowerAction::Shutdown]);
    assert_eq!(
        h.transport
            .published_to("s2m/host1/callbacks/shutdown")
            .len(),
        1
    );
}

#[test]
fn test_retained_trigger_is_ignored() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();

    h.transport.deliver("s2m/host1/callbacks/reboot", "1", true);
    assert!(h.power.executed().is_empty());
}

#[test]
fn test_failing_handler_does_not_disturb_others() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    h.broker.register(
        "s2m/host1/user/broken",
        |_: &InboundMessage, _: &dyn BrokerHandle| -> S2mResult<()> {
            Err(S2mError::internal_error("broken handler"))
        },
    );
    h.broker.register(
        "s2m/host1/user/panics",
        |_: &InboundMessage, _: &dyn BrokerHandle| -> S2mResult<()> { panic!("handler bug") },
    );
    h.broker.register(
        "s2m/host1/user/+",
        move |_: &InboundMessage, _: &dyn BrokerHandle| -> S2mResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    h.broker.start().unwrap();
    h.transport.connect();
    h.transport.deliver("s2m/host1/user/broken", "x", false);
    h.transport.deliver("s2m/host1/user/panics", "x", false);
    h.transport.deliver("s2m/host1/user/other", "x", false);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.broker.is_connected());
}

#[test]
fn test_publish_reasserts_online_after_each_metric() {
    let h = harness();
    h.broker.start().unwrap();
    h.transport.connect();
    h.transport.clear_published();

    h.broker
        .publish("s2m/host1/cpu/usage", b"12.5".to_vec(), QoS::AtMostOnce, false)
        .unwrap();
    h.broker
        .publish("s2m/host1/memory", b"40.0".to_vec(), QoS::AtMostOnce, false)
        .unwrap();

    let topics: Vec<String> = h
        .transport
        .published()
        .into_iter()
        .map(|m| m.topic)
        .collect();
    assert_eq!(
        topics,
        vec![
            "s2m/host1/cpu/usage",
            "s2m/host1/LWT",
            "s2m/host1/memory",
            "s2m/host1/LWT",
        ]
    );
}
