//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] with injectable connection events, a mock
//! [`BrokerHandle`], a scripted [`MetricSource`] and a recording
//! [`PowerControl`], so the whole publish lifecycle can be exercised without
//! a broker or real sensors.

use crate::broker::BrokerHandle;
use crate::control::{PowerAction, PowerControl};
use crate::metrics::{MetricError, MetricResult, MetricSource, Mount};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{
    ConnectOutcome, ConnectionEvents, DisconnectReason, QoS, RefusalReason, Transport,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A recorded publish
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Default)]
struct MockTransportInner {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    events: Mutex<Option<Arc<dyn ConnectionEvents>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    should_fail: AtomicBool,
}

/// Mock transport; clones share state, so a test can keep one clone and hand
/// the other to a `BrokerConnection`
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` fail
    pub fn set_should_fail(&self, fail: bool) {
        self.inner.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.inner.published).clone()
    }

    /// Publishes to one topic, in order
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    pub fn clear_published(&self) {
        lock(&self.inner.published).clear();
    }

    /// Subscribed topics in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner.subscriptions).clone()
    }

    fn events(&self) -> Option<Arc<dyn ConnectionEvents>> {
        // Cloned out so callbacks can re-enter the transport
        lock(&self.inner.events).clone()
    }

    /// Simulate an accepted CONNACK
    pub fn connect(&self) {
        if let Some(events) = self.events() {
            events.on_connect(ConnectOutcome::Accepted);
        }
    }

    /// Simulate a refused CONNACK
    pub fn refuse(&self, reason: RefusalReason) {
        if let Some(events) = self.events() {
            events.on_connect(ConnectOutcome::Refused(reason));
        }
    }

    /// Simulate the broker or network dropping the session
    pub fn drop_connection(&self) {
        if let Some(events) = self.events() {
            events.on_disconnect(DisconnectReason::Transport(
                "connection reset by peer".to_string(),
            ));
        }
    }

    /// Simulate the driver starting reconnect attempt `attempt`
    pub fn retry(&self, attempt: u32) {
        if let Some(events) = self.events() {
            events.on_connecting(attempt);
        }
    }

    /// Simulate an inbound message
    pub fn deliver(&self, topic: &str, payload: &str, retain: bool) {
        if let Some(events) = self.events() {
            events.on_message(topic, payload.as_bytes(), retain);
        }
    }
}

impl Transport for MockTransport {
    fn start(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), MqttError> {
        if self.inner.should_fail.load(Ordering::SeqCst) {
            return Err(MqttError::NoRuntime);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(MqttError::AlreadyStarted);
        }
        *lock(&self.inner.events) = Some(events);
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        lock(&self.inner.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
        lock(&self.inner.subscriptions).push(topic.to_string());
        Ok(())
    }

    fn stop(&self) -> Result<(), MqttError> {
        self.inner.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock broker handle, connected on session 1 unless told otherwise
pub struct MockBrokerHandle {
    published: Mutex<Vec<PublishedMessage>>,
    liveness: Mutex<Vec<String>>,
    connected: AtomicBool,
    stopped: AtomicBool,
    reject_retained: AtomicBool,
    session: AtomicU64,
}

impl Default for MockBrokerHandle {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            liveness: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            reject_retained: AtomicBool::new(false),
            session: AtomicU64::new(1),
        }
    }
}

impl MockBrokerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail retained publishes the way a full request queue would
    pub fn set_reject_retained(&self, reject: bool) {
        self.reject_retained.store(reject, Ordering::SeqCst);
    }

    pub fn set_session(&self, session: u64) {
        self.session.store(session, Ordering::SeqCst);
    }

    /// Publishes other than `publish_liveness`
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn clear_published(&self) {
        lock(&self.published).clear();
    }

    /// Payloads passed to `publish_liveness`
    pub fn liveness_payloads(&self) -> Vec<String> {
        lock(&self.liveness).clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        let state = self.connection_state();
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }
}

impl BrokerHandle for MockBrokerHandle {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.ensure_connected()?;
        if retain && self.reject_retained.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed {
                topic: topic.to_string(),
                source: "request queue full".into(),
            });
        }
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    fn publish_liveness(&self, payload: &str) -> Result<(), MqttError> {
        self.ensure_connected()?;
        lock(&self.liveness).push(payload.to_string());
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        if self.stopped.load(Ordering::SeqCst) {
            ConnectionState::Disconnected
        } else if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Lost
        }
    }

    fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Result<(), MqttError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MockMetricValues {
    disks: Vec<Mount>,
    disk_usage: BTreeMap<String, f64>,
    cpu_temperature: Option<f64>,
    cpu_usage: f64,
    memory_usage: f64,
    fan_speed: Option<f64>,
    disk_temperatures: BTreeMap<String, f64>,
}

/// Scripted metric source
///
/// Defaults: `/` and `/media/usb` mounted with no usage figures, CPU at
/// 45.0 °C and 12.5 %, memory at 40.0 %, no fan, no disk temperatures.
pub struct MockMetricSource {
    values: Mutex<MockMetricValues>,
    samples: AtomicU64,
}

impl Default for MockMetricSource {
    fn default() -> Self {
        Self {
            values: Mutex::new(MockMetricValues {
                disks: vec![
                    Mount::mounted("sysroot", "/"),
                    Mount::mounted("usb", "/media/usb"),
                ],
                disk_usage: BTreeMap::new(),
                cpu_temperature: Some(45.0),
                cpu_usage: 12.5,
                memory_usage: 40.0,
                fan_speed: None,
                disk_temperatures: BTreeMap::new(),
            }),
            samples: AtomicU64::new(0),
        }
    }
}

impl MockMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_disks(&self, disks: Vec<Mount>) {
        lock(&self.values).disks = disks;
    }

    pub fn set_disk_usage(&self, target: &str, percent: f64) {
        lock(&self.values)
            .disk_usage
            .insert(target.to_string(), percent);
    }

    pub fn set_cpu_usage(&self, percent: f64) {
        lock(&self.values).cpu_usage = percent;
    }

    pub fn set_memory_usage(&self, percent: f64) {
        lock(&self.values).memory_usage = percent;
    }

    /// Make the CPU temperature sensor unavailable
    pub fn fail_cpu_temperature(&self) {
        lock(&self.values).cpu_temperature = None;
    }

    pub fn set_fan_speed(&self, percent: Option<f64>) {
        lock(&self.values).fan_speed = percent;
    }

    pub fn set_disk_temperature(&self, device: &str, celsius: f64) {
        lock(&self.values)
            .disk_temperatures
            .insert(device.to_string(), celsius);
    }

    /// Number of `sample_disks` calls so far
    pub fn disk_samples(&self) -> u64 {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for MockMetricSource {
    async fn sample_disks(&self) -> MetricResult<Vec<Mount>> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.values).disks.clone())
    }

    async fn disk_usage(&self, mount: &Mount) -> MetricResult<f64> {
        lock(&self.values)
            .disk_usage
            .get(&mount.target)
            .copied()
            .ok_or_else(|| MetricError::unavailable(format!("disk usage of {}", mount.label)))
    }

    async fn cpu_usage(&self) -> MetricResult<f64> {
        Ok(lock(&self.values).cpu_usage)
    }

    async fn cpu_temperature(&self) -> MetricResult<f64> {
        lock(&self.values)
            .cpu_temperature
            .ok_or_else(|| MetricError::unavailable("cpu temperature"))
    }

    async fn memory_usage(&self) -> MetricResult<f64> {
        Ok(lock(&self.values).memory_usage)
    }

    async fn fan_speed(&self) -> MetricResult<Option<f64>> {
        Ok(lock(&self.values).fan_speed)
    }

    async fn disk_temperatures(&self) -> MetricResult<BTreeMap<String, f64>> {
        Ok(lock(&self.values).disk_temperatures.clone())
    }
}

/// Records power actions instead of performing them
#[derive(Debug, Default)]
pub struct MockPowerControl {
    executed: Mutex<Vec<PowerAction>>,
}

impl MockPowerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<PowerAction> {
        lock(&self.executed).clone()
    }
}

impl PowerControl for MockPowerControl {
    fn execute(&self, action: PowerAction) {
        lock(&self.executed).push(action);
    }
}
