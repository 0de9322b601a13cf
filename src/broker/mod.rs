//! Broker connection lifecycle manager
//!
//! [`BrokerConnection`] owns the transport session, tracks
//! [`ConnectionState`], announces liveness, and routes inbound messages
//! through the [`DispatchTable`]. It implements [`ConnectionEvents`], so all
//! state changes happen on the transport's event loop task; the publish
//! scheduler only reads the state.
//!
//! Components that publish or react to control messages see the connection
//! through the object-safe [`BrokerHandle`] trait.

pub mod dispatch;
pub mod liveness;

pub use dispatch::{DispatchTable, InboundMessage, TopicHandler};
pub use liveness::Liveness;

use crate::transport::mqtt::{
    ConnectionConfig, ConnectionEvent, ConnectionState, HealthMonitor, LivenessConfig, MqttError,
    MqttTransport,
};
use crate::transport::{ConnectOutcome, ConnectionEvents, DisconnectReason, QoS, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// QoS used for control topic subscriptions
const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

type ConnectedCallback = Box<dyn FnOnce() + Send>;

/// The view of a broker connection that publishers and handlers need
pub trait BrokerHandle: Send + Sync {
    /// Enqueue a publish; fails fast with `NotConnected` unless Connected.
    ///
    /// When liveness is configured, "online" is re-asserted after every
    /// publish that does not itself target the liveness topic.
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool)
        -> Result<(), MqttError>;

    /// Publish a payload to the liveness topic with its retain flag
    fn publish_liveness(&self, payload: &str) -> Result<(), MqttError>;

    fn connection_state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(&self.connection_state())
    }

    /// Number of accepted connects so far; changes on every new session
    fn session(&self) -> u64;

    /// Disconnect cleanly and stop the transport's event loop
    fn stop(&self) -> Result<(), MqttError>;
}

/// Broker connection over a [`Transport`]
pub struct BrokerConnection<T: Transport> {
    transport: T,
    liveness: Liveness,
    dispatch: DispatchTable,
    state_tx: watch::Sender<ConnectionState>,
    session: AtomicU64,
    stopped: AtomicBool,
    on_connected: Mutex<Option<ConnectedCallback>>,
}

impl BrokerConnection<MqttTransport> {
    /// Build an MQTT connection with credentials and last will set
    pub fn configure(config: &ConnectionConfig, liveness: Option<LivenessConfig>) -> Self {
        let transport = MqttTransport::new(config, liveness.as_ref());
        Self::new(transport, liveness)
    }
}

impl<T: Transport + 'static> BrokerConnection<T> {
    /// Wrap a transport; `liveness` must match the last will the transport
    /// was configured with
    pub fn new(transport: T, liveness: Option<LivenessConfig>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            liveness: Liveness::new(liveness),
            dispatch: DispatchTable::new(),
            state_tx,
            session: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            on_connected: Mutex::new(None),
        }
    }

    /// Begin connecting in the background; returns immediately
    pub fn start(self: &Arc<Self>) -> Result<(), MqttError> {
        self.transition(ConnectionEvent::StartRequested);

        let events: Arc<dyn ConnectionEvents> = Arc::clone(self) as Arc<dyn ConnectionEvents>;
        if let Err(e) = self.transport.start(events) {
            error!("Failed to start MQTT transport: {}", e);
            self.transition(ConnectionEvent::SessionEnded(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Register a handler for a topic filter (safe before `start`)
    ///
    /// Takes effect for subscriptions on the next connect.
    pub fn register<H>(&self, topic: impl Into<String>, handler: H)
    where
        H: TopicHandler + 'static,
    {
        self.dispatch.register(topic, Arc::new(handler));
    }

    /// Set the one-shot callback run after the first accepted connect
    pub fn on_connected<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self
            .on_connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(callback));
    }

    /// Subscribe to connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn transition(&self, event: ConnectionEvent) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.state_tx.send_modify(|state| {
            next = HealthMonitor::determine_next_state(state, &event);
            HealthMonitor::log_state_transition(state, &next, &event);
            *state = next;
        });
        next
    }

    fn subscribe_all(&self) {
        let topics = self.dispatch.topics();
        if topics.is_empty() {
            info!("No topics to subscribe to.");
            return;
        }

        for topic in topics {
            match self.transport.subscribe(&topic, SUBSCRIBE_QOS) {
                Ok(()) => info!("Subscribing to topic: {}", topic),
                Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
            }
        }
    }

    fn run_connected_callback(&self) {
        let callback = self
            .on_connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(callback) = callback {
            debug!("Calling the connected callback");
            callback();
        }
    }
}

impl<T: Transport + 'static> ConnectionEvents for BrokerConnection<T> {
    fn on_connecting(&self, attempt: u32) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.transition(ConnectionEvent::RetryStarted(attempt));
    }

    fn on_connect(&self, outcome: ConnectOutcome) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        match outcome {
            ConnectOutcome::Accepted => {
                self.transition(ConnectionEvent::ConnAckAccepted);
                let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Broker session {} established", session);

                self.subscribe_all();
                if let Err(e) = self.liveness.announce_online(&self.transport) {
                    error!("Failed to publish liveness: {}", e);
                }
                self.run_connected_callback();
            }
            ConnectOutcome::Refused(reason) => {
                self.transition(ConnectionEvent::ConnAckRefused(reason));
            }
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.transition(ConnectionEvent::SessionEnded(reason.to_string()));
    }

    fn on_message(&self, topic: &str, payload: &[u8], retain: bool) {
        let message = InboundMessage::new(topic, payload, retain);
        if !self.dispatch.dispatch(&message, self) {
            info!(
                "Unhandled message - TOPIC: {} PAYLOAD: {}",
                message.topic,
                message.payload_str()
            );
        }
    }
}

impl<T: Transport + 'static> BrokerHandle for BrokerConnection<T> {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let state = self.connection_state();
        if !HealthMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }

        debug!(topic = %topic, retain = retain, "Publishing");
        self.transport.publish(topic, payload, qos, retain)?;

        if self.liveness.needs_reassert(topic) {
            if let Some(config) = self.liveness.config() {
                if let Err(e) = self.liveness.publish(&self.transport, &config.online) {
                    warn!("Failed to re-assert liveness: {}", e);
                }
            }
        }
        Ok(())
    }

    fn publish_liveness(&self, payload: &str) -> Result<(), MqttError> {
        let state = self.connection_state();
        if !HealthMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }
        self.liveness.publish(&self.transport, payload)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Result<(), MqttError> {
        self.stopped.store(true, Ordering::SeqCst);
        let result = self.transport.stop();
        self.transition(ConnectionEvent::StopRequested);
        result
    }
}
