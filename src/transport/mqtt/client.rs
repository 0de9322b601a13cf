//! Impure I/O operations for the MQTT transport
//!
//! This module owns the `rumqttc` client and the spawned task that drives its
//! event loop. The driver polls the loop, turns every event into a
//! [`ConnectionEvents`] callback, and sleeps with exponential backoff between
//! failed polls; `rumqttc` reconnects on the next poll after an error.

use super::connection::{
    configure_mqtt_options, ConnectionConfig, LivenessConfig, MqttError, ReconnectConfig,
};
use super::health_monitor::{HealthMonitor, ReconnectionDecision};
use super::message_handler::{ErrorRoute, EventRoute, MessageHandler};
use crate::transport::{ConnectOutcome, ConnectionEvents, DisconnectReason, Transport};
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the request channel between the client and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// How long a clean disconnect may take to flush before the driver gives up
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT transport backed by `rumqttc`
pub struct MqttTransport {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    reconnect_config: ReconnectConfig,
    shutdown_tx: watch::Sender<bool>,
    driver_handle: Mutex<Option<JoinHandle<()>>>,
    broker: String,
}

impl MqttTransport {
    /// Create the client and its (not yet running) event loop
    pub fn new(config: &ConnectionConfig, liveness: Option<&LivenessConfig>) -> Self {
        let mqtt_options = configure_mqtt_options(config, liveness);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            reconnect_config: config.reconnect.clone(),
            shutdown_tx,
            driver_handle: Mutex::new(None),
            broker: format!("{}:{}", config.host, config.port),
        }
    }

    /// Wait for the driver task to finish after `stop()`
    ///
    /// Returns false if it did not finish within `timeout` (the task is aborted).
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let handle = self
            .driver_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(handle) = handle else {
            return true;
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                info!("Event loop task shut down gracefully");
                true
            }
            Ok(Err(e)) => {
                if !e.is_cancelled() {
                    warn!("Event loop task ended with error: {}", e);
                }
                true
            }
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                abort.abort();
                false
            }
        }
    }

    /// Drive the event loop until shutdown
    async fn drive(
        mut event_loop: EventLoop,
        events: Arc<dyn ConnectionEvents>,
        reconnect_config: ReconnectConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut failed_attempts = 0u32;

        if *shutdown_rx.borrow_and_update() {
            return;
        }

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        Self::drain(&mut event_loop).await;
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            if !Self::process_event_route(
                                MessageHandler::route_mqtt_event(&event),
                                events.as_ref(),
                                &mut failed_attempts,
                            ) {
                                break;
                            }
                        }
                        Err(error) => {
                            match MessageHandler::route_connection_error(&error) {
                                ErrorRoute::Refused(outcome) => events.on_connect(outcome),
                                ErrorRoute::SessionEnded(reason) => events.on_disconnect(reason),
                            }

                            let decision = HealthMonitor::should_attempt_reconnection(
                                failed_attempts,
                                &reconnect_config,
                                *shutdown_rx.borrow(),
                            );
                            match decision {
                                ReconnectionDecision::Proceed { attempt, delay } => {
                                    failed_attempts = attempt;
                                    debug!("Reconnecting in {:?} (attempt {})", delay, attempt);
                                    let rx = shutdown_rx.clone();
                                    if !Self::interruptible_sleep(rx, delay).await {
                                        break;
                                    }
                                    events.on_connecting(attempt);
                                }
                                ReconnectionDecision::AbortShutdownRequested => break,
                            }
                        }
                    }
                }
            }
        }

        info!("MQTT event loop stopped");
    }

    /// Act on a routed event; returns false to stop the driver
    fn process_event_route(
        route: EventRoute,
        events: &dyn ConnectionEvents,
        failed_attempts: &mut u32,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                *failed_attempts = 0;
                events.on_connect(ConnectOutcome::Accepted);
                true
            }
            EventRoute::ConnectionRefused(outcome) => {
                events.on_connect(outcome);
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                events.on_message(&topic, &payload, retain);
                true
            }
            EventRoute::Disconnected => {
                events.on_disconnect(DisconnectReason::BrokerClosed);
                true
            }
            EventRoute::ClientDisconnectSent => false,
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Keep polling until our DISCONNECT has been written or the loop fails
    async fn drain(event_loop: &mut EventLoop) {
        let flushed = tokio::time::timeout(DRAIN_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        if MessageHandler::route_mqtt_event(&event)
                            == EventRoute::ClientDisconnectSent
                        {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Timed out flushing DISCONNECT to broker");
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => {
                true
            }
        }
    }
}

impl Transport for MqttTransport {
    fn start(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), MqttError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MqttError::NoRuntime)?;

        let event_loop = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(MqttError::AlreadyStarted)?;

        info!("Attempting to connect to MQTT broker at {}", self.broker);

        let handle = runtime.spawn(Self::drive(
            event_loop,
            events,
            self.reconnect_config.clone(),
            self.shutdown_tx.subscribe(),
        ));

        *self
            .driver_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| MqttError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.client
            .try_subscribe(topic, qos)
            .map_err(|e| MqttError::SubscriptionFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    fn stop(&self) -> Result<(), MqttError> {
        let result = self
            .client
            .try_disconnect()
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)));

        // Signal the driver even if the DISCONNECT could not be queued
        self.shutdown_tx.send_replace(true);
        info!("Sent shutdown signal to event loop");
        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);

        // We can't flush in Drop, callers use stop() and wait_stopped() for that
        if let Some(handle) = self
            .driver_handle
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
