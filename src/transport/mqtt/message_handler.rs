//! Pure routing of `rumqttc` events
//!
//! This module turns raw event loop output into routing decisions; the
//! driver in [`super::client`] acts on them.

use super::connection::refusal_reason;
use crate::transport::{ConnectOutcome, DisconnectReason};
use rumqttc::{ConnectionError, Event, Outgoing, Packet};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match refusal_reason(connack.code) {
                    None => EventRoute::ConnectionAcknowledged,
                    Some(reason) => EventRoute::ConnectionRefused(ConnectOutcome::Refused(reason)),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::ClientDisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Classify an event loop error (pure function)
    ///
    /// A refused CONNACK surfaces as an error from `poll()`; it is reported as
    /// a connect outcome, everything else ends the session.
    pub fn route_connection_error(error: &ConnectionError) -> ErrorRoute {
        match error {
            ConnectionError::ConnectionRefused(code) => match refusal_reason(*code) {
                Some(reason) => ErrorRoute::Refused(ConnectOutcome::Refused(reason)),
                None => ErrorRoute::SessionEnded(DisconnectReason::Transport(error.to_string())),
            },
            _ => ErrorRoute::SessionEnded(DisconnectReason::Transport(error.to_string())),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// CONNACK carried a refusal code
    ConnectionRefused(ConnectOutcome),
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Our own DISCONNECT left the client
    ClientDisconnectSent,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Routing decisions for event loop errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorRoute {
    Refused(ConnectOutcome),
    SessionEnded(DisconnectReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RefusalReason;
    use bytes::Bytes;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_refused_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::BadClientId,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionRefused(ConnectOutcome::Refused(RefusalReason::InvalidClientId))
        );
    }

    #[test]
    fn test_route_publish() {
        let mut publish = Publish::new("s2m/host1/tele/PUBLISH_PERIOD", QoS::AtLeastOnce, "30");
        publish.retain = true;
        let event = Event::Incoming(Packet::Publish(publish));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "s2m/host1/tele/PUBLISH_PERIOD");
                assert_eq!(payload, b"30");
                assert!(retain);
            }
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_route_binary_payload() {
        let mut publish = Publish::new("s2m/host1/callbacks/s2m_quit", QoS::AtLeastOnce, "");
        publish.payload = Bytes::from_static(&[0xff, 0x00, 0x31]);
        let event = Event::Incoming(Packet::Publish(publish));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived { payload, retain, .. } => {
                assert_eq!(payload, vec![0xff, 0x00, 0x31]);
                assert!(!retain);
            }
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnects() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::ClientDisconnectSent
        );
    }

    #[test]
    fn test_route_infrastructure() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::InfrastructureEvent(_)
        ));
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_route_refused_error() {
        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(
            MessageHandler::route_connection_error(&error),
            ErrorRoute::Refused(ConnectOutcome::Refused(RefusalReason::BadCredentials))
        );
    }

    #[test]
    fn test_route_io_error() {
        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            MessageHandler::route_connection_error(&error),
            ErrorRoute::SessionEnded(DisconnectReason::Transport(_))
        ));
    }
}
