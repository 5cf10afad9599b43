//! Pure routing of rumqttc events
//!
//! Classifies each event from the rumqttc event loop so the client loop only
//! has to act on the decision.

use crate::transport::TransportEvent;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, SubscribeReasonCode};
use rumqttc::v5::Event;

/// What the client loop should do with one event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the (re)connect
    ConnectionAcknowledged,
    /// Inbound publish
    MessageReceived { topic: String, payload: Bytes },
    /// Broker sent a disconnect
    Disconnected,
    /// Subscription acknowledged
    SubscriptionConfirmed { packet_id: u16 },
    /// Broker refused one or more filters of a subscribe
    SubscriptionRejected { packet_id: u16, reason: String },
    /// Broker refused a QoS 1 publish
    PublishRejected { packet_id: u16, reason: String },
    /// Other incoming packets (pings, acks)
    InfrastructureEvent(String),
    /// Outgoing packet notification
    OutgoingEvent,
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route a rumqttc event (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => {
                    let refused = suback
                        .return_codes
                        .iter()
                        .find(|code| !matches!(code, SubscribeReasonCode::Success(_)));
                    match refused {
                        Some(code) => EventRoute::SubscriptionRejected {
                            packet_id: suback.pkid,
                            reason: format!("{code:?}"),
                        },
                        None => EventRoute::SubscriptionConfirmed {
                            packet_id: suback.pkid,
                        },
                    }
                }
                Packet::PubAck(puback)
                    if !matches!(
                        puback.reason,
                        PubAckReason::Success | PubAckReason::NoMatchingSubscribers
                    ) =>
                {
                    EventRoute::PublishRejected {
                        packet_id: puback.pkid,
                        reason: format!("{:?}", puback.reason),
                    }
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Event to hand to the session supervisor, if any.
    ///
    /// `established` is false until the first acknowledgement of a session;
    /// that one completes the connect call and is not forwarded.
    pub fn transport_event(route: &EventRoute, established: bool) -> Option<TransportEvent> {
        match route {
            EventRoute::ConnectionAcknowledged if established => Some(TransportEvent::Connected),
            EventRoute::MessageReceived { topic, payload } => Some(TransportEvent::Message {
                topic: topic.clone(),
                body: payload.clone(),
            }),
            EventRoute::Disconnected if established => Some(TransportEvent::Disconnected {
                reason: "broker sent disconnect".to_string(),
            }),
            EventRoute::SubscriptionRejected { packet_id, reason } => Some(TransportEvent::Error {
                reason: format!("subscribe {packet_id} refused: {reason}"),
            }),
            EventRoute::PublishRejected { packet_id, reason } => Some(TransportEvent::Error {
                reason: format!("publish {packet_id} refused: {reason}"),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, PubAck, Publish, SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_publish() {
        let event = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("v1/devices/me/rpc/request/5"),
            pkid: 0,
            payload: Bytes::from("ON"),
            properties: None,
        }));

        let route = MessageHandler::route_mqtt_event(&event);
        assert_eq!(
            route,
            EventRoute::MessageReceived {
                topic: "v1/devices/me/rpc/request/5".to_string(),
                payload: Bytes::from_static(b"ON"),
            }
        );
        assert_eq!(
            MessageHandler::transport_event(&route, false),
            Some(TransportEvent::Message {
                topic: "v1/devices/me/rpc/request/5".to_string(),
                body: Bytes::from_static(b"ON"),
            })
        );
    }

    #[test]
    fn test_route_broker_disconnect() {
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        let route = MessageHandler::route_mqtt_event(&event);
        assert_eq!(route, EventRoute::Disconnected);
        assert!(matches!(
            MessageHandler::transport_event(&route, true),
            Some(TransportEvent::Disconnected { .. })
        ));
    }

    #[test]
    fn test_refused_subscription_is_a_transport_error() {
        let event = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 4,
            return_codes: vec![SubscribeReasonCode::NotAuthorized],
            properties: None,
        }));
        let route = MessageHandler::route_mqtt_event(&event);
        assert_eq!(
            route,
            EventRoute::SubscriptionRejected {
                packet_id: 4,
                reason: "NotAuthorized".to_string(),
            }
        );
        assert_eq!(
            MessageHandler::transport_event(&route, true),
            Some(TransportEvent::Error {
                reason: "subscribe 4 refused: NotAuthorized".to_string()
            })
        );
    }

    #[test]
    fn test_granted_subscription_is_confirmed() {
        let event = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 2,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::SubscriptionConfirmed { packet_id: 2 }
        );
    }

    #[test]
    fn test_refused_publish_is_a_transport_error() {
        let refused = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 9,
            reason: PubAckReason::QuotaExceeded,
            properties: None,
        }));
        let route = MessageHandler::route_mqtt_event(&refused);
        assert!(matches!(
            MessageHandler::transport_event(&route, true),
            Some(TransportEvent::Error { .. })
        ));

        // No subscribers is not a failure for telemetry
        let unheard = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 10,
            reason: PubAckReason::NoMatchingSubscribers,
            properties: None,
        }));
        let route = MessageHandler::route_mqtt_event(&unheard);
        assert_eq!(MessageHandler::transport_event(&route, true), None);
    }

    #[test]
    fn test_first_connack_not_forwarded() {
        let route = EventRoute::ConnectionAcknowledged;
        assert_eq!(MessageHandler::transport_event(&route, false), None);
        assert_eq!(
            MessageHandler::transport_event(&route, true),
            Some(TransportEvent::Connected)
        );
    }

    #[test]
    fn test_infrastructure_events_not_forwarded() {
        assert_eq!(
            MessageHandler::transport_event(&EventRoute::OutgoingEvent, true),
            None
        );
        assert_eq!(
            MessageHandler::transport_event(&EventRoute::SubscriptionConfirmed { packet_id: 1 }, true),
            None
        );
    }
}
