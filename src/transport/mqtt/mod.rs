//! MQTT implementation of the messaging capability
//!
//! - [`connection`] - pure option building, errors and reconnect schedule
//! - [`message_handler`] - pure routing of rumqttc events
//! - [`client`] - the event loop task and session handle

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttMessaging, MqttSession};
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use message_handler::{EventRoute, MessageHandler};
