//! Device Agent
//!
//! Connectivity supervisor and telemetry agent for a small networked device
//! reporting to an MQTT telemetry broker.
//!
//! # Overview
//!
//! The agent is layered the way the device comes up:
//! - [`link`]: wireless attach state machine with a bounded retry budget
//! - [`session`]: messaging session that follows the link's up/down edges
//! - [`action`]: single-slot register carrying remote commands to the actuator
//! - [`telemetry`]: periodic producers and the remote-controlled actuator
//! - [`agent`]: assembly of the above with a start/shutdown lifecycle
//!
//! Platform facilities (radio, broker client, output pins) sit behind the
//! [`link::NetworkCapability`], [`transport::MessagingCapability`] and
//! [`hardware::PinDriver`] traits so the supervisors can be driven by mocks.
//!
//! # Quick Start
//!
//! ```rust
//! use device_agent::protocol::{parse_command, ActionKind, QoS, TelemetryPayload, TELEMETRY_TOPIC};
//! use serde_json::json;
//!
//! // Outbound telemetry is a flat JSON object with a single field
//! let payload = TelemetryPayload::single_field(TELEMETRY_TOPIC, "temperature", json!(30), QoS::AtMostOnce, false);
//! assert_eq!(&payload.body()[..], br#"{"temperature":30}"#);
//!
//! // Inbound RPC requests carrying the ON token become actions
//! assert_eq!(parse_command(br#"{"method":"setState","params":"ON"}"#), Some(ActionKind::TurnOn));
//! ```

pub mod action;
pub mod agent;
pub mod config;
pub mod error;
pub mod hardware;
pub mod link;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use action::ActionChannel;
pub use agent::{ConnectivityContext, DeviceAgent, LifecycleError};
pub use config::*;
pub use error::{AgentError, AgentResult};
pub use link::{LinkEvent, LinkState, LinkSupervisor};
pub use protocol::*;
pub use session::{SessionState, SessionSupervisor};
pub use transport::mqtt::MqttMessaging;
