//! Payload producers
//!
//! Periodic telemetry producers and the remote-controlled actuator. Both
//! publish through the session supervisor and never touch the transport
//! directly.

pub mod actuator;
pub mod producer;
pub mod sampler;

pub use actuator::{ActuationReport, Actuator};
pub use producer::TelemetryProducer;
pub use sampler::{sampler_for, Sampler, SyntheticSampler};
