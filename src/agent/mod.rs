//! Device agent assembly
//!
//! [`ConnectivityContext`] wires the supervisors together; [`DeviceAgent`]
//! runs them alongside the producers.

pub mod context;
pub mod lifecycle;

pub use context::ConnectivityContext;
pub use lifecycle::{DeviceAgent, LifecycleError};
