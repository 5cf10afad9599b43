//! Observability for the device agent
//!
//! Structured logging and process-wide counters. There is no remote
//! observability endpoint; logs and metric snapshots are the whole surface.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{link_span, producer_span, session_span};
