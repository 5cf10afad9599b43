//! Wire-level vocabulary shared by the supervisors and producers
//!
//! Topic names, topic-filter matching, outbound payload construction and
//! inbound command recognition.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
