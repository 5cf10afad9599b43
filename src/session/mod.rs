//! Messaging session supervision
//!
//! The [`SessionSupervisor`] observes link edges and keeps exactly one
//! messaging session open while the link is attached.

pub mod state;
pub mod supervisor;

pub use state::SessionState;
pub use supervisor::{SessionSettings, SessionSupervisor};
