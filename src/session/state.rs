//! Session lifecycle states

use std::fmt;

/// Messaging session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session and none requested
    Down,
    /// Connect in flight, or the broker connection is being restored
    Connecting,
    /// Session open; publishes are accepted
    Ready,
    /// Tearing down after link loss
    Closing,
}

impl SessionState {
    pub fn can_publish(self) -> bool {
        self == SessionState::Ready
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Down => "down",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}
