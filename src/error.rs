//! Error taxonomy for the device agent
//!
//! Every failure in the agent is local and non-fatal. Errors are returned to the
//! immediate caller, logged, counted, and then dropped; nothing here halts the
//! process.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for device agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// The network layer refused or timed out an attach request
    #[error("Attach failed: {message}")]
    AttachFailure { message: String },

    /// The messaging layer refused the session connect
    #[error("Session connect failed: {message}")]
    SessionConnectFailure { message: String },

    /// A publish was attempted while the session was not Ready
    #[error("Session not ready")]
    SessionNotReady,

    /// Inbound payload did not carry a recognised command token
    #[error("Malformed command on topic {topic}")]
    MalformedCommand { topic: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AgentError {
    /// Create attach failure error
    pub fn attach_failure<S: Into<String>>(message: S) -> Self {
        Self::AttachFailure {
            message: message.into(),
        }
    }

    /// Create session connect failure error
    pub fn session_connect_failure<S: Into<String>>(message: S) -> Self {
        Self::SessionConnectFailure {
            message: message.into(),
        }
    }

    /// Create malformed command error
    pub fn malformed_command<S: Into<String>>(topic: S) -> Self {
        Self::MalformedCommand {
            topic: topic.into(),
        }
    }

    /// Create transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error means "dropped because the session was down"
    pub fn is_not_ready(&self) -> bool {
        matches!(self, AgentError::SessionNotReady)
    }

    /// Error text with credentials redacted, safe for log output
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|psk)[=:]\s*\S+").expect("valid secret pattern")
});

static MQTT_USERINFO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(mqtts?://)[^@/\s]+@").expect("valid userinfo pattern"));

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credentials from an error message and cap its length.
///
/// Device access tokens travel as MQTT usernames and Wi-Fi keys are plain
/// strings, so both can surface in transport error text.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = MQTT_USERINFO_PATTERN
        .replace_all(&sanitized, "${1}***@")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
