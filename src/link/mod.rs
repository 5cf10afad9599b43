//! Wireless link supervision
//!
//! The [`LinkSupervisor`] drives a [`NetworkCapability`] through the attach
//! state machine in [`state`] and raises [`LinkEvent`]s to registered
//! [`LinkObserver`]s. [`host::HostNetwork`] is the capability used when the
//! agent runs on a general-purpose host.

pub mod host;
pub mod state;
pub mod supervisor;

pub use host::HostNetwork;
pub use state::{AttachAttempt, AttachTicket, LinkDirective, LinkEvent, LinkMachine, LinkSignal, LinkState};
pub use supervisor::{LinkPolicy, LinkSupervisor};

use crate::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Minimum authentication mode accepted from an access point.
///
/// Variants are ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    Open,
    Wep,
    WpaPsk,
    #[default]
    Wpa2Psk,
    Wpa2Wpa3Psk,
    Wpa3Psk,
}

impl SecurityMode {
    /// Whether an access point offering `offered` satisfies this threshold
    pub fn accepts(self, offered: SecurityMode) -> bool {
        offered >= self
    }
}

/// Network name, passphrase and security threshold for the attach
#[derive(Clone)]
pub struct LinkCredentials {
    ssid: String,
    psk: String,
    min_security: SecurityMode,
}

impl LinkCredentials {
    pub fn new(ssid: impl Into<String>, psk: impl Into<String>, min_security: SecurityMode) -> Self {
        Self {
            ssid: ssid.into(),
            psk: psk.into(),
            min_security,
        }
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn psk(&self) -> &str {
        &self.psk
    }

    pub fn min_security(&self) -> SecurityMode {
        self.min_security
    }
}

impl fmt::Debug for LinkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkCredentials")
            .field("ssid", &self.ssid)
            .field("psk", &"<redacted>")
            .field("min_security", &self.min_security)
            .finish()
    }
}

/// Handle given to a [`NetworkCapability`] so it can report link loss after
/// a successful attach.
#[derive(Debug, Clone)]
pub struct LinkNotifier {
    inbox: mpsc::UnboundedSender<LinkSignal>,
}

impl LinkNotifier {
    pub(crate) fn new(inbox: mpsc::UnboundedSender<LinkSignal>) -> Self {
        Self { inbox }
    }

    /// Report that the link went away; false once the supervisor has stopped
    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.send(LinkSignal::Disconnected(reason.into()))
    }

    /// Resolves once the supervisor loop has stopped listening
    pub async fn closed(&self) {
        self.inbox.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    pub(crate) fn attach_succeeded(&self, ticket: AttachTicket) {
        let _ = self.send(LinkSignal::AttachSucceeded(ticket));
    }

    pub(crate) fn attach_failed(&self, ticket: AttachTicket, reason: impl Into<String>) {
        let _ = self.send(LinkSignal::AttachFailed(ticket, reason.into()));
    }

    fn send(&self, signal: LinkSignal) -> bool {
        if self.inbox.send(signal).is_err() {
            tracing::debug!("Link supervisor stopped, dropping network notification");
            return false;
        }
        true
    }
}

/// Platform facility that performs a wireless attach.
///
/// `attach` resolves once the attempt is settled: `Ok` when the link is up,
/// `Err` when the attempt was refused or timed out. Later losses are reported
/// through the [`LinkNotifier`].
#[async_trait]
pub trait NetworkCapability: Send + Sync {
    async fn attach(
        &self,
        credentials: &LinkCredentials,
        notifier: LinkNotifier,
    ) -> Result<(), AgentError>;
}

/// Receiver of link edges.
///
/// Called synchronously from the supervisor while the transition is in
/// progress: `Lost` before the link leaves `Attached`, `Up` after it enters
/// `Attached`. Implementations must not block and must not call back into
/// state-changing [`LinkSupervisor`] methods.
pub trait LinkObserver: Send + Sync {
    fn on_link_event(&self, event: &LinkEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_threshold() {
        assert!(SecurityMode::Wpa2Psk.accepts(SecurityMode::Wpa2Psk));
        assert!(SecurityMode::Wpa2Psk.accepts(SecurityMode::Wpa3Psk));
        assert!(!SecurityMode::Wpa2Psk.accepts(SecurityMode::WpaPsk));
        assert!(SecurityMode::Open.accepts(SecurityMode::Open));
    }

    #[test]
    fn test_security_mode_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: SecurityMode,
        }
        let parsed: Wrapper = toml::from_str(r#"mode = "wpa2-wpa3-psk""#).unwrap();
        assert_eq!(parsed.mode, SecurityMode::Wpa2Wpa3Psk);
        assert_eq!(SecurityMode::default(), SecurityMode::Wpa2Psk);
    }

    #[test]
    fn test_credentials_debug_redacts_psk() {
        let credentials = LinkCredentials::new("LiB", "hunter22", SecurityMode::Wpa2Psk);
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("LiB"));
        assert!(!rendered.contains("hunter22"));
    }
}
