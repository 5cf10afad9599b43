//! Process-wide connectivity state
//!
//! Builds the action channel, the session supervisor and the link supervisor
//! in dependency order and wires the session to the link's edges. Everything
//! else receives these through the context instead of reaching for globals.

use crate::action::ActionChannel;
use crate::config::{AgentConfig, ConfigError};
use crate::link::{LinkCredentials, LinkPolicy, LinkSupervisor, NetworkCapability};
use crate::session::{SessionSettings, SessionSupervisor};
use crate::transport::MessagingCapability;
use std::sync::Arc;

#[derive(Clone)]
pub struct ConnectivityContext {
    pub actions: Arc<ActionChannel>,
    pub session: Arc<SessionSupervisor>,
    pub link: Arc<LinkSupervisor>,
}

impl ConnectivityContext {
    /// Initialization order: action channel, session, link. The session is
    /// registered as a link observer before the link can raise any edge.
    pub fn new(
        credentials: LinkCredentials,
        policy: LinkPolicy,
        network: Arc<dyn NetworkCapability>,
        messaging: Arc<dyn MessagingCapability>,
        settings: SessionSettings,
    ) -> Self {
        let actions = Arc::new(ActionChannel::new());
        let session = SessionSupervisor::new(messaging, Arc::clone(&actions), settings);
        let link = LinkSupervisor::new(credentials, network, policy);
        link.subscribe(session.clone());

        Self {
            actions,
            session,
            link,
        }
    }

    pub fn from_config(
        config: &AgentConfig,
        network: Arc<dyn NetworkCapability>,
        messaging: Arc<dyn MessagingCapability>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.link_credentials()?,
            LinkPolicy::from_config(&config.link),
            network,
            messaging,
            SessionSettings::from_config(config),
        ))
    }
}
