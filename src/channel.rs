use crate::config::{ChannelSettings, DEFAULT_PUSH_HOST, DEFAULT_PUSH_PORT};
use crate::credentials::CredentialVariant;
use crate::error::ChannelError;
use crate::invalidation::{InvalidationMap, ObjectIdSet};
use crate::state::InvalidatorStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Auth mechanism strings presented to the push server.
pub const AUTH_MECHANISM_OAUTH2: &str = "X-OAUTH2";
pub const AUTH_MECHANISM_SIGNED_TOKEN: &str = "X-SIGNED-TOKEN";

/// Which transport carries invalidations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    PushClient,
    Gcm,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChannelKind::PushClient => "push_client",
            ChannelKind::Gcm => "gcm",
        })
    }
}

/// Pure function of configuration; defaults to the push client.
pub fn select_channel_kind(settings: &ChannelSettings) -> ChannelKind {
    if settings.use_gcm {
        ChannelKind::Gcm
    } else {
        ChannelKind::PushClient
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolved description of how to reach the push transport. Recomputed from
/// settings whenever the channel is (re)built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub host_port: HostPort,
    pub fallback_port: u16,
    pub auth_mechanism: &'static str,
    pub allow_insecure: bool,
}

impl ChannelConfig {
    pub fn resolve(
        kind: ChannelKind,
        settings: &ChannelSettings,
        variant: CredentialVariant,
    ) -> Self {
        let mut host_port = HostPort {
            host: DEFAULT_PUSH_HOST.to_string(),
            port: DEFAULT_PUSH_PORT,
        };
        if let Some(raw) = settings.host_port.as_deref() {
            apply_host_port_override(&mut host_port, raw);
        }

        let auth_mechanism = match variant {
            CredentialVariant::Oauth2 => AUTH_MECHANISM_OAUTH2,
            CredentialVariant::Legacy => AUTH_MECHANISM_SIGNED_TOKEN,
        };

        debug!(
            kind = %kind,
            host_port = %host_port,
            fallback_port = settings.fallback_port,
            auth_mechanism,
            allow_insecure = settings.allow_insecure,
            "resolved channel config"
        );

        Self {
            host_port,
            fallback_port: settings.fallback_port,
            auth_mechanism,
            allow_insecure: settings.allow_insecure,
        }
    }
}

/// Applies a `host[:port]` override. A bare host keeps the default port; a
/// malformed port (unparseable or zero) leaves the whole default untouched.
fn apply_host_port_override(target: &mut HostPort, raw: &str) {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => {
            target.host = (*host).to_string();
        }
        [host, port] if !host.is_empty() => {
            if let Ok(port) = port.parse::<u16>()
                && port != 0
            {
                target.host = (*host).to_string();
                target.port = port;
            }
        }
        _ => {}
    }
}

/// Identity and bootstrap material handed to a freshly built invalidator,
/// pulled from the persisted state tracker at start.
#[derive(Debug, Clone)]
pub struct InvalidatorContext {
    pub client_id: String,
    pub saved_invalidations: InvalidationMap,
    pub bootstrap_data: Vec<u8>,
    pub user_agent: String,
}

/// The underlying transport client. Implementations live outside this crate;
/// the session only drives credentials and the registered-id set.
pub trait Invalidator: Send {
    fn update_credentials(&mut self, username: &str, token: &str);

    /// Pushes the consolidated registered-id union down to the transport. A
    /// failure here means the transport's view has desynchronized from the
    /// registrar, which callers treat as fatal.
    fn update_registered_ids(&mut self, ids: &ObjectIdSet) -> Result<(), ChannelError>;
}

/// Events flowing back up from the transport. The session actor installs
/// itself as the sole listener when it builds a channel.
pub trait InvalidatorEvents: Send + Sync {
    fn on_state_change(&self, status: InvalidatorStatus);
    fn on_incoming_invalidation(&self, invalidations: InvalidationMap);
}

/// Builds transport clients. Injected by the embedder; the session never
/// constructs a transport directly.
pub trait ChannelFactory: Send + Sync {
    fn create(
        &self,
        kind: ChannelKind,
        config: &ChannelConfig,
        context: InvalidatorContext,
        events: Arc<dyn InvalidatorEvents>,
    ) -> Box<dyn Invalidator>;
}
