use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Suffix appended to OAuth2 usernames that are not email-shaped; the push
/// server expects a JID.
const FAKE_JID_SUFFIX: &str = "@jid.vigil-sync.net";

/// Suffix used to synthesize an email for legacy accounts that lack one.
const FALLBACK_EMAIL_SUFFIX: &str = "@push.vigil-sync.net";

/// Which credential machinery backs the session. Selected once at
/// construction; never branched on elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialVariant {
    Oauth2,
    Legacy,
}

/// Short-lived secret presented to the push transport. Never persisted, never
/// exposed to handlers.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expiry: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expiry,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// OAuth2 session backend (external collaborator): session-state observation
/// plus the asynchronous token exchange.
#[async_trait]
pub trait OauthSessionBackend: Send + Sync {
    /// True while a session exists and is in its "in progress" sub-state.
    fn session_in_progress(&self) -> bool;

    fn username(&self) -> Option<String>;

    async fn request_access_token(&self) -> Result<AccessToken, CredentialError>;

    /// Drops the token from the backend's cache so the next request returns
    /// a fresh one instead of the same rejected token.
    fn invalidate_access_token(&self, token: &AccessToken);
}

/// Legacy account backend (external collaborator): login state plus
/// per-request signed-header generation.
#[async_trait]
pub trait LegacyAccountBackend: Send + Sync {
    fn is_logged_in(&self) -> bool;

    fn user_email(&self) -> Option<String>;

    fn user_name(&self) -> String;

    /// Generates a signed auth header to present as the channel token.
    async fn signed_auth_header(&self) -> Result<String, CredentialError>;
}

/// "Can we start a session right now, and what identity/token do we
/// present?" One concrete implementation per [`CredentialVariant`].
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn variant(&self) -> CredentialVariant;

    fn is_ready(&self) -> bool;

    /// The identity presented to the channel, or `None` when signed out.
    fn channel_username(&self) -> Option<String>;

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError>;

    /// Invalidates a cached token in the backend before re-requesting. Only
    /// meaningful for the OAuth2 variant.
    fn invalidate_token(&self, _token: &AccessToken) {}
}

pub struct OauthCredentialSource {
    backend: Arc<dyn OauthSessionBackend>,
}

impl OauthCredentialSource {
    pub fn new(backend: Arc<dyn OauthSessionBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl CredentialSource for OauthCredentialSource {
    fn variant(&self) -> CredentialVariant {
        CredentialVariant::Oauth2
    }

    fn is_ready(&self) -> bool {
        self.backend.session_in_progress()
    }

    fn channel_username(&self) -> Option<String> {
        let username = self.backend.username()?;
        if username.contains('@') {
            Some(username)
        } else {
            Some(format!("{username}{FAKE_JID_SUFFIX}"))
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError> {
        self.backend.request_access_token().await
    }

    fn invalidate_token(&self, token: &AccessToken) {
        self.backend.invalidate_access_token(token);
    }
}

pub struct LegacyCredentialSource {
    backend: Arc<dyn LegacyAccountBackend>,
}

impl LegacyCredentialSource {
    pub fn new(backend: Arc<dyn LegacyAccountBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl CredentialSource for LegacyCredentialSource {
    fn variant(&self) -> CredentialVariant {
        CredentialVariant::Legacy
    }

    fn is_ready(&self) -> bool {
        self.backend.is_logged_in()
    }

    fn channel_username(&self) -> Option<String> {
        match self.backend.user_email() {
            Some(email) if !email.is_empty() => Some(email),
            _ => Some(format!(
                "{}{FALLBACK_EMAIL_SUFFIX}",
                self.backend.user_name()
            )),
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError> {
        let header = self.backend.signed_auth_header().await?;
        Ok(AccessToken::new(header, None))
    }
}
