use thiserror::Error as ThisError;

/// Classification used by the retry path: transient failures are retried
/// under backoff, everything else surfaces as state.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Failure of an access-token (or signed-header) fetch.
#[derive(Debug, Clone, ThisError)]
pub enum CredentialError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("credential service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The backend rejected the identity itself (bad grant, invalid
    /// credentials). A fresh login is required; never auto-retried.
    #[error("credentials rejected: {0}")]
    Rejected(String),

    #[error("credential backend error: {0}")]
    Other(String),
}

impl CredentialError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, CredentialError::Rejected(_))
    }
}

impl IsRetryable for CredentialError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CredentialError::ConnectionFailed(_) | CredentialError::ServiceUnavailable(_)
        )
    }
}

/// Failure reported by the underlying invalidation channel.
#[derive(Debug, Clone, ThisError)]
pub enum ChannelError {
    #[error("channel rejected registered-id update: {0}")]
    RegistrationPush(String),

    #[error("channel transport error: {0}")]
    Transport(String),
}

impl IsRetryable for ChannelError {
    fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }
}

/// Crate-level error for the session handle surface.
#[derive(Debug, ThisError)]
pub enum VigilError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("session actor unavailable: {0}")]
    ActorUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_credential_errors_are_retryable() {
        assert!(CredentialError::ConnectionFailed("reset".into()).is_retryable());
        assert!(CredentialError::ServiceUnavailable("503".into()).is_retryable());
    }

    #[test]
    fn rejection_is_terminal_not_retryable() {
        let err = CredentialError::Rejected("invalid_grant".into());
        assert!(!err.is_retryable());
        assert!(err.is_rejection());
    }

    #[test]
    fn unclassified_errors_are_neither_retryable_nor_rejection() {
        let err = CredentialError::Other("unexpected".into());
        assert!(!err.is_retryable());
        assert!(!err.is_rejection());
    }
}
