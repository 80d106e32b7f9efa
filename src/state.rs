use serde::{Deserialize, Serialize};

/// Externally observable state of the invalidation session. Exactly one is
/// current at any time; every change is mirrored to registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidatorState {
    /// Something is wrong but expected to recover on its own (network error,
    /// token refresh in flight).
    TransientError,
    /// The backend rejected our identity; a fresh login is required.
    CredentialsRejected,
    /// Broadcast once, immediately before teardown, so handlers can
    /// unregister cleanly.
    ShuttingDown,
    /// The channel is live and invalidations are flowing.
    Enabled,
}

impl InvalidatorState {
    pub fn description(self) -> &'static str {
        match self {
            InvalidatorState::TransientError => "TRANSIENT_ERROR",
            InvalidatorState::CredentialsRejected => "CREDENTIALS_REJECTED",
            InvalidatorState::ShuttingDown => "SHUTTING_DOWN",
            InvalidatorState::Enabled => "ENABLED",
        }
    }
}

impl std::fmt::Display for InvalidatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Which stage of the credential machinery produced an auth problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthProblemSource {
    #[default]
    Unknown,
    Login,
    TokenRenewal,
    Channel,
}

/// Diagnostic payload attached to credential-related state changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProblem {
    pub source: AuthProblemSource,
    pub detail: String,
}

impl AuthProblem {
    pub fn new(source: AuthProblemSource, detail: impl Into<String>) -> Self {
        Self {
            source,
            detail: detail.into(),
        }
    }
}

/// A state plus its optional auth-problem payload; what handlers receive on
/// every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidatorStatus {
    pub state: InvalidatorState,
    pub auth_problem: Option<AuthProblem>,
}

impl InvalidatorStatus {
    pub fn new(state: InvalidatorState) -> Self {
        Self {
            state,
            auth_problem: None,
        }
    }

    pub fn with_problem(state: InvalidatorState, problem: AuthProblem) -> Self {
        Self {
            state,
            auth_problem: Some(problem),
        }
    }
}

impl From<InvalidatorState> for InvalidatorStatus {
    fn from(state: InvalidatorState) -> Self {
        Self::new(state)
    }
}
