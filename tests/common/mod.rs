//! Shared fixtures for the session lifecycle tests. Each lifecycle test
//! lives in its own integration-test file (and therefore its own process)
//! because the session actor registers under a fixed global name.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::channel::{
    ChannelConfig, ChannelFactory, ChannelKind, Invalidator, InvalidatorContext,
    InvalidatorEvents,
};
use vigil::config::VigilConfig;
use vigil::credentials::{
    AccessToken, LegacyAccountBackend, OauthCredentialSource, OauthSessionBackend,
};
use vigil::error::{ChannelError, CredentialError};
use vigil::invalidation::{InvalidationMap, ObjectId, ObjectIdSet};
use vigil::registrar::InvalidationHandler;
use vigil::session::{self, SessionDeps, SessionHandle};
use vigil::state::{InvalidatorState, InvalidatorStatus};
use vigil::state_tracker::InMemoryStateTracker;

#[derive(Default)]
pub struct OauthBackendState {
    pub session_in_progress: bool,
    pub username: Option<String>,
    pub token_results: VecDeque<Result<AccessToken, CredentialError>>,
    pub token_requests: usize,
    pub invalidated: Vec<String>,
    pub hold_first_request: bool,
}

/// In-memory OAuth session backend; token results are consumed from a queue.
#[derive(Clone, Default)]
pub struct FakeOauthBackend {
    pub state: Arc<Mutex<OauthBackendState>>,
}

impl FakeOauthBackend {
    pub fn signed_in(username: &str) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            state.session_in_progress = true;
            state.username = Some(username.to_string());
        }
        backend
    }

    pub fn queue_token(&self, result: Result<AccessToken, CredentialError>) {
        self.state.lock().unwrap().token_results.push_back(result);
    }

    pub fn token_requests(&self) -> usize {
        self.state.lock().unwrap().token_requests
    }

    pub fn release_held_request(&self) {
        self.state.lock().unwrap().hold_first_request = false;
    }
}

#[async_trait]
impl OauthSessionBackend for FakeOauthBackend {
    fn session_in_progress(&self) -> bool {
        self.state.lock().unwrap().session_in_progress
    }

    fn username(&self) -> Option<String> {
        self.state.lock().unwrap().username.clone()
    }

    async fn request_access_token(&self) -> Result<AccessToken, CredentialError> {
        // The first request can be held open so tests can race a second
        // request against it.
        let is_first = {
            let mut state = self.state.lock().unwrap();
            state.token_requests += 1;
            state.token_requests == 1
        };
        if is_first {
            loop {
                if !self.state.lock().unwrap().hold_first_request {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
        self.state
            .lock()
            .unwrap()
            .token_results
            .pop_front()
            .unwrap_or_else(|| Ok(AccessToken::new("fallback-token", None)))
    }

    fn invalidate_access_token(&self, token: &AccessToken) {
        self.state
            .lock()
            .unwrap()
            .invalidated
            .push(token.secret().to_string());
    }
}

#[derive(Default)]
pub struct ChannelState {
    pub created: usize,
    pub live: bool,
    pub kinds: Vec<ChannelKind>,
    pub credentials: Vec<(String, String)>,
    pub registered_ids: Vec<ObjectIdSet>,
    pub events: Option<Arc<dyn InvalidatorEvents>>,
}

pub struct FakeInvalidator {
    pub state: Arc<Mutex<ChannelState>>,
}

impl Invalidator for FakeInvalidator {
    fn update_credentials(&mut self, username: &str, token: &str) {
        self.state
            .lock()
            .unwrap()
            .credentials
            .push((username.to_string(), token.to_string()));
    }

    fn update_registered_ids(&mut self, ids: &ObjectIdSet) -> Result<(), ChannelError> {
        self.state.lock().unwrap().registered_ids.push(ids.clone());
        Ok(())
    }
}

impl Drop for FakeInvalidator {
    fn drop(&mut self) {
        self.state.lock().unwrap().live = false;
    }
}

#[derive(Clone, Default)]
pub struct FakeChannelFactory {
    pub state: Arc<Mutex<ChannelState>>,
}

impl FakeChannelFactory {
    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().unwrap().live
    }

    pub fn credentials(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().credentials.clone()
    }

    pub fn registered_ids(&self) -> Vec<ObjectIdSet> {
        self.state.lock().unwrap().registered_ids.clone()
    }

    pub fn events(&self) -> Arc<dyn InvalidatorEvents> {
        self.state
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("channel has not been created yet")
    }
}

impl ChannelFactory for FakeChannelFactory {
    fn create(
        &self,
        kind: ChannelKind,
        _config: &ChannelConfig,
        _context: InvalidatorContext,
        events: Arc<dyn InvalidatorEvents>,
    ) -> Box<dyn Invalidator> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        state.live = true;
        state.kinds.push(kind);
        state.events = Some(events);
        Box::new(FakeInvalidator {
            state: self.state.clone(),
        })
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    pub name: &'static str,
    pub states: Mutex<Vec<InvalidatorStatus>>,
    pub invalidations: Mutex<Vec<InvalidationMap>>,
}

impl RecordingHandler {
    pub fn pair(name: &'static str) -> (Arc<RecordingHandler>, Arc<dyn InvalidationHandler>) {
        let concrete = Arc::new(RecordingHandler {
            name,
            ..RecordingHandler::default()
        });
        let erased: Arc<dyn InvalidationHandler> = concrete.clone();
        (concrete, erased)
    }

    pub fn states(&self) -> Vec<InvalidatorState> {
        self.states.lock().unwrap().iter().map(|s| s.state).collect()
    }

    pub fn invalidation_batches(&self) -> Vec<InvalidationMap> {
        self.invalidations.lock().unwrap().clone()
    }
}

impl InvalidationHandler for RecordingHandler {
    fn on_invalidator_state_change(&self, status: InvalidatorStatus) {
        self.states.lock().unwrap().push(status);
    }

    fn on_incoming_invalidation(&self, invalidations: InvalidationMap) {
        self.invalidations.lock().unwrap().push(invalidations);
    }

    fn owner_name(&self) -> &str {
        self.name
    }
}

/// `VIGIL_LOG=debug cargo test` surfaces the session's structured logs.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_env("VIGIL_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_test_writer(),
            )
            .try_init();
    });
}

pub fn test_config() -> VigilConfig {
    let mut config = VigilConfig::default();
    // Keep retries fast and deterministic under test.
    config.backoff.initial_delay_ms = 5;
    config.backoff.max_delay_ms = 50;
    config.backoff.jitter = false;
    config
}

pub async fn spawn_oauth_session(
    backend: &FakeOauthBackend,
    factory: &FakeChannelFactory,
) -> SessionHandle {
    init_test_tracing();
    session::spawn(SessionDeps {
        tracker: Box::new(InMemoryStateTracker::new()),
        credentials: Arc::new(OauthCredentialSource::new(Arc::new(backend.clone()))),
        channel_factory: Arc::new(factory.clone()),
        config: test_config(),
    })
    .await
    .expect("session spawns")
}

pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_state(
    session: &SessionHandle,
    expected: InvalidatorState,
) -> InvalidatorStatus {
    for _ in 0..400 {
        let status = session.invalidator_status().await.expect("status");
        if status.state == expected {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for state {expected}");
}

pub fn id(name: &str) -> ObjectId {
    ObjectId::new(1004, name)
}

pub fn ids(names: &[&str]) -> ObjectIdSet {
    names.iter().map(|n| id(n)).collect()
}

#[derive(Clone)]
pub struct FakeLegacyBackend {
    pub email: Option<String>,
    pub header: String,
}

#[async_trait]
impl LegacyAccountBackend for FakeLegacyBackend {
    fn is_logged_in(&self) -> bool {
        true
    }

    fn user_email(&self) -> Option<String> {
        self.email.clone()
    }

    fn user_name(&self) -> String {
        "legacy-user".to_string()
    }

    async fn signed_auth_header(&self) -> Result<String, CredentialError> {
        Ok(self.header.clone())
    }
}
