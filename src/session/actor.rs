use crate::backoff::RetryBackoff;
use crate::channel::{
    ChannelConfig, ChannelFactory, ChannelKind, Invalidator, InvalidatorContext,
    InvalidatorEvents, select_channel_kind,
};
use crate::config::{ChannelSettings, VigilConfig};
use crate::credentials::{AccessToken, CredentialSource, CredentialVariant};
use crate::error::{CredentialError, IsRetryable, VigilError};
use crate::invalidation::{InvalidationMap, ObjectIdSet};
use crate::registrar::{HandlerRegistrar, InvalidationHandler};
use crate::state::{AuthProblem, AuthProblemSource, InvalidatorState, InvalidatorStatus};
use crate::state_tracker::{InvalidationStateTracker, ensure_client_id, generate_client_id};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Messages handled by the session actor. External entry points go through
/// [`SessionHandle`]; the channel and token tasks feed events back in.
pub enum SessionMessage {
    /// Register an invalidation handler. Double registration is fatal.
    RegisterHandler(Arc<dyn InvalidationHandler>),

    /// Replace a handler's interest set. Replies `false` on an ownership
    /// conflict, leaving every registration unchanged.
    UpdateRegisteredIds(Arc<dyn InvalidationHandler>, ObjectIdSet, RpcReplyPort<bool>),

    /// Remove a handler and its ids from the union.
    UnregisterHandler(Arc<dyn InvalidationHandler>),

    /// Current externally visible state.
    GetStatus(RpcReplyPort<InvalidatorStatus>),

    /// The persisted client identity (empty before Init completes).
    GetClientId(RpcReplyPort<String>),

    /// The active account became usable (login / session in progress).
    NotifyLogin,

    /// The active account's session was fully torn down.
    NotifyLogout,

    /// The cached access token was revoked upstream.
    NotifyTokenRevoked,

    /// Channel configuration changed; reselect and rebuild if needed.
    UpdateChannelSettings(ChannelSettings),

    // Fed back by the channel event sink.
    ChannelStateChanged(InvalidatorStatus),
    IncomingInvalidations(InvalidationMap),

    // Fed back by token-fetch tasks and the retry timer.
    TokenFetchComplete {
        request_id: u64,
        result: Result<AccessToken, CredentialError>,
    },
    RetryAccessToken,
}

/// Handle for interacting with the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    actor: ActorRef<SessionMessage>,
}

impl SessionHandle {
    /// Registers `handler` for state and invalidation callbacks. Registering
    /// the same handler twice is a programming error and fatal.
    pub fn register_handler(
        &self,
        handler: Arc<dyn InvalidationHandler>,
    ) -> Result<(), VigilError> {
        ractor::cast!(self.actor, SessionMessage::RegisterHandler(handler))
            .map_err(|e| VigilError::ActorUnavailable(format!("RegisterHandler cast failed: {e}")))
    }

    /// Replaces `handler`'s interest set. Returns `false` if any id is
    /// already owned by a different handler.
    pub async fn update_registered_ids(
        &self,
        handler: Arc<dyn InvalidationHandler>,
        ids: ObjectIdSet,
    ) -> Result<bool, VigilError> {
        ractor::call!(self.actor, SessionMessage::UpdateRegisteredIds, handler, ids)
            .map_err(|e| VigilError::ActorUnavailable(format!("UpdateRegisteredIds RPC failed: {e}")))
    }

    /// Removes `handler`. Unregistering an unknown handler is fatal.
    pub fn unregister_handler(
        &self,
        handler: Arc<dyn InvalidationHandler>,
    ) -> Result<(), VigilError> {
        ractor::cast!(self.actor, SessionMessage::UnregisterHandler(handler)).map_err(|e| {
            VigilError::ActorUnavailable(format!("UnregisterHandler cast failed: {e}"))
        })
    }

    pub async fn invalidator_status(&self) -> Result<InvalidatorStatus, VigilError> {
        ractor::call!(self.actor, SessionMessage::GetStatus)
            .map_err(|e| VigilError::ActorUnavailable(format!("GetStatus RPC failed: {e}")))
    }

    pub async fn client_id(&self) -> Result<String, VigilError> {
        ractor::call!(self.actor, SessionMessage::GetClientId)
            .map_err(|e| VigilError::ActorUnavailable(format!("GetClientId RPC failed: {e}")))
    }

    pub fn notify_login(&self) -> Result<(), VigilError> {
        ractor::cast!(self.actor, SessionMessage::NotifyLogin)
            .map_err(|e| VigilError::ActorUnavailable(format!("NotifyLogin cast failed: {e}")))
    }

    pub fn notify_logout(&self) -> Result<(), VigilError> {
        ractor::cast!(self.actor, SessionMessage::NotifyLogout)
            .map_err(|e| VigilError::ActorUnavailable(format!("NotifyLogout cast failed: {e}")))
    }

    pub fn notify_token_revoked(&self) -> Result<(), VigilError> {
        ractor::cast!(self.actor, SessionMessage::NotifyTokenRevoked).map_err(|e| {
            VigilError::ActorUnavailable(format!("NotifyTokenRevoked cast failed: {e}"))
        })
    }

    pub fn update_channel_settings(&self, settings: ChannelSettings) -> Result<(), VigilError> {
        ractor::cast!(self.actor, SessionMessage::UpdateChannelSettings(settings)).map_err(|e| {
            VigilError::ActorUnavailable(format!("UpdateChannelSettings cast failed: {e}"))
        })
    }

    /// Stops the session. Callers must unregister every handler first; the
    /// actor broadcasts `ShuttingDown` and asserts (debug builds) that no
    /// registrations remain.
    pub async fn stop(&self) {
        // Waits for post_stop so the channel teardown and the final
        // ShuttingDown broadcast have happened when this returns.
        let _ = self.actor.stop_and_wait(None, None).await;
    }
}

/// Everything the session needs, injected explicitly; no singleton lookups.
pub struct SessionDeps {
    pub tracker: Box<dyn InvalidationStateTracker>,
    pub credentials: Arc<dyn CredentialSource>,
    pub channel_factory: Arc<dyn ChannelFactory>,
    pub config: VigilConfig,
}

struct ChannelEventSink {
    actor: ActorRef<SessionMessage>,
}

impl InvalidatorEvents for ChannelEventSink {
    fn on_state_change(&self, status: InvalidatorStatus) {
        if let Err(e) = self.actor.cast(SessionMessage::ChannelStateChanged(status)) {
            warn!("session actor unreachable, dropping channel state change: {e}");
        }
    }

    fn on_incoming_invalidation(&self, invalidations: InvalidationMap) {
        if let Err(e) = self
            .actor
            .cast(SessionMessage::IncomingInvalidations(invalidations))
        {
            warn!("session actor unreachable, dropping invalidations: {e}");
        }
    }
}

struct SessionState {
    tracker: Box<dyn InvalidationStateTracker>,
    credentials: Arc<dyn CredentialSource>,
    channel_factory: Arc<dyn ChannelFactory>,
    channel_settings: ChannelSettings,
    user_agent: String,
    registrar: HandlerRegistrar,
    backoff: RetryBackoff,
    channel_kind: ChannelKind,
    invalidator: Option<Box<dyn Invalidator>>,
    access_token: Option<AccessToken>,
    /// Id of the in-flight token request; completions for any other id are
    /// stale and dropped. Resetting this holder is the cancellation path.
    pending_request: Option<u64>,
    next_request_id: u64,
    retry_timer: Option<JoinHandle<()>>,
}

impl SessionState {
    fn is_started(&self) -> bool {
        self.invalidator.is_some()
    }

    fn stop_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

struct SessionActor;

#[ractor::async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionState;
    type Arguments = SessionDeps;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        deps: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut state = SessionState {
            backoff: RetryBackoff::new(&deps.config.backoff),
            channel_kind: select_channel_kind(&deps.config.channel),
            channel_settings: deps.config.channel,
            user_agent: deps.config.user_agent,
            tracker: deps.tracker,
            credentials: deps.credentials,
            channel_factory: deps.channel_factory,
            registrar: HandlerRegistrar::new(),
            invalidator: None,
            access_token: None,
            pending_request: None,
            next_request_id: 0,
            retry_timer: None,
        };

        let client_id = ensure_client_id(state.tracker.as_mut());
        info!(
            channel_kind = %state.channel_kind,
            client_id_len = client_id.len(),
            "invalidation session initialized"
        );

        if state.credentials.is_ready() {
            self.start_invalidator(&myself, &mut state);
        } else {
            debug!("not starting invalidator: credentials not ready");
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::RegisterHandler(handler) => {
                state.registrar.register(handler);
                debug!(handlers = state.registrar.handler_count(), "handler registered");
            }

            SessionMessage::UpdateRegisteredIds(handler, ids, reply) => {
                let updated = self.handle_update_registered_ids(state, &handler, ids);
                let _ = reply.send(updated);
            }

            SessionMessage::UnregisterHandler(handler) => {
                state.registrar.unregister(&handler);
                self.push_registered_ids(state);
                debug!(handlers = state.registrar.handler_count(), "handler unregistered");
            }

            SessionMessage::GetStatus(reply) => {
                let _ = reply.send(state.registrar.current_status());
            }

            SessionMessage::GetClientId(reply) => {
                let _ = reply.send(state.tracker.client_id().unwrap_or_default());
            }

            SessionMessage::NotifyLogin => {
                self.handle_login(&myself, state);
            }

            SessionMessage::NotifyLogout => {
                self.handle_logout(state);
            }

            SessionMessage::NotifyTokenRevoked => {
                state.access_token = None;
                if state.is_started() {
                    self.update_invalidator_credentials(state);
                }
            }

            SessionMessage::UpdateChannelSettings(settings) => {
                self.handle_channel_settings_change(&myself, state, settings);
            }

            SessionMessage::ChannelStateChanged(status) => {
                self.handle_channel_state_change(&myself, state, status);
            }

            SessionMessage::IncomingInvalidations(invalidations) => {
                self.handle_incoming_invalidations(state, invalidations);
            }

            SessionMessage::TokenFetchComplete { request_id, result } => {
                self.handle_token_fetch_complete(&myself, state, request_id, result);
            }

            SessionMessage::RetryAccessToken => {
                state.retry_timer = None;
                self.request_access_token(&myself, state);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state
            .registrar
            .update_state(InvalidatorStatus::new(InvalidatorState::ShuttingDown));
        state.stop_retry_timer();
        state.pending_request = None;
        if state.is_started() {
            self.stop_invalidator(state);
        }
        debug_assert!(
            state.registrar.is_empty(),
            "session stopped with {} handler(s) still registered: {:?}",
            state.registrar.handler_count(),
            state.registrar.sanitized_handler_ids(),
        );
        info!("invalidation session stopped");
        Ok(())
    }
}

impl SessionActor {
    fn handle_update_registered_ids(
        &self,
        state: &mut SessionState,
        handler: &Arc<dyn InvalidationHandler>,
        ids: ObjectIdSet,
    ) -> bool {
        debug!(owner = %handler.owner_name(), ids = ids.len(), "updating registered ids");
        if !state.registrar.update_registered_ids(handler, ids) {
            return false;
        }
        self.push_registered_ids(state);
        debug!(handler_ids = ?state.registrar.sanitized_handler_ids(), "registered ids updated");
        true
    }

    /// Pushes the registrar's union to the live channel. A desynchronized
    /// registered-id set is a correctness bug, so a failed push is fatal.
    fn push_registered_ids(&self, state: &mut SessionState) {
        let union = state.registrar.all_registered_ids();
        if let Some(invalidator) = state.invalidator.as_mut() {
            invalidator
                .update_registered_ids(&union)
                .expect("failed to push registered-id union to live channel");
        }
    }

    fn handle_login(&self, myself: &ActorRef<SessionMessage>, state: &mut SessionState) {
        if !state.is_started() {
            if state.credentials.is_ready() {
                self.start_invalidator(myself, state);
            } else {
                debug!("login event but credentials not ready");
            }
        } else {
            // Already running: refresh credentials so the channel picks up
            // the new session's token.
            self.request_access_token(myself, state);
        }
    }

    fn handle_logout(&self, state: &mut SessionState) {
        state.pending_request = None;
        state.stop_retry_timer();
        state.access_token = None;
        if state.is_started() {
            self.stop_invalidator(state);
        }

        // A stale client id risks receiving another account's invalidations;
        // logout always severs session continuity.
        state
            .tracker
            .clear_and_set_client_id(generate_client_id());
        info!("account logout: invalidator stopped, client identity regenerated");
    }

    fn handle_channel_settings_change(
        &self,
        myself: &ActorRef<SessionMessage>,
        state: &mut SessionState,
        settings: ChannelSettings,
    ) {
        state.channel_settings = settings;
        let kind = select_channel_kind(&state.channel_settings);
        if kind == state.channel_kind {
            return;
        }
        info!(from = %state.channel_kind, to = %kind, "channel kind changed");
        state.channel_kind = kind;
        if state.is_started() {
            // Channels are never swapped live: full stop, then a fresh start.
            self.stop_invalidator(state);
            self.start_invalidator(myself, state);
        }
    }

    fn handle_channel_state_change(
        &self,
        myself: &ActorRef<SessionMessage>,
        state: &mut SessionState,
        status: InvalidatorStatus,
    ) {
        info!(state = %status.state, "channel state change");
        match status.state {
            InvalidatorState::CredentialsRejected => {
                // May be routine access-token expiry, which the wire signal
                // cannot distinguish from genuine invalidity. Assume
                // transience and refresh; a rejected refresh settles into
                // CredentialsRejected via the token-failure path.
                let mut problem = status.auth_problem.unwrap_or_else(|| {
                    AuthProblem::new(AuthProblemSource::Channel, "channel rejected credentials")
                });
                problem.source = AuthProblemSource::Channel;
                state.registrar.update_state(InvalidatorStatus::with_problem(
                    InvalidatorState::TransientError,
                    problem,
                ));
                self.request_access_token(myself, state);
            }
            other => {
                // A network error after invalidations were enabled: refresh
                // credentials proactively so the channel comes back with a
                // fresh token instead of silently missing events.
                if other == InvalidatorState::TransientError
                    && state.registrar.current_state() == InvalidatorState::Enabled
                {
                    debug!("transient error while enabled; refreshing credentials");
                    self.request_access_token(myself, state);
                }
                state.registrar.update_state(status);
            }
        }
    }

    fn handle_incoming_invalidations(
        &self,
        state: &mut SessionState,
        invalidations: InvalidationMap,
    ) {
        // An empty map is the "invalidate everything" signal: expand it to
        // unknown-version invalidations over the full registered union.
        let effective = if invalidations.is_empty() {
            InvalidationMap::invalidate_all(&state.registrar.all_registered_ids())
        } else {
            invalidations
        };

        let delivered = state.registrar.dispatch_invalidations(&effective);
        debug!(
            handlers = delivered.len(),
            invalidations = effective.total(),
            "dispatched invalidations"
        );
    }

    fn request_access_token(&self, myself: &ActorRef<SessionMessage>, state: &mut SessionState) {
        if state.pending_request.is_some() {
            match state.credentials.variant() {
                // Legacy path: only one signed-header request at a time.
                CredentialVariant::Legacy => return,
                // OAuth2 path: invalidate the stale token so the backend
                // does not hand the same one back, then supersede the
                // in-flight request.
                CredentialVariant::Oauth2 => {
                    if let Some(token) = state.access_token.take() {
                        state.credentials.invalidate_token(&token);
                    }
                }
            }
        }

        state.stop_retry_timer();
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        state.pending_request = Some(request_id);

        let credentials = state.credentials.clone();
        let actor = myself.clone();
        tokio::spawn(async move {
            let result = credentials.fetch_token().await;
            if let Err(e) = actor.cast(SessionMessage::TokenFetchComplete { request_id, result }) {
                warn!("session actor unreachable, dropping token result: {e}");
            }
        });
        debug!(request_id, "access token requested");
    }

    fn handle_token_fetch_complete(
        &self,
        myself: &ActorRef<SessionMessage>,
        state: &mut SessionState,
        request_id: u64,
        result: Result<AccessToken, CredentialError>,
    ) {
        if state.pending_request != Some(request_id) {
            debug!(request_id, "stale token completion ignored");
            return;
        }
        state.pending_request = None;

        match result {
            Ok(token) => {
                state.backoff.reset();
                state.stop_retry_timer();
                state.access_token = Some(token);
                if state.is_started() {
                    self.update_invalidator_credentials(state);
                } else if state.credentials.is_ready() {
                    self.start_invalidator(myself, state);
                }
            }

            Err(err) if err.is_retryable() => {
                let delay = state.backoff.record_failure();
                warn!(
                    error = %err,
                    failures = state.backoff.failures(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient token failure, retry scheduled"
                );
                self.arm_retry_timer(myself, state, delay);
            }

            Err(err) if err.is_rejection() => {
                warn!(error = %err, "access token request rejected");
                state.registrar.update_state(InvalidatorStatus::with_problem(
                    InvalidatorState::CredentialsRejected,
                    AuthProblem::new(AuthProblemSource::TokenRenewal, err.to_string()),
                ));
            }

            Err(err) => {
                // Unclassified auth errors are promoted to a recoverable
                // state with a diagnostic instead of being dropped silently.
                warn!(error = %err, "unclassified token failure");
                state.registrar.update_state(InvalidatorStatus::with_problem(
                    InvalidatorState::TransientError,
                    AuthProblem::new(AuthProblemSource::TokenRenewal, err.to_string()),
                ));
            }
        }
    }

    fn arm_retry_timer(
        &self,
        myself: &ActorRef<SessionMessage>,
        state: &mut SessionState,
        delay: Duration,
    ) {
        state.stop_retry_timer();
        let actor = myself.clone();
        state.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor.cast(SessionMessage::RetryAccessToken);
        }));
    }

    fn start_invalidator(&self, myself: &ActorRef<SessionMessage>, state: &mut SessionState) {
        debug_assert!(!state.is_started(), "start_invalidator while started");
        let kind = state.channel_kind;

        // The push-client transport authenticates at connect time, so it
        // needs a token up front. The GCM-analog channel requests its own
        // token before sending, except when OAuth2 backs the session.
        let defer_for_token = state.access_token.is_none()
            && match state.credentials.variant() {
                CredentialVariant::Oauth2 => true,
                CredentialVariant::Legacy => kind == ChannelKind::PushClient,
            };
        if defer_for_token {
            debug!("deferring invalidator start until an access token is available");
            self.request_access_token(myself, state);
            return;
        }

        let client_id = state.tracker.client_id().unwrap_or_default();
        assert!(!client_id.is_empty(), "client identity missing at start");

        let config = ChannelConfig::resolve(kind, &state.channel_settings, state.credentials.variant());
        let context = InvalidatorContext {
            client_id,
            saved_invalidations: state.tracker.saved_invalidations(),
            bootstrap_data: state.tracker.bootstrap_data(),
            user_agent: state.user_agent.clone(),
        };
        let events: Arc<dyn InvalidatorEvents> = Arc::new(ChannelEventSink {
            actor: myself.clone(),
        });

        let mut invalidator = state.channel_factory.create(kind, &config, context, events);

        if let (Some(username), Some(token)) = (
            state.credentials.channel_username(),
            state.access_token.as_ref(),
        ) {
            invalidator.update_credentials(&username, token.secret());
        }

        invalidator
            .update_registered_ids(&state.registrar.all_registered_ids())
            .expect("failed to push registered-id union to freshly built channel");

        state.invalidator = Some(invalidator);
        info!(
            kind = %kind,
            host_port = %config.host_port,
            handlers = state.registrar.handler_count(),
            "invalidator started"
        );
    }

    fn update_invalidator_credentials(&self, state: &mut SessionState) {
        let Some(username) = state.credentials.channel_username() else {
            warn!("cannot update channel credentials: no signed-in identity");
            return;
        };
        let secret = state
            .access_token
            .as_ref()
            .map_or("", AccessToken::secret);
        if let Some(invalidator) = state.invalidator.as_mut() {
            debug!(username = %username, "updating channel credentials");
            invalidator.update_credentials(&username, secret);
        }
    }

    fn stop_invalidator(&self, state: &mut SessionState) {
        assert!(state.is_started(), "stop_invalidator while stopped");
        state.invalidator = None;
        info!("invalidator stopped");
    }
}

/// Spawns the session actor and performs Init: ensures a persisted client
/// identity, selects the channel kind, and starts the invalidator when the
/// credential source is ready.
pub async fn spawn(deps: SessionDeps) -> Result<SessionHandle, VigilError> {
    let (actor, _jh) = Actor::spawn(Some("VigilSession".to_string()), SessionActor, deps)
        .await
        .map_err(|e| VigilError::ActorUnavailable(format!("session actor spawn failed: {e}")))?;
    Ok(SessionHandle { actor })
}
