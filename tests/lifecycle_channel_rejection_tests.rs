mod common;

use common::*;
use vigil::credentials::AccessToken;
use vigil::state::{InvalidatorState, InvalidatorStatus};

#[tokio::test]
async fn channel_rejection_goes_transient_and_refreshes_the_token() {
    let backend = FakeOauthBackend::signed_in("user@example.com");
    backend.queue_token(Ok(AccessToken::new("tok-1", None)));
    let factory = FakeChannelFactory::default();
    let session = spawn_oauth_session(&backend, &factory).await;
    wait_until("channel creation", || factory.created() == 1).await;

    let (handler, erased) = RecordingHandler::pair("sync");
    session.register_handler(erased.clone()).expect("register");
    factory
        .events()
        .on_state_change(InvalidatorStatus::new(InvalidatorState::Enabled));
    wait_until("enabled broadcast", || {
        handler.states().contains(&InvalidatorState::Enabled)
    })
    .await;

    backend.queue_token(Ok(AccessToken::new("tok-2", None)));
    factory
        .events()
        .on_state_change(InvalidatorStatus::new(InvalidatorState::CredentialsRejected));

    // Handlers observe a transient error, never a raw rejection, and the
    // channel gets a fresh token without being rebuilt.
    wait_until("refreshed credentials on the channel", || {
        factory
            .credentials()
            .contains(&("user@example.com".to_string(), "tok-2".to_string()))
    })
    .await;
    assert_eq!(
        handler.states(),
        vec![InvalidatorState::Enabled, InvalidatorState::TransientError]
    );
    assert_eq!(factory.created(), 1, "channel should not be rebuilt");

    factory
        .events()
        .on_state_change(InvalidatorStatus::new(InvalidatorState::Enabled));
    wait_for_state(&session, InvalidatorState::Enabled).await;
    assert_eq!(
        handler.states(),
        vec![
            InvalidatorState::Enabled,
            InvalidatorState::TransientError,
            InvalidatorState::Enabled
        ]
    );
}
