mod common;

use common::*;
use vigil::credentials::AccessToken;
use vigil::error::CredentialError;

#[tokio::test]
async fn transient_token_failures_are_retried_under_backoff() {
    let backend = FakeOauthBackend::signed_in("user@example.com");
    backend.queue_token(Err(CredentialError::ConnectionFailed("reset".into())));
    backend.queue_token(Err(CredentialError::ServiceUnavailable("503".into())));
    backend.queue_token(Ok(AccessToken::new("tok-1", None)));
    let factory = FakeChannelFactory::default();
    let _session = spawn_oauth_session(&backend, &factory).await;

    wait_until("channel creation after retries", || factory.created() == 1).await;
    assert_eq!(backend.token_requests(), 3);
    assert_eq!(
        factory.credentials(),
        vec![("user@example.com".to_string(), "tok-1".to_string())]
    );
}
