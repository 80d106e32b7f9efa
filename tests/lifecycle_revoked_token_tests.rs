mod common;

use common::*;
use vigil::credentials::AccessToken;

#[tokio::test]
async fn revoked_token_clears_channel_credentials() {
    let backend = FakeOauthBackend::signed_in("user@example.com");
    backend.queue_token(Ok(AccessToken::new("tok-1", None)));
    let factory = FakeChannelFactory::default();
    let session = spawn_oauth_session(&backend, &factory).await;
    wait_until("channel creation", || factory.created() == 1).await;

    session.notify_token_revoked().expect("revoke cast");
    wait_until("empty token pushed", || {
        factory.credentials().last() == Some(&("user@example.com".to_string(), String::new()))
    })
    .await;
    assert_eq!(factory.created(), 1);
}
