//! spec.md §8 end-to-end scenario 6: an inactive session past its
//! timeout is reaped, and both directions of the vended/internal id
//! mapping are removed along with it.

use std::time::Duration;

use ui_server_specs::start_test_server_with;
use uiconfig::Config;

#[tokio::test]
async fn inactive_session_is_reaped_and_unmapped() {
    let server = start_test_server_with(Config {
        session_timeout: Some(Duration::from_millis(10)),
        connection_grace_period: Some(Duration::from_millis(10)),
        batch_debounce: Duration::from_millis(5),
        ..Default::default()
    })
    .await;

    let vended_id = server.create_session().await;
    assert!(server.handle.state.sessions.get_internal_id(vended_id).await.is_some());
    assert!(server.handle.state.dispatcher(vended_id).await.is_some());

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(server.handle.state.sessions.get_internal_id(vended_id).await.is_none());
    assert!(server.handle.state.dispatcher(vended_id).await.is_none());

    server.shutdown();
}

#[tokio::test]
async fn zero_timeout_never_reaps() {
    let server = start_test_server_with(Config {
        session_timeout: None,
        connection_grace_period: Some(Duration::from_millis(10)),
        batch_debounce: Duration::from_millis(5),
        ..Default::default()
    })
    .await;

    let vended_id = server.create_session().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(server.handle.state.sessions.get_internal_id(vended_id).await.is_some());

    server.shutdown();
}
