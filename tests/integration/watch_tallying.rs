//! spec.md §8 end-to-end scenario 2 / invariant "forward transition
//! exclusivity": two observers share one watch forwarded to the backend,
//! and the backend only sees an unwatch once the last observer leaves.

use serde_json::json;

use ui_server_specs::start_test_server;
use ui_test_utils::fixtures::unique_request_id;
use ui_test_utils::{MockBackendConn, MockWsClient};
use uiproto::{
    CreateMessage, CreateReply, Message, Properties, SessionEnvelope, UnwatchMessage,
    WatchMessage,
};

#[tokio::test]
async fn one_watch_forwarded_per_two_observers_unwatch_on_last_departure() {
    let server = start_test_server().await;
    let vended_id = server.create_session().await;

    // Register a backend connection for this session before anyone
    // watches, so the 0->1 tally transition has somewhere to forward to.
    let mut backend = MockBackendConn::connect(server.socket_path()).await.unwrap();
    backend
        .send_envelope(&SessionEnvelope { session: vended_id, messages: vec![] })
        .await
        .unwrap();

    let mut a = MockWsClient::connect(&server.ws_url(vended_id)).await.unwrap();
    let request_id = unique_request_id();
    a.send_message(&Message::Create(CreateMessage {
        parent_id: Some(1),
        value: Some(json!(0)),
        properties: Properties::new(),
        nowatch: false,
        unbound: false,
        request_id: Some(request_id.clone()),
    }))
    .await
    .unwrap();
    let id = match a.recv_message().await.unwrap() {
        Message::CreateReply(CreateReply { id, .. }) => id,
        other => panic!("expected CreateReply, got {other:?}"),
    };

    let mut b = MockWsClient::connect(&server.ws_url(vended_id)).await.unwrap();

    a.send_message(&Message::Watch(WatchMessage { var_id: id })).await.unwrap();
    let forwarded = backend.recv_envelope().await.unwrap();
    assert_eq!(forwarded.messages.len(), 1);
    assert!(matches!(forwarded.messages[0], Message::Watch(WatchMessage { var_id }) if var_id == id));
    // `a`'s own synthetic update for the 0->1 watch.
    let _ = a.recv_message().await.unwrap();

    b.send_message(&Message::Watch(WatchMessage { var_id: id })).await.unwrap();
    // `b`'s own synthetic update — no second `watch` should ever reach the backend.
    let _ = b.recv_message().await.unwrap();

    a.send_message(&Message::Unwatch(UnwatchMessage { var_id: id })).await.unwrap();
    b.send_message(&Message::Unwatch(UnwatchMessage { var_id: id })).await.unwrap();
    let forwarded = backend.recv_envelope().await.unwrap();
    assert_eq!(forwarded.messages.len(), 1);
    assert!(matches!(forwarded.messages[0], Message::Unwatch(UnwatchMessage { var_id }) if var_id == id));

    server.shutdown();
}
