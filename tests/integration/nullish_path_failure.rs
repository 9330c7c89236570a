//! spec.md §8 end-to-end scenario 4: a write through a nullish
//! intermediate fails with `path-failure`; once the parent is fixed, the
//! next refresh clears the error and delivers the resolved value.

use serde_json::json;

use ui_server_specs::start_test_server;
use ui_test_utils::fixtures::unique_request_id;
use ui_test_utils::MockWsClient;
use uiproto::{CreateMessage, CreateReply, Message, Properties, UpdateMessage, WatchMessage};

#[tokio::test]
async fn nullish_write_fails_then_clears_on_refresh() {
    let server = start_test_server().await;
    let vended_id = server.create_session().await;
    let mut client = MockWsClient::connect(&server.ws_url(vended_id)).await.unwrap();

    // Root (variable 1) starts as `null`; give it a shape with a nullish
    // `selectedContact` field.
    // Variable 1 has no watcher here, so this write produces no reply —
    // only its stored value changes, which is all the path navigation
    // below needs.
    client
        .send_message(&Message::Update(UpdateMessage {
            var_id: 1,
            value: Some(json!({"selectedContact": null})),
            properties: Properties::new(),
        }))
        .await
        .unwrap();

    let mut props = Properties::new();
    props.insert("path".to_owned(), "selectedContact.firstName".to_owned());
    let request_id = unique_request_id();
    client
        .send_message(&Message::Create(CreateMessage {
            parent_id: Some(1),
            value: None,
            properties: props,
            nowatch: false,
            unbound: false,
            request_id: Some(request_id.clone()),
        }))
        .await
        .unwrap();
    let id = match client.recv_message().await.unwrap() {
        Message::CreateReply(CreateReply { id, .. }) => id,
        other => panic!("expected CreateReply, got {other:?}"),
    };

    client.send_message(&Message::Watch(WatchMessage { var_id: id })).await.unwrap();
    let _ = client.recv_message().await.unwrap();

    client
        .send_message(&Message::Update(UpdateMessage {
            var_id: id,
            value: Some(json!("X")),
            properties: Properties::new(),
        }))
        .await
        .unwrap();
    let error = client.recv_message().await.unwrap();
    match error {
        Message::Error(err) => {
            assert_eq!(err.var_id, Some(id));
            assert_eq!(err.code, "path-failure");
        }
        other => panic!("expected path-failure error, got {other:?}"),
    }

    // Fix the parent: selectedContact becomes a real object. Variable 1
    // still has no watcher, so the only reply is `id`'s own resolved
    // value, delivered by the refresh pass that follows this update.
    client
        .send_message(&Message::Update(UpdateMessage {
            var_id: 1,
            value: Some(json!({"selectedContact": {"firstName": ""}})),
            properties: Properties::new(),
        }))
        .await
        .unwrap();

    let resolved = client.recv_message().await.unwrap();
    match resolved {
        Message::Update(u) => {
            assert_eq!(u.var_id, id);
            assert_eq!(u.value, Some(json!("")));
        }
        other => panic!("expected resolved empty-string update, got {other:?}"),
    }

    server.shutdown();
}
