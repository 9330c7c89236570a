//! spec.md §8 end-to-end scenario 1: create, watch, update, destroy.

use serde_json::json;

use ui_server_specs::start_test_server;
use ui_test_utils::fixtures::unique_request_id;
use ui_test_utils::MockWsClient;
use uiproto::{
    CreateMessage, CreateReply, DestroyMessage, GetMessage, GetReply, Message, Properties,
    UpdateMessage, WatchMessage,
};

#[tokio::test]
async fn create_watch_update_destroy_round_trip() {
    let server = start_test_server().await;
    let vended_id = server.create_session().await;
    let mut client = MockWsClient::connect(&server.ws_url(vended_id)).await.unwrap();

    let request_id = unique_request_id();
    client
        .send_message(&Message::Create(CreateMessage {
            parent_id: Some(1),
            value: Some(json!({"name": "Alice"})),
            properties: Properties::new(),
            nowatch: false,
            unbound: false,
            request_id: Some(request_id.clone()),
        }))
        .await
        .unwrap();
    let reply = client.recv_message().await.unwrap();
    let id = match reply {
        Message::CreateReply(CreateReply { request_id: rid, id }) => {
            assert_eq!(rid, request_id);
            id
        }
        other => panic!("expected CreateReply, got {other:?}"),
    };

    client.send_message(&Message::Watch(WatchMessage { var_id: id })).await.unwrap();
    let update = client.recv_message().await.unwrap();
    match update {
        Message::Update(u) => {
            assert_eq!(u.var_id, id);
            assert_eq!(u.value, Some(json!({"name": "Alice"})));
        }
        other => panic!("expected synthetic update on watch, got {other:?}"),
    }

    client
        .send_message(&Message::Update(UpdateMessage {
            var_id: id,
            value: Some(json!({"name": "Bob"})),
            properties: Properties::new(),
        }))
        .await
        .unwrap();
    let update = client.recv_message().await.unwrap();
    match update {
        Message::Update(u) => {
            assert_eq!(u.var_id, id);
            assert_eq!(u.value, Some(json!({"name": "Bob"})));
        }
        other => panic!("expected update after write, got {other:?}"),
    }

    client.send_message(&Message::Destroy(DestroyMessage { var_id: id })).await.unwrap();
    let destroyed = client.recv_message().await.unwrap();
    match destroyed {
        Message::Destroy(d) => assert_eq!(d.var_id, id),
        other => panic!("expected destroy confirmation, got {other:?}"),
    }

    client.send_message(&Message::Get(GetMessage { ids: vec![id] })).await.unwrap();
    let get_reply = client.recv_message().await.unwrap();
    match get_reply {
        Message::GetReply(GetReply { entries }) => assert!(entries.is_empty()),
        other => panic!("expected GetReply, got {other:?}"),
    }

    server.shutdown();
}
