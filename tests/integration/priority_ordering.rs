//! spec.md §8 invariant "priority ordering": within one flushed batch, no
//! `low` message precedes a `medium`, and no `medium` precedes a `high`.
//! Exercised here with a `path-failure` error (high) and a plain value
//! update (medium) landing in the same debounce window, enqueued in the
//! *reverse* of the expected output order so the assertion actually
//! proves priority — not insertion order — decides the sort.

use std::time::Duration;

use serde_json::json;

use ui_server_specs::start_test_server;
use ui_test_utils::fixtures::unique_request_id;
use ui_test_utils::MockWsClient;
use uiproto::{CreateMessage, CreateReply, Message, Properties, UpdateMessage, WatchMessage};

#[tokio::test]
async fn error_outranks_plain_update_within_one_batch() {
    let server = start_test_server().await;
    let vended_id = server.create_session().await;
    let mut client = MockWsClient::connect(&server.ws_url(vended_id)).await.unwrap();

    // `a`: path-bound under root (whose value is still `null`), so a
    // write through it nullish-fails with a high-priority `error`.
    let req_a = unique_request_id();
    let mut props_a = Properties::new();
    props_a.insert("path".to_owned(), "missing".to_owned());
    client
        .send_message(&Message::Create(CreateMessage {
            parent_id: Some(1),
            value: None,
            properties: props_a,
            nowatch: false,
            unbound: false,
            request_id: Some(req_a.clone()),
        }))
        .await
        .unwrap();
    let id_a = match client.recv_message().await.unwrap() {
        Message::CreateReply(CreateReply { id, .. }) => id,
        other => panic!("expected CreateReply, got {other:?}"),
    };

    // `b`: a plain direct-value variable, broadcasting at medium priority.
    let req_b = unique_request_id();
    client
        .send_message(&Message::Create(CreateMessage {
            parent_id: Some(1),
            value: Some(json!("initial")),
            properties: Properties::new(),
            nowatch: false,
            unbound: false,
            request_id: Some(req_b.clone()),
        }))
        .await
        .unwrap();
    let id_b = match client.recv_message().await.unwrap() {
        Message::CreateReply(CreateReply { id, .. }) => id,
        other => panic!("expected CreateReply, got {other:?}"),
    };

    client.send_message(&Message::Watch(WatchMessage { var_id: id_a })).await.unwrap();
    let _ = client.recv_batch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.send_message(&Message::Watch(WatchMessage { var_id: id_b })).await.unwrap();
    let _ = client.recv_batch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Enqueue the medium-priority update first, the high-priority one
    // second, in a single batch frame — if the batcher just preserved
    // insertion order the medium update would come out first.
    let batch = vec![
        Message::Update(UpdateMessage { var_id: id_b, value: Some(json!("changed")), properties: Properties::new() }),
        Message::Update(UpdateMessage { var_id: id_a, value: Some(json!("X")), properties: Properties::new() }),
    ];
    client.send_batch(&batch).await.unwrap();

    let flushed = client.recv_batch().await.unwrap();
    assert_eq!(flushed.len(), 2, "both writes should flush together: {flushed:?}");
    match &flushed[0] {
        Message::Error(err) => assert_eq!(err.var_id, Some(id_a)),
        other => panic!("expected the high-priority error first, got {other:?}"),
    }
    match &flushed[1] {
        Message::Update(update) => assert_eq!(update.var_id, id_b),
        other => panic!("expected the medium-priority update second, got {other:?}"),
    }

    server.shutdown();
}
