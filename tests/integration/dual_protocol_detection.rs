//! spec.md §8 end-to-end scenario 5: the backend socket's dual-protocol
//! detection routes an HTTP-prefixed connection to the plain HTTP
//! responder and a length-prefixed connection to the packet parser.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use ui_server_specs::start_test_server;
use uiproto::{Message, SessionEnvelope, WatchMessage};

#[tokio::test]
async fn http_prefix_and_packet_prefix_are_routed_differently() {
    let server = start_test_server().await;

    // An HTTP-looking probe gets a plain HTTP response back, not silent
    // disconnection or a framing error.
    let mut http_probe = UnixStream::connect(server.socket_path()).await.unwrap();
    http_probe.write_all(b"GET /health HTTP/1.1\r\n\r\n").await.unwrap();
    let mut response = vec![0u8; 12];
    http_probe.read_exact(&mut response).await.unwrap();
    assert!(response.starts_with(b"HTTP/1.1"), "got {response:?}");

    // A length-prefixed connection is parsed as a packet: an envelope
    // naming a fresh vended id implicitly provisions that session.
    let vended_id = 4242;
    let envelope = SessionEnvelope { session: vended_id, messages: vec![Message::Watch(WatchMessage { var_id: 1 })] };
    let body = serde_json::to_vec(&envelope).unwrap();
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);

    let mut packet_conn = UnixStream::connect(server.socket_path()).await.unwrap();
    packet_conn.write_all(&frame).await.unwrap();

    // Give the dispatcher a moment to provision the session from this
    // frame before checking it landed.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(server.handle.state.dispatcher(vended_id).await.is_some());

    server.shutdown();
}
