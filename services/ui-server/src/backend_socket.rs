//! The dual-protocol backend listener, `uinet::BackendListener` driven:
//! every accepted connection is classified by its first four bytes
//! (spec.md §4.1/§6) into an HTTP probe (handed to a tiny fallback
//! responder, since the real HTTP surface lives on the axum listener) or
//! a framed JSON connection speaking length-prefixed `SessionEnvelope`s.
//!
//! Mirrors the teacher's accept-loop shape in `main.rs` (`loop { let
//! stream = listener.accept().await; tokio::spawn(handle(stream)) }`)
//! but fans each frame out to the right session's dispatcher instead of
//! a single shared connection handler.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use uinet::framing::{read_frame_body, read_next_frame, FrameKind, Peeked};
use uinet::{decode_envelope, encode_envelope, BackendListener, SessionEnvelope};
use uiproto::{Message, VendedId};

use crate::app::{AppState, BackendLink};
use crate::session::ActorMsg;

/// Runs the backend-socket accept loop until the process shuts down.
/// Each connection gets its own task so one slow forwarder can't stall
/// another session's traffic.
pub async fn run(listener: BackendListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok(stream) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        warn!(error = %e, "backend connection ended with error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to accept backend connection");
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, state: AppState) -> std::io::Result<()> {
    let peeked = Peeked::read_from(stream).await?;
    match peeked.kind {
        FrameKind::Http => respond_plain_http(peeked.into_rest()).await,
        FrameKind::Packet => handle_packet_connection(peeked, state).await,
    }
}

/// The backend socket answers bare HTTP probes (e.g. a liveness check
/// aimed at the wrong port) with a minimal fixed response rather than
/// pulling in a second HTTP stack — the real frontend HTTP surface is
/// the axum listener in `http_routes`. The four prefix bytes
/// `Peeked` already consumed aren't replayed since this reply never
/// depends on the request's contents.
async fn respond_plain_http(mut stream: UnixStream) -> std::io::Result<()> {
    let body = b"not a frontend endpoint; connect a framed client or use the HTTP port\n";
    let response = format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn handle_packet_connection(peeked: Peeked<UnixStream>, state: AppState) -> std::io::Result<()> {
    let first_len = peeked
        .packet_length()
        .expect("FrameKind::Packet always carries a length prefix");
    let mut stream = peeked.into_rest();
    let first_body = read_frame_body(&mut stream, first_len).await?;

    let write_half = Arc::new(Mutex::new(stream));
    let mut bound_sessions: HashSet<VendedId> = HashSet::new();

    process_frame(&first_body, &state, &write_half, &mut bound_sessions).await;

    loop {
        let body = {
            let mut guard = write_half.lock().await;
            read_next_frame(&mut *guard).await
        };
        let body = match body {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        process_frame(&body, &state, &write_half, &mut bound_sessions).await;
    }
    Ok(())
}

/// Decodes one frame's envelope, registers this connection as the
/// session's backend link on first sight, dispatches its messages, and
/// starts a pump task that writes whatever the session sends back.
async fn process_frame(
    body: &[u8],
    state: &AppState,
    write_half: &Arc<Mutex<UnixStream>>,
    bound_sessions: &mut HashSet<VendedId>,
) {
    let envelope = match decode_envelope(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed backend envelope");
            return;
        }
    };

    if state.dispatcher(envelope.session).await.is_none() {
        state.provision_session(envelope.session).await;
    }

    if bound_sessions.insert(envelope.session) {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .backends
            .write()
            .await
            .insert(envelope.session, BackendLink { out: tx.clone() });
        if let Some(dispatcher) = state.dispatcher(envelope.session).await {
            dispatcher.send(ActorMsg::SetBackend { out: tx });
        }
        spawn_reply_pump(envelope.session, rx, write_half.clone());
    }

    if let Some(dispatcher) = state.dispatcher(envelope.session).await {
        if let Some(internal_id) = state.sessions.get_internal_id(envelope.session).await {
            state.sessions.touch_activity(&internal_id).await;
        }
        dispatcher.send(ActorMsg::Backend { batch: envelope.messages });
    } else {
        warn!(session = envelope.session, "envelope for unknown session");
    }
}

/// One task per bound session, writing every `(session, message)` the
/// dispatcher produces back over the shared write half as a new framed
/// `SessionEnvelope` — mirrors the teacher's per-forwarder outbound
/// `mpsc::Receiver` pump in `handle_forwarder_socket`.
fn spawn_reply_pump(
    session: VendedId,
    mut rx: mpsc::UnboundedReceiver<(VendedId, Message)>,
    write_half: Arc<Mutex<UnixStream>>,
) {
    tokio::spawn(async move {
        while let Some((session, message)) = rx.recv().await {
            let envelope = SessionEnvelope {
                session,
                messages: vec![message],
            };
            let Ok(frame) = encode_envelope(&envelope) else {
                continue;
            };
            let mut guard = write_half.lock().await;
            if guard.write_all(&frame).await.is_err() {
                break;
            }
        }
        info!(session, "backend reply pump exiting");
    });
}
