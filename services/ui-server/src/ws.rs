//! The frontend WebSocket endpoint, `GET /ws/<sessionID>`. Structured the
//! way the teacher's `ws_forwarder_handler`/`handle_forwarder_socket`
//! pair is: an axum upgrade handler that spawns a per-connection task
//! running a `tokio::select!` loop over inbound frames and an outbound
//! channel fed by this connection's [`Batcher`].

use std::time::Duration;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tracing::{info, warn};

use uibatch::Batcher;
use uiproto::{parse_batch, Message};

use crate::app::AppState;
use crate::session::ActorMsg;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(vended_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, vended_id, state))
}

async fn handle_socket(mut socket: WebSocket, vended_id_raw: String, state: AppState) {
    let Ok(vended_id) = vended_id_raw.parse::<u64>() else {
        let _ = socket.send(WsFrame::Close(None)).await;
        return;
    };
    let Some(dispatcher) = state.dispatcher(vended_id).await else {
        let _ = socket.send(WsFrame::Close(None)).await;
        return;
    };
    if let Some(internal_id) = state.sessions.get_internal_id(vended_id).await {
        state.sessions.touch_activity(&internal_id).await;
        state.sessions.add_connection(&internal_id, 0).await;
    }

    let conn = state.next_conn_id();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<Message>>();
    let (batcher, _batcher_handle) = Batcher::spawn(state.config.batch_debounce, out_tx);
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<Message>();

    dispatcher.send(ActorMsg::Connect {
        conn,
        batcher: batcher.clone(),
        direct: direct_tx,
    });

    info!(vended_id, conn, "frontend connection established");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsFrame::Text(text))) => {
                        match parse_batch(text.as_bytes()) {
                            Ok(batch) => dispatcher.send(ActorMsg::Frontend { conn, batch }),
                            Err(e) => warn!(vended_id, conn, error = %e, "malformed frontend batch"),
                        }
                    }
                    Some(Ok(WsFrame::Ping(data))) => {
                        if socket.send(WsFrame::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsFrame::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(vended_id, conn, error = %e, "frontend socket error");
                        break;
                    }
                }
            }
            batch = out_rx.recv() => {
                match batch {
                    Some(batch) => {
                        if send_batch(&mut socket, &batch).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            direct = direct_rx.recv() => {
                match direct {
                    Some(message) => {
                        if send_batch(&mut socket, std::slice::from_ref(&message)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    dispatcher.send(ActorMsg::Disconnect { conn });
    if let Some(internal_id) = state.sessions.get_internal_id(vended_id).await {
        state.sessions.remove_connection(&internal_id, 0).await;
    }
    info!(vended_id, conn, "frontend connection closed");
}

async fn send_batch(socket: &mut WebSocket, batch: &[Message]) -> Result<(), axum::Error> {
    let json = serde_json::to_string(batch).expect("Message batches always serialize");
    socket.send(WsFrame::Text(json.into())).await
}

/// `wait`-bounded long-poll drain for non-WS frontend clients. Awaits
/// either a push notification or the wait timeout, whichever comes
/// first, then drains whatever is queued — mirrors the `tokio::select!`
/// timeout shape the teacher uses for its heartbeat/session timeout race.
pub async fn poll_handler(
    Path(vended_id): Path<String>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Ok(vended_id) = vended_id.parse::<u64>() else {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    };
    let Some(dispatcher) = state.dispatcher(vended_id).await else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };

    let wait = params
        .get("wait")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO);

    let notify = std::sync::Arc::new(tokio::sync::Notify::new());
    dispatcher.send(ActorMsg::ConnectPoll {
        conn: crate::session::POLL_CONN_ID,
        notify: notify.clone(),
    });

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    dispatcher.send(ActorMsg::DrainPoll { reply: reply_tx });
    let mut messages = drain(&mut reply_rx);

    if messages.is_empty() && !wait.is_zero() {
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        dispatcher.send(ActorMsg::DrainPoll { reply: reply_tx });
        messages = drain(&mut reply_rx);
    }

    axum::Json(messages).into_response()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}
