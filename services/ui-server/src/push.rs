//! CLI push-message client: opens one connection to the backend Unix
//! socket per invocation, sends a single framed `SessionEnvelope`, and
//! (for `get`/`poll`) waits for the matching reply — the production
//! counterpart to `ui-test-utils::MockBackendConn`, minus the test-only
//! niceties.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use uiproto::{
    CreateMessage, DestroyMessage, GetMessage, Message, Properties, SessionEnvelope,
    UnwatchMessage, UpdateMessage, WatchMessage,
};

use crate::cli::{CreateArgs, GetArgs, PollArgs, PushTarget, UpdateArgs, VarArgs};

async fn connect(target: &PushTarget) -> std::io::Result<UnixStream> {
    UnixStream::connect(&target.socket).await
}

async fn send_one(target: &PushTarget, message: Message) -> std::io::Result<()> {
    let mut stream = connect(target).await?;
    let envelope = SessionEnvelope {
        session: target.session,
        messages: vec![message],
    };
    let body = serde_json::to_vec(&envelope).expect("SessionEnvelope always serializes");
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);
    stream.write_all(&frame).await
}

/// Sends one message and reads back exactly one reply envelope — used
/// by `get`, which the server always answers inline.
async fn send_and_await_reply(target: &PushTarget, message: Message) -> std::io::Result<Message> {
    let mut stream = connect(target).await?;
    let envelope = SessionEnvelope {
        session: target.session,
        messages: vec![message],
    };
    let body = serde_json::to_vec(&envelope).expect("SessionEnvelope always serializes");
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);
    stream.write_all(&frame).await?;

    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut reply_body = vec![0u8; len];
    stream.read_exact(&mut reply_body).await?;
    let reply: SessionEnvelope = serde_json::from_slice(&reply_body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    reply
        .messages
        .into_iter()
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "empty reply envelope"))
}

fn exit_for_io_result<T>(result: std::io::Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

pub async fn create(args: CreateArgs) -> i32 {
    let mut properties = Properties::new();
    for (key, value) in args.properties {
        properties.insert(key, value);
    }
    let message = Message::Create(CreateMessage {
        parent_id: args.parent_id,
        value: args.value,
        properties,
        nowatch: args.nowatch,
        unbound: args.unbound,
        request_id: Some(format!("{:016x}", rand::random::<u64>())),
    });
    let result = send_and_await_reply(&args.target, message).await;
    match result {
        Ok(Message::CreateReply(reply)) => {
            println!("{}", reply.id);
            0
        }
        Ok(other) => {
            eprintln!("unexpected reply: {other:?}");
            2
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

pub async fn destroy(args: VarArgs) -> i32 {
    let message = Message::Destroy(DestroyMessage { var_id: args.var_id });
    exit_for_io_result(send_one(&args.target, message).await)
}

pub async fn update(args: UpdateArgs) -> i32 {
    let mut properties = Properties::new();
    for (key, value) in args.properties {
        properties.insert(key, value);
    }
    let message = Message::Update(UpdateMessage {
        var_id: args.var_id,
        value: args.value,
        properties,
    });
    exit_for_io_result(send_one(&args.target, message).await)
}

pub async fn watch(args: VarArgs) -> i32 {
    let message = Message::Watch(WatchMessage { var_id: args.var_id });
    exit_for_io_result(send_one(&args.target, message).await)
}

pub async fn unwatch(args: VarArgs) -> i32 {
    let message = Message::Unwatch(UnwatchMessage { var_id: args.var_id });
    exit_for_io_result(send_one(&args.target, message).await)
}

pub async fn get(args: GetArgs) -> i32 {
    let message = Message::Get(GetMessage { ids: args.var_ids });
    match send_and_await_reply(&args.target, message).await {
        Ok(Message::GetReply(reply)) => {
            for entry in reply.entries {
                println!("{}\t{}", entry.id, entry.value);
            }
            0
        }
        Ok(other) => {
            eprintln!("unexpected reply: {other:?}");
            2
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

/// `poll` is modeled on the HTTP long-poll endpoint, not the backend
/// socket (spec.md §6: `poll` is an "HTTP client→server" message) — this
/// dials the frontend listener's `/poll/<session>` route with a short
/// request timeout padded past `--wait` so a long-poll has room to
/// actually block, the same `reqwest::Client::builder().timeout(...)`
/// shape the teacher uses for its own upstream HTTP fetches.
pub async fn poll(args: PollArgs) -> i32 {
    let wait_query = args.wait.map(|ms| format!("?wait={ms}")).unwrap_or_default();
    let url = format!(
        "http://{}:{}/poll/{}{wait_query}",
        args.host, args.port, args.target.session
    );
    let request_timeout = args
        .wait
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
        + Duration::from_secs(5);

    let client = match reqwest::Client::builder().timeout(request_timeout).build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: building HTTP client: {e}");
            return 2;
        }
    };

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("error: poll request failed: {e}");
            return 2;
        }
    };
    if !response.status().is_success() {
        eprintln!("error: server returned {}", response.status());
        return 2;
    }
    match response.text().await {
        Ok(body) => {
            println!("{body}");
            0
        }
        Err(e) => {
            eprintln!("error: reading response: {e}");
            2
        }
    }
}
