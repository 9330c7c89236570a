//! The per-session dispatcher task: owns one session's [`Tree`] and
//! [`ViewdefStore`], and is the *only* thing that ever calls into them.
//! Connection tasks (the WS handler, the backend socket handler) never
//! touch tree state directly — they send [`ActorMsg`]s and read results
//! back off channels, the same "serialize access via a channel to an
//! owned resource" shape the teacher uses for `forwarder_command_senders`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tracing::warn;

use uibatch::Batcher;
use uiproto::{
    error_codes, CreateMessage, CreateReply, DestroyMessage, ErrorMessage, GetMessage,
    GetObjectsMessage, GetObjectsReply, GetReply, Message, Priority, ResolvedEntry,
    UnwatchMessage, UpdateMessage, VarId, WatchMessage,
};
use uisession::ConnId;
use uistorage::{SessionId, Store, StoredVariable};
use uitree::nav::{NavContext, NavError};
use uitree::{Tree, TreeError};
use uiview::{ViewdefKey, ViewdefStore};
use uiwrap::{CreateRegistry, WrapperRegistry};

/// Reserved connection id for long-poll HTTP clients, who have no live
/// socket of their own to receive pushes on — every poll-origin session
/// shares this one slot, consistent with the existing "one driver
/// connection" contract (spec.md §9 open question).
pub const POLL_CONN_ID: ConnId = 0;

/// This binary embeds no script engine (spec.md §9: "the embedded
/// script runtime is an external collaborator"), so method-call path
/// segments and `@NAME` standard variables always fail here. A hosted
/// runtime built around `uiexec::Executor<R>` would supply its own
/// `NavContext` wired to a real VM instead of this one.
pub struct NoScriptNavContext;

impl NavContext for NoScriptNavContext {
    fn call_method(&self, name: &str, _arg: Option<&Value>) -> Result<Value, NavError> {
        Err(NavError::PathFailure(format!(
            "no script engine hosted: method {name}() unavailable"
        )))
    }

    fn standard_var(&self, _name: &str) -> Option<Value> {
        None
    }
}

enum ConnHandle {
    Live {
        batcher: Batcher,
        direct: mpsc::UnboundedSender<Message>,
    },
    Poll {
        notify: Arc<Notify>,
    },
}

/// Messages the session dispatcher accepts. One unbounded channel per
/// session; every connection that belongs to this session holds a clone
/// of the sender.
pub enum ActorMsg {
    Connect {
        conn: ConnId,
        batcher: Batcher,
        direct: mpsc::UnboundedSender<Message>,
    },
    ConnectPoll {
        conn: ConnId,
        notify: Arc<Notify>,
    },
    /// Attaches (or replaces) the bound backend's outbound channel — sent
    /// when a forwarder's backend-socket connection registers for this
    /// session's vended id, which may happen after the session itself was
    /// created via the frontend HTTP surface.
    SetBackend {
        out: mpsc::UnboundedSender<(u64, Message)>,
    },
    Disconnect {
        conn: ConnId,
    },
    /// A batch received from a frontend connection.
    Frontend {
        conn: ConnId,
        batch: Vec<Message>,
    },
    /// A batch received over the backend socket for this session.
    Backend {
        batch: Vec<Message>,
    },
    /// Drains whatever is queued for the poll connection right now.
    DrainPoll {
        reply: mpsc::UnboundedSender<Message>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<ActorMsg>,
}

impl SessionHandle {
    pub fn send(&self, msg: ActorMsg) {
        let _ = self.tx.send(msg);
    }
}

/// Spawns the dispatcher task for a freshly created session. `backend_out`
/// carries messages destined for the bound/proxied backend (watch/unwatch
/// forwarding, frontend writes to bound variables, create/destroy/get
/// replies addressed back to the backend) — `None` for sessions with no
/// backend attached. `store`/`session_id` back the durability contract for
/// unbound variables (spec.md §6: "create/update/destroy on an unbound
/// variable are durable before the emitting update is flushed to
/// observers").
pub fn spawn(
    backend_out: Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    store: Arc<dyn Store>,
    session_id: SessionId,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(rx, backend_out, vended_id, store, session_id));
    SessionHandle { tx }
}

#[derive(Default)]
struct PendingPoll {
    queue: Vec<Message>,
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<ActorMsg>,
    mut backend_out: Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    store: Arc<dyn Store>,
    session_id: SessionId,
) {
    let mut tree = Tree::new(CreateRegistry::new(), WrapperRegistry::new());
    let mut view = ViewdefStore::new();
    let mut connections: HashMap<ConnId, ConnHandle> = HashMap::new();
    let mut watchers: HashMap<VarId, HashSet<ConnId>> = HashMap::new();
    let mut poll_outbox = PendingPoll::default();
    let mut objects: HashMap<i64, Value> = HashMap::new();
    let ctx = NoScriptNavContext;

    let root = tree
        .create(None, Some(Value::Null), uiproto::Properties::new())
        .expect("first create in a fresh tree always succeeds");
    debug_assert_eq!(root, 1, "variable 1 is always the session root");

    while let Some(msg) = rx.recv().await {
        match msg {
            ActorMsg::Connect { conn, batcher, direct } => {
                connections.insert(conn, ConnHandle::Live { batcher, direct });
            }
            ActorMsg::ConnectPoll { conn, notify } => {
                connections.insert(conn, ConnHandle::Poll { notify });
            }
            ActorMsg::SetBackend { out } => {
                backend_out = Some(out);
            }
            ActorMsg::Disconnect { conn } => {
                connections.remove(&conn);
                let mut now_unwatched = Vec::new();
                for (var_id, conns) in watchers.iter_mut() {
                    if conns.remove(&conn) && conns.is_empty() {
                        now_unwatched.push(*var_id);
                    }
                }
                watchers.retain(|_, conns| !conns.is_empty());
                for var_id in now_unwatched {
                    forward_unwatch_if_bound(&tree, var_id, vended_id, &backend_out);
                }
            }
            ActorMsg::Frontend { conn, batch } => {
                for message in batch {
                    handle_message(
                        &mut tree, &mut view, &mut watchers, &mut objects, &connections,
                        &backend_out, vended_id, Some(conn), message, &ctx, &mut poll_outbox,
                        &*store, &session_id,
                    );
                }
                run_refresh(&mut tree, &mut objects, &mut view, &watchers, &connections, &ctx, &mut poll_outbox);
            }
            ActorMsg::Backend { batch } => {
                for message in batch {
                    handle_message(
                        &mut tree, &mut view, &mut watchers, &mut objects, &connections,
                        &backend_out, vended_id, None, message, &ctx, &mut poll_outbox,
                        &*store, &session_id,
                    );
                }
                run_refresh(&mut tree, &mut objects, &mut view, &watchers, &connections, &ctx, &mut poll_outbox);
            }
            ActorMsg::DrainPoll { reply } => {
                for message in poll_outbox.queue.drain(..) {
                    let _ = reply.send(message);
                }
            }
        }
    }

    store.delete_session(&session_id).ok();
}

fn forward_unwatch_if_bound(
    tree: &Tree,
    var_id: VarId,
    vended_id: u64,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
) {
    if let (Some(out), Some(var)) = (backend_out, tree.get(var_id)) {
        if var.bound {
            let _ = out.send((vended_id, Message::Unwatch(UnwatchMessage { var_id })));
        }
    }
}

/// Mirrors a variable's current value into the object registry under its
/// own server-managed id (the negation of its [`VarId`]) so that any
/// `{obj:id}` reference elsewhere in the tree pointing at it — and a
/// direct `getObjects` request — can resolve to real content instead of
/// `null`.
fn register_object(objects: &mut HashMap<i64, Value>, var_id: VarId, value: &Value) {
    objects.insert(-(var_id as i64), value.clone());
}

/// Recursively resolves every `{obj:id}` reference reachable from
/// `value` against the object registry (spec.md §4.1: `get`/`getObjects`
/// "resolve `{obj:id}` recursively", unlike `value_eq`'s by-id-only
/// comparison). Guards against reference cycles by tracking the ids
/// currently being expanded: a cycle resolves to the unexpanded
/// reference rather than looping forever.
fn resolve_object_refs(value: &Value, objects: &HashMap<i64, Value>) -> Value {
    fn walk(value: &Value, objects: &HashMap<i64, Value>, visiting: &mut HashSet<i64>) -> Value {
        if let Some(obj_id) = uiproto::as_object_ref(value) {
            if !visiting.insert(obj_id) {
                return value.clone();
            }
            let referenced = objects.get(&obj_id).cloned().unwrap_or(Value::Null);
            let resolved = walk(&referenced, objects, visiting);
            visiting.remove(&obj_id);
            return resolved;
        }
        match value {
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| walk(v, objects, visiting)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), walk(v, objects, visiting)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
    walk(value, objects, &mut HashSet::new())
}

fn send_direct(connections: &HashMap<ConnId, ConnHandle>, conn: ConnId, message: Message) {
    match connections.get(&conn) {
        Some(ConnHandle::Live { direct, .. }) => {
            let _ = direct.send(message);
        }
        Some(ConnHandle::Poll { .. }) => {
            warn!("direct reply requested for a poll connection; dropping (unsupported)");
        }
        None => {}
    }
}

/// Applies one message to the tree and routes replies/forwards. `origin`
/// is `Some(conn)` for a frontend-originated message, `None` for one read
/// off the backend socket.
#[allow(clippy::too_many_arguments)]
fn handle_message(
    tree: &mut Tree,
    view: &mut ViewdefStore,
    watchers: &mut HashMap<VarId, HashSet<ConnId>>,
    objects: &mut HashMap<i64, Value>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    message: Message,
    ctx: &NoScriptNavContext,
    poll_outbox: &mut PendingPoll,
    store: &dyn Store,
    session_id: &str,
) {
    match message {
        Message::Create(create) => handle_create(
            tree, objects, connections, backend_out, vended_id, origin, create, store, session_id,
        ),
        Message::Destroy(destroy) => {
            handle_destroy(tree, watchers, connections, backend_out, vended_id, destroy, store, session_id)
        }
        Message::Update(update) => handle_update(
            tree, objects, watchers, connections, backend_out, vended_id, origin, update, ctx, poll_outbox,
            store, session_id,
        ),
        Message::Watch(watch) => {
            handle_watch(tree, watchers, connections, backend_out, vended_id, origin, watch, poll_outbox)
        }
        Message::Unwatch(unwatch) => {
            handle_unwatch(tree, watchers, backend_out, vended_id, origin, unwatch)
        }
        Message::Get(get) => handle_get(tree, objects, connections, backend_out, vended_id, origin, get),
        Message::GetObjects(get_objects) => {
            handle_get_objects(objects, connections, backend_out, vended_id, origin, get_objects)
        }
        Message::Poll(poll) => {
            let _ = poll;
        }
        // Replies and `error` are server->client only; receiving one back
        // (e.g. a backend echoing a malformed frame) is simply ignored.
        Message::CreateReply(_)
        | Message::GetReply(_)
        | Message::GetObjectsReply(_)
        | Message::Error(_) => {}
    }

    let _ = view;
}

#[allow(clippy::too_many_arguments)]
fn handle_create(
    tree: &mut Tree,
    objects: &mut HashMap<i64, Value>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    create: CreateMessage,
    store: &dyn Store,
    session_id: &str,
) {
    let request_id = create.request_id.clone();
    let mut properties = create.properties.clone();
    if create.unbound {
        properties.insert("unbound".to_owned(), "true".to_owned());
    }
    // `nowatch` only affects auto-watch-on-create for a frontend that
    // wants the new id without becoming an observer; this dispatcher
    // never auto-watches a freshly created variable either way, so there
    // is nothing further to special-case here.
    let parent_id = create.parent_id;
    let result = tree.create(parent_id, create.value, properties);

    match result {
        Ok(id) => {
            persist_if_unbound(tree, store, session_id, id, parent_id);
            if let Some(var) = tree.get(id) {
                register_object(objects, id, &var.value);
            }
            reply_with_id(connections, backend_out, vended_id, origin, request_id, id);
        }
        Err(TreeError::UnknownType(type_name)) => {
            emit_error_to_origin(
                connections,
                backend_out,
                vended_id,
                origin,
                None,
                error_codes::UNKNOWN_TYPE,
                format!("unknown create type {type_name:?}"),
            );
        }
        Err(TreeError::NotFound(id)) => {
            emit_error_to_origin(
                connections,
                backend_out,
                vended_id,
                origin,
                Some(id),
                error_codes::NOT_FOUND,
                format!("parent variable {id} not found"),
            );
        }
    }
}

/// Write-through-caches a variable into `store` if it's unbound
/// (server-owned) — spec.md §6's durability contract applies only to
/// unbound variables; bound ones have their source of truth on the
/// backend and are never persisted here. Logged rather than propagated:
/// a storage hiccup shouldn't tear down the session, but it also
/// shouldn't pass silently.
fn persist_if_unbound(tree: &Tree, store: &dyn Store, session_id: &str, id: VarId, parent_id: Option<VarId>) {
    let Some(var) = tree.get(id) else { return };
    if var.bound {
        return;
    }
    let stored = StoredVariable {
        session_id: session_id.to_owned(),
        var_id: id,
        parent_id,
        value: var.value.clone(),
        properties: var.properties.clone(),
    };
    if let Err(e) = store.put(&stored) {
        warn!(var_id = id, error = %e, "failed to persist unbound variable");
    }
}

fn reply_with_id(
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    request_id: Option<String>,
    id: VarId,
) {
    let Some(request_id) = request_id else { return };
    let reply = Message::CreateReply(CreateReply { request_id, id });
    match origin {
        Some(conn) => send_direct(connections, conn, reply),
        None => {
            if let Some(out) = backend_out {
                let _ = out.send((vended_id, reply));
            }
        }
    }
}

fn emit_error_to_origin(
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    var_id: Option<VarId>,
    code: &str,
    description: String,
) {
    let error = Message::Error(ErrorMessage {
        var_id,
        code: code.to_owned(),
        description,
    });
    match origin {
        Some(conn) => send_direct(connections, conn, error),
        None => {
            if let Some(out) = backend_out {
                let _ = out.send((vended_id, error));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_destroy(
    tree: &mut Tree,
    watchers: &mut HashMap<VarId, HashSet<ConnId>>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    destroy: DestroyMessage,
    store: &dyn Store,
    session_id: &str,
) {
    let destroyed = tree.destroy(destroy.var_id);
    for (id, _) in &destroyed {
        if let Err(e) = store.delete(session_id, *id) {
            warn!(var_id = id, error = %e, "failed to delete persisted variable");
        }
    }
    for (id, bound) in destroyed {
        if let Some(conns) = watchers.remove(&id) {
            let message = Message::Destroy(DestroyMessage { var_id: id });
            for conn in conns {
                send_direct(connections, conn, message.clone());
            }
            // Destruction of a watched variable is itself the tally's
            // transition to zero; forward the matching `unwatch` only
            // for a bound variable, same as an explicit 1->0 unwatch.
            if bound {
                if let Some(out) = backend_out {
                    let _ = out.send((vended_id, Message::Unwatch(UnwatchMessage { var_id: id })));
                }
            }
        }
    }
}

/// Bound variables have their source of truth on the backend: a
/// frontend-originated write is forwarded there rather than applied
/// locally, and the authoritative value comes back later as a
/// backend-originated `update` (spec.md §3 invariant 4 — "exactly one
/// side applies state mutations to storage"). Unbound variables, and any
/// update arriving *from* the backend, are applied to the tree directly,
/// including any write-through-path failure that produces (spec.md §7:
/// broadcast to the variable's watchers, not just the connection that
/// sent the write).
#[allow(clippy::too_many_arguments)]
fn handle_update(
    tree: &mut Tree,
    objects: &mut HashMap<i64, Value>,
    watchers: &HashMap<VarId, HashSet<ConnId>>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    update: UpdateMessage,
    ctx: &NoScriptNavContext,
    poll_outbox: &mut PendingPoll,
    store: &dyn Store,
    session_id: &str,
) {
    let forward_to_backend = origin.is_some()
        && backend_out.is_some()
        && tree.get(update.var_id).is_some_and(|v| v.bound);

    if forward_to_backend {
        if let Some(out) = backend_out {
            let _ = out.send((vended_id, Message::Update(update)));
        }
        return;
    }

    let var_id = update.var_id;
    let parent_id = tree.get(var_id).and_then(|v| v.parent_id);
    match tree.update(ctx, var_id, update.value, update.properties) {
        Ok(Some(err)) => {
            persist_if_unbound(tree, store, session_id, var_id, parent_id);
            if let Some(var) = tree.get(var_id) {
                register_object(objects, var_id, &var.value);
            }
            let message = Message::Error(ErrorMessage {
                var_id: Some(var_id),
                code: err.code,
                description: err.description,
            });
            broadcast(var_id, message, Priority::High, watchers, connections, poll_outbox);
        }
        Ok(None) => {
            persist_if_unbound(tree, store, session_id, var_id, parent_id);
            if let Some(var) = tree.get(var_id) {
                register_object(objects, var_id, &var.value);
            }
            // Only path-bound variables get their observable value
            // recomputed (and broadcast) by the next refresh pass — a
            // direct-value variable's write takes effect immediately, so
            // it must be broadcast here or its watchers never see it.
            if let Some(var) = tree.get(var_id) {
                if var.path.is_none() {
                    let message = Message::Update(UpdateMessage {
                        var_id,
                        value: Some(var.value.clone()),
                        properties: uiproto::Properties::new(),
                    });
                    broadcast(var_id, message, Priority::Medium, watchers, connections, poll_outbox);
                }
            }
        }
        Err(TreeError::NotFound(id)) => {
            emit_error_to_origin(
                connections,
                backend_out,
                vended_id,
                origin,
                Some(id),
                error_codes::NOT_FOUND,
                format!("variable {id} not found"),
            );
        }
        Err(TreeError::UnknownType(_)) => unreachable!("update never creates a variable"),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_watch(
    tree: &mut Tree,
    watchers: &mut HashMap<VarId, HashSet<ConnId>>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    watch: WatchMessage,
    poll_outbox: &mut PendingPoll,
) {
    let Some(conn) = origin else {
        // A backend-originated watch has no per-connection observer to
        // register; bound-variable tallying only makes sense for
        // frontend-side observers.
        return;
    };
    match tree.watch(watch.var_id) {
        Ok(is_first) => {
            watchers.entry(watch.var_id).or_default().insert(conn);
            if is_first {
                if let Some(out) = backend_out {
                    if tree.get(watch.var_id).is_some_and(|v| v.bound) {
                        let _ = out.send((vended_id, Message::Watch(watch)));
                    }
                }
            }
            // spec.md §4.4.4: every `watch`, first or repeated, answers
            // the requester with a synthetic `update` carrying the
            // current cached value — independent of whether a refresh
            // batch ever touches this variable (a plain, non-path-bound
            // variable never does).
            if let Some(var) = tree.get(watch.var_id) {
                let message = Message::Update(UpdateMessage {
                    var_id: watch.var_id,
                    value: Some(var.value.clone()),
                    properties: var.properties.clone(),
                });
                send_to_one(connections, conn, message, Priority::Medium, poll_outbox);
            }
        }
        Err(TreeError::NotFound(id)) => {
            // Not observable: nothing to emit per spec.md (watch on a
            // missing variable is simply inert — there is no observer to
            // tell).
            let _ = id;
        }
        Err(TreeError::UnknownType(_)) => unreachable!("watch never creates a variable"),
    }
}

/// Enqueues one message for exactly one connection, the same way
/// `broadcast` does for a var's full watcher set — used for replies
/// that target only the connection that asked (e.g. watch's synthetic
/// update), which still want batcher/priority treatment rather than the
/// create/destroy-reply bypass `send_direct` gives.
fn send_to_one(
    connections: &HashMap<ConnId, ConnHandle>,
    conn: ConnId,
    message: Message,
    priority: Priority,
    poll_outbox: &mut PendingPoll,
) {
    match connections.get(&conn) {
        Some(ConnHandle::Live { batcher, .. }) => batcher.enqueue(message, priority),
        Some(ConnHandle::Poll { notify }) => {
            poll_outbox.queue.push(message);
            notify.notify_waiters();
        }
        None => {}
    }
}

fn handle_unwatch(
    tree: &mut Tree,
    watchers: &mut HashMap<VarId, HashSet<ConnId>>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    unwatch: UnwatchMessage,
) {
    let Some(conn) = origin else { return };
    if let Some(set) = watchers.get_mut(&unwatch.var_id) {
        set.remove(&conn);
        if set.is_empty() {
            watchers.remove(&unwatch.var_id);
        }
    }
    match tree.unwatch(unwatch.var_id) {
        Ok(is_last) => {
            if is_last {
                if let Some(out) = backend_out {
                    if tree.get(unwatch.var_id).is_some_and(|v| v.bound) {
                        let _ = out.send((vended_id, Message::Unwatch(unwatch)));
                    }
                }
            }
        }
        Err(_) => {}
    }
}

/// `get` is answered inline and never forwarded (spec.md §4.1): resolves
/// each requested variable's current value, with every `{obj:id}`
/// reference resolved recursively against the object registry.
fn handle_get(
    tree: &Tree,
    objects: &HashMap<i64, Value>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    get: GetMessage,
) {
    let entries = get
        .ids
        .iter()
        .filter_map(|id| {
            tree.get(*id).map(|v| ResolvedEntry {
                id: *id as i64,
                value: resolve_object_refs(&v.value, objects),
            })
        })
        .collect();
    let reply = Message::GetReply(GetReply { entries });
    match origin {
        Some(conn) => send_direct(connections, conn, reply),
        None => {
            if let Some(out) = backend_out {
                let _ = out.send((vended_id, reply));
            }
        }
    }
}

fn handle_get_objects(
    objects: &HashMap<i64, Value>,
    connections: &HashMap<ConnId, ConnHandle>,
    backend_out: &Option<mpsc::UnboundedSender<(u64, Message)>>,
    vended_id: u64,
    origin: Option<ConnId>,
    get_objects: GetObjectsMessage,
) {
    let entries = get_objects
        .ids
        .iter()
        .map(|id| ResolvedEntry {
            id: *id,
            value: resolve_object_refs(&objects.get(id).cloned().unwrap_or(Value::Null), objects),
        })
        .collect();
    let reply = Message::GetObjectsReply(GetObjectsReply { entries });
    match origin {
        Some(conn) => send_direct(connections, conn, reply),
        None => {
            if let Some(out) = backend_out {
                let _ = out.send((vended_id, reply));
            }
        }
    }
}

/// Runs one refresh batch and routes the results: an `update` per
/// watcher of a changed variable, an `error`/cleared-`error` per watcher
/// of an errored/recovered variable, plus any viewdef pushes a `type`
/// property change makes newly due.
#[allow(clippy::too_many_arguments)]
fn run_refresh(
    tree: &mut Tree,
    objects: &mut HashMap<i64, Value>,
    view: &mut ViewdefStore,
    watchers: &HashMap<VarId, HashSet<ConnId>>,
    connections: &HashMap<ConnId, ConnHandle>,
    ctx: &NoScriptNavContext,
    poll_outbox: &mut PendingPoll,
) {
    let mut last = std::time::Instant::now();
    let result = tree.refresh(ctx, move || {
        let now = std::time::Instant::now();
        let delta = now.duration_since(last);
        last = now;
        delta
    });

    for id in &result.updated {
        push_viewdefs_if_type_changed(tree, view, *id, watchers, connections, poll_outbox);
        let Some(var) = tree.get(*id) else { continue };
        register_object(objects, *id, &var.value);
        let message = Message::Update(UpdateMessage {
            var_id: *id,
            value: Some(var.value.clone()),
            properties: uiproto::Properties::new(),
        });
        broadcast(*id, message, Priority::Medium, watchers, connections, poll_outbox);
    }

    for id in &result.errored {
        let Some(var) = tree.get(*id) else { continue };
        let Some(err) = var.error.as_ref() else { continue };
        let message = Message::Error(ErrorMessage {
            var_id: Some(*id),
            code: err.code.clone(),
            description: err.description.clone(),
        });
        broadcast(*id, message, Priority::High, watchers, connections, poll_outbox);
    }
}

fn push_viewdefs_if_type_changed(
    tree: &Tree,
    view: &mut ViewdefStore,
    id: VarId,
    watchers: &HashMap<VarId, HashSet<ConnId>>,
    connections: &HashMap<ConnId, ConnHandle>,
    poll_outbox: &mut PendingPoll,
) {
    let Some(type_name) = tree.get(id).and_then(|v| v.properties.get("type")).cloned() else {
        return;
    };
    let pending = view.pending_for_type(&type_name);
    if pending.is_empty() {
        return;
    }
    // Viewdefs are delivered as a property of variable 1 (spec.md
    // GLOSSARY), string-encoded as JSON since `Properties` values are
    // plain strings rather than arbitrary value-JSON — see DESIGN.md for
    // why this crate keeps `Properties: BTreeMap<String, String>` rather
    // than widening it for this one caller.
    let payload: serde_json::Map<String, Value> = pending
        .into_iter()
        .map(|(key, template)| (key.to_key_string(), Value::String(template)))
        .collect();
    let mut properties = uiproto::Properties::new();
    properties.insert(
        "viewdefs:high".to_owned(),
        Value::Object(payload).to_string(),
    );
    let message = Message::Update(UpdateMessage {
        var_id: 1,
        value: None,
        properties,
    });
    broadcast(1, message, Priority::High, watchers, connections, poll_outbox);
}

fn broadcast(
    var_id: VarId,
    message: Message,
    priority: Priority,
    watchers: &HashMap<VarId, HashSet<ConnId>>,
    connections: &HashMap<ConnId, ConnHandle>,
    poll_outbox: &mut PendingPoll,
) {
    let Some(conns) = watchers.get(&var_id) else { return };
    for conn in conns {
        match connections.get(conn) {
            Some(ConnHandle::Live { batcher, .. }) => batcher.enqueue(message.clone(), priority),
            Some(ConnHandle::Poll { notify }) => {
                poll_outbox.queue.push(message.clone());
                notify.notify_waiters();
            }
            None => {}
        }
    }
}
