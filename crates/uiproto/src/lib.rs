//! uiproto: wire protocol types for the UI server.
//!
//! All messages use a top-level `kind` field for discriminated
//! (de)serialization. Variants map 1:1 to the message kinds in the UI
//! server protocol: `create`, `destroy`, `update`, `watch`, `unwatch`,
//! `error`, `get`, `getObjects`, `poll`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod path;
pub mod priority;

pub use path::{parse_path, PathParseError, PathSegment};
pub use priority::{strip_priority_suffix, Priority};

/// A variable id, scoped to a single session. `0` denotes "no variable".
pub type VarId = u64;

/// A vended session id, as seen on the backend socket.
pub type VendedId = u64;

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Property bag carried on `create`/`update` messages.
///
/// Ordered (`BTreeMap`) so serialized output and iteration order are
/// deterministic, which matters for reproducible tests of the batcher.
pub type Properties = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<VarId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nowatch: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unbound: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Server's reply to a `create`, correlated by `request_id`. Never batched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReply {
    pub request_id: String,
    pub id: VarId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyMessage {
    pub var_id: VarId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    pub var_id: VarId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchMessage {
    pub var_id: VarId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnwatchMessage {
    pub var_id: VarId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub var_id: Option<VarId>,
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMessage {
    pub ids: Vec<VarId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetObjectsMessage {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<u64>,
}

/// A single resolved `get`/`getObjects` result: the id (variable or
/// object, depending on which request produced it) paired with its
/// current value. `{obj:id}` references nested in `value` are resolved
/// recursively (spec.md §4.1 `get`: "resolves `{obj:id}` recursively").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    pub id: i64,
    pub value: Value,
}

/// Direct reply to `get`, correlating by the same ids requested. Like
/// `create`'s reply, this is never batched — `get` is explicitly "not
/// forwarded" and answered inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetReply {
    pub entries: Vec<ResolvedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetObjectsReply {
    pub entries: Vec<ResolvedEntry>,
}

/// All message kinds, discriminated by the wire-level `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Message {
    Create(CreateMessage),
    CreateReply(CreateReply),
    Destroy(DestroyMessage),
    Update(UpdateMessage),
    Watch(WatchMessage),
    Unwatch(UnwatchMessage),
    Error(ErrorMessage),
    Get(GetMessage),
    GetReply(GetReply),
    GetObjects(GetObjectsMessage),
    GetObjectsReply(GetObjectsReply),
    Poll(PollMessage),
}

/// A batch is simply an ordered list of messages.
pub type Batch = Vec<Message>;

/// Wrapper used on the backend socket: `{session, messages}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub session: VendedId,
    pub messages: Batch,
}

// ---------------------------------------------------------------------------
// Error codes (frozen, single-word)
// ---------------------------------------------------------------------------

pub mod error_codes {
    pub const PATH_FAILURE: &str = "path-failure";
    pub const NOT_FOUND: &str = "not-found";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UNKNOWN_TYPE: &str = "unknown-type";
    pub const DEFERRED_CODE: &str = "deferred-code";
    pub const INVALID_MESSAGE: &str = "invalid-message";
    pub const INVALID_VIEWDEF: &str = "invalid-viewdef";
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathParseError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses a single message or a batch of messages from a JSON payload.
pub fn parse_batch(bytes: &[u8]) -> Result<Batch, ProtoError> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        other => Err(ProtoError::InvalidMessage(format!(
            "expected object or array, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Value-JSON helpers
// ---------------------------------------------------------------------------

/// Returns the object id if `value` is an object reference `{obj: id}`.
pub fn as_object_ref(value: &Value) -> Option<i64> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get("obj")?.as_i64()
}

/// Structural equality over value-JSON, comparing `{obj:id}` references by
/// id only — never recursing into the referenced object (the value graph
/// may contain cycles via object references; resolving them is a
/// serialization-boundary concern, not a comparison concern).
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (as_object_ref(a), as_object_ref(b)) {
        (Some(ia), Some(ib)) => return ia == ib,
        (Some(_), None) | (None, Some(_)) => return false,
        (None, None) => {}
    }
    match (a, b) {
        (Value::Array(xa), Value::Array(xb)) => {
            xa.len() == xb.len() && xa.iter().zip(xb.iter()).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(oa), Value::Object(ob)) => {
            oa.len() == ob.len()
                && oa
                    .iter()
                    .all(|(k, v)| ob.get(k).is_some_and(|v2| value_eq(v, v2)))
        }
        _ => a == b,
    }
}
