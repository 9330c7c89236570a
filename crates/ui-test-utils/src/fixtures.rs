//! Small builders for the message shapes integration tests construct
//! over and over, so each test spells out only what it's actually
//! asserting about.

use std::collections::BTreeMap;

use serde_json::Value;

use uiproto::{CreateMessage, Message, Properties, UpdateMessage, VarId, WatchMessage};

pub fn unique_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn create_with_path(path: &str, request_id: &str) -> Message {
    let mut properties = Properties::new();
    properties.insert("path".to_owned(), path.to_owned());
    Message::Create(CreateMessage {
        parent_id: None,
        value: None,
        properties,
        nowatch: false,
        unbound: false,
        request_id: Some(request_id.to_owned()),
    })
}

pub fn create_unbound(value: Value, request_id: &str) -> Message {
    Message::Create(CreateMessage {
        parent_id: None,
        value: Some(value),
        properties: Properties::new(),
        nowatch: false,
        unbound: true,
        request_id: Some(request_id.to_owned()),
    })
}

pub fn watch(var_id: VarId) -> Message {
    Message::Watch(WatchMessage { var_id })
}

pub fn update_value(var_id: VarId, value: Value) -> Message {
    Message::Update(UpdateMessage {
        var_id,
        value: Some(value),
        properties: Properties::new(),
    })
}

pub fn update_properties(var_id: VarId, properties: BTreeMap<String, String>) -> Message {
    Message::Update(UpdateMessage {
        var_id,
        value: None,
        properties,
    })
}
