// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Envelopes
//!
//! Server-originated messages and their encodings for both client dialects.
//!
//! Raw dialect frames:
//! - chat: the client's JSON object with `sender` and `timestamp` injected
//! - `{"type":"system","content":..,"timestamp":..}`
//! - `{"type":"user_list","users":[..]}`
//!
//! Event dialect frames are `{"event":<name>,"data":<payload>}` objects
//! (`new_message`, `user_joined`, `user_left`, `message_history`, `connected`).

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Wire dialect spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Identity handshake followed by free-form JSON chat objects.
    Raw,
    /// Named JSON events (`join`, `send_message`, ...).
    Events,
}

/// Current server-local wall-clock time, second precision.
pub fn server_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// An inbound chat record. Any JSON object is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPayload(Map<String, Value>);

impl ChatPayload {
    /// Decodes a client frame. Returns `None` unless the frame is a JSON object.
    pub fn decode(frame: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(frame) {
            Ok(Value::Object(fields)) => Some(ChatPayload(fields)),
            _ => None,
        }
    }

    /// Builds a payload carrying only a `message` field.
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String(text.into()));
        ChatPayload(fields)
    }

    /// The non-empty `message` text, if the payload has one.
    pub fn text(&self) -> Option<&str> {
        self.0
            .get("message")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Raw field access.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Join or leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Joined,
    Left,
}

impl PresenceChange {
    fn event_name(self) -> &'static str {
        match self {
            PresenceChange::Joined => "user_joined",
            PresenceChange::Left => "user_left",
        }
    }
}

/// One recorded chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

/// A server-originated message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Chat {
        /// Message counter value, present when the chat was recorded.
        id: Option<u64>,
        sender: String,
        payload: ChatPayload,
        timestamp: String,
    },
    System {
        text: String,
        timestamp: String,
    },
    RosterUpdate {
        identities: Vec<String>,
    },
    Presence {
        identity: String,
        change: PresenceChange,
        timestamp: String,
        users_online: Vec<String>,
    },
}

impl Envelope {
    /// Encodes the envelope for one dialect.
    ///
    /// Returns `None` when the dialect has no frame for this envelope.
    pub fn encode(&self, dialect: Dialect) -> Option<String> {
        let value = match dialect {
            Dialect::Raw => self.raw_value()?,
            Dialect::Events => self.event_value()?,
        };
        serde_json::to_string(&value).ok()
    }

    fn raw_value(&self) -> Option<Value> {
        match self {
            Envelope::Chat {
                sender,
                payload,
                timestamp,
                ..
            } => {
                let mut fields = payload.fields().clone();
                fields.insert("sender".to_string(), Value::String(sender.clone()));
                fields.insert("timestamp".to_string(), Value::String(timestamp.clone()));
                Some(Value::Object(fields))
            }
            Envelope::System { text, timestamp } => Some(json!({
                "type": "system",
                "content": text,
                "timestamp": timestamp,
            })),
            Envelope::RosterUpdate { identities } => Some(json!({
                "type": "user_list",
                "users": identities,
            })),
            Envelope::Presence { .. } => None,
        }
    }

    fn event_value(&self) -> Option<Value> {
        match self {
            Envelope::Chat {
                id,
                sender,
                payload,
                timestamp,
            } => {
                let id = (*id)?;
                let text = payload.text()?;
                Some(event(
                    "new_message",
                    json!({
                        "id": id,
                        "username": sender,
                        "message": text,
                        "timestamp": timestamp,
                    }),
                ))
            }
            Envelope::Presence {
                identity,
                change,
                timestamp,
                users_online,
            } => Some(event(
                change.event_name(),
                json!({
                    "username": identity,
                    "timestamp": timestamp,
                    "users_online": users_online,
                }),
            )),
            Envelope::System { .. } | Envelope::RosterUpdate { .. } => None,
        }
    }
}

fn event(name: &str, data: Value) -> Value {
    json!({ "event": name, "data": data })
}

/// Greeting sent to event-dialect clients right after the upgrade.
pub fn connected_frame() -> String {
    event("connected", json!({ "message": "Connected to server" })).to_string()
}

/// Full chat log for a newly joined event-dialect client.
pub fn history_frame(history: &[HistoryEntry]) -> Option<String> {
    let data = serde_json::to_value(history).ok()?;
    Some(event("message_history", data).to_string())
}

/// A decoded event-dialect client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `join`; `username` is trimmed, empty when absent.
    Join { username: String },
    /// `send_message`; a client-supplied `username` is ignored.
    SendMessage { message: String },
    Disconnect,
    /// Well-formed event with an unrecognized name.
    Unknown(String),
}

impl ClientEvent {
    /// Decodes an event frame. Returns `None` for anything that is not an
    /// object with a string `event` field.
    pub fn decode(frame: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(frame).ok()?;
        let name = value.get("event")?.as_str()?;
        let field = |key: &str| {
            value
                .get("data")
                .and_then(|data| data.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Some(match name {
            "join" => ClientEvent::Join {
                username: field("username").trim().to_string(),
            },
            "send_message" => ClientEvent::SendMessage {
                message: field("message"),
            },
            "disconnect" => ClientEvent::Disconnect,
            other => ClientEvent::Unknown(other.to_string()),
        })
    }
}
