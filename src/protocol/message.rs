//! Typed protocol messages.
//!
//! Wire shapes:
//!
//! ```text
//! Request   {"id": "...", "type": "complete", "payload": {...}}
//! Response  {"id": "...", "type": "completions", "payload": {...}}
//! Event     {"event": "status_update", "payload": {...}}
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, FrameError};

/// Request kinds understood by the dispatcher.
///
/// Matching is case-insensitive; anything unrecognised is kept verbatim in
/// [`RequestKind::Other`] so the dispatcher can still answer it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    Complete,
    Commands,
    Players,
    Status,
    Plugins,
    Worlds,
    Servers,
    Ping,
    Other(String),
}

impl RequestKind {
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::Complete => "complete",
            RequestKind::Commands => "commands",
            RequestKind::Players => "players",
            RequestKind::Status => "status",
            RequestKind::Plugins => "plugins",
            RequestKind::Worlds => "worlds",
            RequestKind::Servers => "servers",
            RequestKind::Ping => "ping",
            RequestKind::Other(s) => s,
        }
    }
}

impl From<String> for RequestKind {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "complete" => RequestKind::Complete,
            "commands" => RequestKind::Commands,
            "players" => RequestKind::Players,
            "status" => RequestKind::Status,
            "plugins" => RequestKind::Plugins,
            "worlds" => RequestKind::Worlds,
            "servers" => RequestKind::Servers,
            "ping" => RequestKind::Ping,
            _ => RequestKind::Other(s),
        }
    }
}

impl From<&str> for RequestKind {
    fn from(s: &str) -> Self {
        RequestKind::from(s.to_string())
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A controller request. Answered by exactly one [`Response`] with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, kind: impl Into<RequestKind>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// String field of the payload, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }

    /// Integer field of the payload, or `default`.
    pub fn int_field(&self, key: &str, default: i64) -> i64 {
        self.payload
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }
}

/// Response type tags.
pub mod response_type {
    pub const COMPLETIONS: &str = "completions";
    pub const COMMAND_TREE: &str = "command_tree";
    pub const PLAYER_LIST: &str = "player_list";
    pub const SERVER_STATUS: &str = "server_status";
    pub const PLUGIN_LIST: &str = "plugin_list";
    pub const WORLDS: &str = "worlds";
    pub const SERVERS: &str = "servers";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// Machine-readable tag carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Timeout,
    UnresolvedRequest,
    InvalidPayload,
    HandlerFailed,
    CacheRebuildFailed,
    Cancelled,
    Overloaded,
}

impl ErrorCode {
    pub fn for_error(err: &BridgeError) -> Self {
        match err {
            BridgeError::HandlerTimeout { .. } => ErrorCode::Timeout,
            BridgeError::UnresolvedRequest(_) => ErrorCode::UnresolvedRequest,
            BridgeError::InvalidPayload(_) | BridgeError::Json(_) => ErrorCode::InvalidPayload,
            BridgeError::CacheRebuild(_) => ErrorCode::CacheRebuildFailed,
            BridgeError::CompletionCancelled => ErrorCode::Cancelled,
            BridgeError::Overloaded { .. } => ErrorCode::Overloaded,
            BridgeError::Remote { code, .. } => *code,
            _ => ErrorCode::HandlerFailed,
        }
    }
}

/// Payload of an `error` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default = "default_error_code")]
    pub code: ErrorCode,
}

impl ErrorPayload {
    /// The error a caller sees for this reply.
    pub fn into_error(self) -> BridgeError {
        BridgeError::Remote {
            code: self.code,
            message: self.message,
        }
    }
}

fn default_error_code() -> ErrorCode {
    ErrorCode::HandlerFailed
}

/// Reply to a single [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Response {
    /// Build a successful response, serializing `payload`.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: &T,
    ) -> crate::Result<Self> {
        Ok(Self {
            id: id.into(),
            kind: kind.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build an error response.
    pub fn error(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            message: message.into(),
            code,
        };
        Self {
            id: id.into(),
            kind: response_type::ERROR.to_string(),
            payload: serde_json::json!({ "message": payload.message, "code": payload.code }),
        }
    }

    /// Build an error response describing `err`.
    pub fn from_error(id: impl Into<String>, err: &BridgeError) -> Self {
        Self::error(id, ErrorCode::for_error(err), err.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.kind == response_type::ERROR
    }

    /// The error payload, if this is an error response.
    pub fn error_payload(&self) -> Option<ErrorPayload> {
        if !self.is_error() {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Deserialize the payload into a typed record.
    pub fn payload_as<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// Unsolicited event names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventName {
    BridgeReady,
    PlayerJoin,
    PlayerLeave,
    ServerReady,
    StatusUpdate,
    PlayersUpdate,
    RegistryUpdate,
    CommandsUpdated,
    SystemInfo,
    Other(String),
}

impl EventName {
    pub fn as_str(&self) -> &str {
        match self {
            EventName::BridgeReady => "mcpanel_bridge_ready",
            EventName::PlayerJoin => "player_join",
            EventName::PlayerLeave => "player_leave",
            EventName::ServerReady => "server_ready",
            EventName::StatusUpdate => "status_update",
            EventName::PlayersUpdate => "players_update",
            EventName::RegistryUpdate => "registry_update",
            EventName::CommandsUpdated => "commands_updated",
            EventName::SystemInfo => "system_info",
            EventName::Other(s) => s,
        }
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "mcpanel_bridge_ready" => EventName::BridgeReady,
            "player_join" => EventName::PlayerJoin,
            "player_leave" => EventName::PlayerLeave,
            "server_ready" => EventName::ServerReady,
            "status_update" => EventName::StatusUpdate,
            "players_update" => EventName::PlayersUpdate,
            "registry_update" => EventName::RegistryUpdate,
            "commands_updated" => EventName::CommandsUpdated,
            "system_info" => EventName::SystemInfo,
            _ => EventName::Other(s),
        }
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> Self {
        name.as_str().to_string()
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unsolicited message from the bridge. No id, best-effort ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event")]
    pub name: EventName,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    pub fn new<T: Serialize>(name: EventName, payload: &T) -> crate::Result<Self> {
        Ok(Self {
            name,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// An event without payload.
    pub fn bare(name: EventName) -> Self {
        Self {
            name,
            payload: Value::Null,
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// A message recovered from the console stream by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    Event(Event),
}

impl TryFrom<Value> for Inbound {
    type Error = FrameError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let malformed = |e: serde_json::Error| FrameError::MalformedFrame(e.to_string());

        if value.get("event").is_some() {
            serde_json::from_value(value).map(Inbound::Event).map_err(malformed)
        } else if value.get("id").is_some() {
            serde_json::from_value(value).map(Inbound::Response).map_err(malformed)
        } else {
            Err(FrameError::MalformedFrame(
                "message is neither a response nor an event".into(),
            ))
        }
    }
}
