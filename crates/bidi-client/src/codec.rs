//! Wire codec: commands out, classified messages in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, ClientErrorKind};

/// Client-issued request.
///
/// Fields other than `id`, `method` and `params` (for example `channel` or `goog:channel`)
/// travel in `extra` and are written back verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Command {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
            extra: Map::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Outcome carried by a response.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponsePayload {
    Success(Value),
    Error {
        error: String,
        message: String,
        stacktrace: Option<String>,
        raw: Value,
    },
}

impl ResponsePayload {
    pub fn into_result(self) -> Result<Value, ClientError> {
        match self {
            ResponsePayload::Success(value) => Ok(value),
            ResponsePayload::Error {
                error,
                message,
                raw,
                ..
            } => Err(ClientError::command(error, message).with_data(raw)),
        }
    }
}

/// Classified inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Response { id: u64, payload: ResponsePayload },
    Event(Event),
    Malformed { raw: String },
}

/// Unsolicited notification from the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub method: String,
    pub params: Value,
    /// The whole decoded object, for predicates that look past `params`.
    pub raw: Value,
}

impl Message {
    /// `(error, message)` of an id-less protocol error, if this is one.
    pub fn protocol_error(&self) -> Option<(String, String)> {
        match self {
            Message::Malformed { raw } => protocol_error(raw),
            _ => None,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

pub fn encode(command: &Command) -> Result<String, ClientError> {
    if command.id.is_none() {
        return Err(ClientError::new(ClientErrorKind::Internal)
            .with_hint(format!("command {} has no id", command.method)));
    }
    serde_json::to_string(command).map_err(|err| {
        ClientError::new(ClientErrorKind::Internal)
            .with_hint(format!("failed to encode {}: {err}", command.method))
    })
}

/// Classifies wire text. Never fails: anything unrecognisable becomes [`Message::Malformed`].
pub fn decode(text: &str) -> Message {
    let malformed = || Message::Malformed {
        raw: text.to_string(),
    };

    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) else {
        return malformed();
    };

    match object.get("id") {
        Some(Value::Null) | None => {}
        Some(id) => {
            let Some(id) = id.as_u64() else {
                return malformed();
            };
            return Message::Response {
                id,
                payload: response_payload(object),
            };
        }
    }

    let method = match object.get("method") {
        Some(Value::String(method)) => method.clone(),
        _ => return malformed(),
    };
    let params = object.get("params").cloned().unwrap_or_else(empty_object);
    Message::Event(Event {
        method,
        params,
        raw: Value::Object(object),
    })
}

fn response_payload(mut object: Map<String, Value>) -> ResponsePayload {
    if object.contains_key("error") {
        let raw = Value::Object(object.clone());
        let text = |value: Option<&Value>| match value {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        return ResponsePayload::Error {
            error: text(object.get("error")),
            message: text(object.get("message")),
            stacktrace: object
                .get("stacktrace")
                .and_then(Value::as_str)
                .map(str::to_string),
            raw,
        };
    }
    ResponsePayload::Success(object.remove("result").unwrap_or_else(empty_object))
}

/// `(error, message)` when `raw` is an id-less error object such as
/// `{"error": "invalid argument", "message": "..."}`.
pub fn protocol_error(raw: &str) -> Option<(String, String)> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let error = value.get("error")?.as_str()?.to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((error, message))
}
