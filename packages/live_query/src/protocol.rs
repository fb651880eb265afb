//! Wire protocol: JSON text frames discriminated by an `op` field.
//!
//! Outbound operations are plain serde types. Inbound responses are decoded
//! by hand so that a missing or mistyped field can be reported by name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LiveQueryError;
use crate::event::EventKind;
use crate::request_id::RequestId;

/// Operations sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientOperation {
    #[serde(rename_all = "camelCase")]
    Connect {
        application_id: String,
        session_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_key: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Subscribe {
        request_id: RequestId,
        /// Already-encoded `{"className", "where"}` value.
        query: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Unsubscribe { request_id: RequestId },
}

impl ClientOperation {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    Connected,
    Redirect {
        url: String,
    },
    Subscribed {
        request_id: RequestId,
    },
    Unsubscribed {
        request_id: RequestId,
    },
    Event {
        kind: EventKind,
        request_id: RequestId,
        object: Map<String, Value>,
    },
    Error {
        request_id: Option<RequestId>,
        code: i64,
        message: String,
        reconnect: bool,
    },
}

impl ServerResponse {
    /// The correlation id, when the response carries one.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Connected | Self::Redirect { .. } => None,
            Self::Subscribed { request_id }
            | Self::Unsubscribed { request_id }
            | Self::Event { request_id, .. } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
        }
    }
}

/// Serialize an operation to its JSON text frame.
pub fn encode_operation(operation: &ClientOperation) -> Result<String, LiveQueryError> {
    serde_json::to_string(operation).map_err(|e| LiveQueryError::transport(format!(
        "failed to serialize {} operation: {e}",
        operation.op()
    )))
}

/// Decode one inbound text frame.
///
/// Text that is not a JSON object fails with `InvalidResponse`. A missing,
/// unknown or mistyped `op`, or any required field that is missing or of the
/// wrong type, fails with `InvalidJson` naming the key.
pub fn decode_response(raw: &str) -> Result<ServerResponse, LiveQueryError> {
    let json = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(json)) => json,
        _ => {
            return Err(LiveQueryError::InvalidResponse {
                raw: raw.to_string(),
            });
        }
    };
    let fields = Fields { json: &json, raw };

    let op = fields.string("op")?;
    let response = match op.as_str() {
        "connected" => ServerResponse::Connected,
        "redirect" => ServerResponse::Redirect {
            url: fields.string("url")?,
        },
        "subscribed" => ServerResponse::Subscribed {
            request_id: fields.request_id()?,
        },
        "unsubscribed" => ServerResponse::Unsubscribed {
            request_id: fields.request_id()?,
        },
        "enter" => fields.event(EventKind::Entered)?,
        "leave" => fields.event(EventKind::Left)?,
        "create" => fields.event(EventKind::Created)?,
        "update" => fields.event(EventKind::Updated)?,
        "delete" => fields.event(EventKind::Deleted)?,
        "error" => ServerResponse::Error {
            // A connection-level error has no correlation id.
            request_id: fields.request_id().ok(),
            code: fields.integer("code")?,
            message: fields.string("error")?,
            reconnect: fields.boolean("reconnect")?,
        },
        _ => return Err(LiveQueryError::invalid_json(raw, "op")),
    };
    Ok(response)
}

/// Best-effort correlation id of a frame that may have failed to decode.
pub(crate) fn request_id_hint(raw: &str) -> Option<RequestId> {
    serde_json::from_str::<Value>(raw)
        .ok()?
        .get("requestId")?
        .as_u64()
        .map(RequestId::new)
}

struct Fields<'a> {
    json: &'a Map<String, Value>,
    raw: &'a str,
}

impl Fields<'_> {
    fn missing(&self, key: &str) -> LiveQueryError {
        LiveQueryError::invalid_json(self.raw, key)
    }

    fn string(&self, key: &str) -> Result<String, LiveQueryError> {
        match self.json.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(self.missing(key)),
        }
    }

    fn integer(&self, key: &str) -> Result<i64, LiveQueryError> {
        self.json
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.missing(key))
    }

    fn boolean(&self, key: &str) -> Result<bool, LiveQueryError> {
        self.json
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.missing(key))
    }

    fn request_id(&self) -> Result<RequestId, LiveQueryError> {
        self.json
            .get("requestId")
            .and_then(Value::as_u64)
            .map(RequestId::new)
            .ok_or_else(|| self.missing("requestId"))
    }

    fn event(&self, kind: EventKind) -> Result<ServerResponse, LiveQueryError> {
        let request_id = self.request_id()?;
        let object = match self.json.get("object") {
            Some(Value::Object(object)) => object.clone(),
            _ => return Err(self.missing("object")),
        };
        Ok(ServerResponse::Event {
            kind,
            request_id,
            object,
        })
    }
}
