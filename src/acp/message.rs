//! JSON-RPC 2.0 message codec.
//!
//! Outbound messages are serialised through small `Serialize` structs so the
//! wire layout is stable (`jsonrpc`, `id`, then `method`/`params`,
//! `result` or `error`). Inbound lines are classified strictly by which of
//! `result`, `error` and `method` are present:
//!
//! | Present        | `id`       | Decodes to                          |
//! |----------------|------------|-------------------------------------|
//! | `result` only  | required   | [`InboundMessage::Result`]          |
//! | `error` only   | optional   | [`InboundMessage::Error`]           |
//! | `method` only  | present    | [`InboundMessage::Request`]         |
//! | `method` only  | absent     | [`InboundMessage::Notification`]    |
//! | none / several | –          | [`AppError::Decode`]                |
//!
//! Encoded text never contains a raw newline; the framing layer
//! ([`super::codec::AcpCodec`]) appends the terminator.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Generic handler failure.
pub const INTERNAL_ERROR: i64 = -32603;

/// Reserved for ad hoc client-side errors.
pub const CLIENT_ERROR: i64 = -32000;

/// Identifier correlating a request with its response.
///
/// The client only ever allocates integers, but ids chosen by the agent are
/// echoed back in whatever JSON type they arrived as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id (the common case, and the only kind this client emits).
    Number(i64),
    /// String id.
    Text(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an [`INTERNAL_ERROR`] with `message`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }

    /// Render the error for display to the host.
    ///
    /// When `data` is an object its entries are appended as a comma-joined
    /// `key:value` list, e.g. `Quota exceeded: limit:5, window:60s`. String
    /// values are shown without quotes.
    #[must_use]
    pub fn summary(&self) -> String {
        let message = if self.message.is_empty() {
            "Internal error"
        } else {
            self.message.as_str()
        };

        match &self.data {
            Some(Value::Object(map)) if !map.is_empty() => {
                let details = map
                    .iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => format!("{k}:{s}"),
                        other => format!("{k}:{other}"),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{message}: {details}")
            }
            _ => message.to_owned(),
        }
    }
}

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Successful response to one of our requests.
    Result {
        /// Id of the request being answered.
        id: RequestId,
        /// The `result` payload (may be `null`).
        result: Value,
    },
    /// Error response. `id` is absent when the agent could not parse our
    /// request.
    Error {
        /// Id of the request being answered, if known.
        id: Option<RequestId>,
        /// The `error` payload.
        error: RpcError,
    },
    /// Agent-initiated call that expects a correlated response.
    Request {
        /// Id to echo in the response.
        id: RequestId,
        /// Method name.
        method: String,
        /// Method parameters (`null` when omitted).
        params: Value,
    },
    /// Agent-initiated notification; no response is sent.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters (`null` when omitted).
        params: Value,
    },
}

impl InboundMessage {
    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Result { .. } | Self::Error { .. } => None,
        }
    }

    /// Correlation id, when the message carries one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Result { id, .. } | Self::Request { id, .. } => Some(id),
            Self::Error { id, .. } => id.as_ref(),
            Self::Notification { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct OutboundRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct OutboundResponse<'a, T: Serialize> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a T>,
}

#[derive(Serialize)]
struct OutboundError<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    error: &'a RpcError,
}

/// Encode a request line.
///
/// # Errors
///
/// Returns [`AppError::Acp`] if serialisation fails.
pub fn encode_request(id: i64, method: &str, params: Option<&Value>) -> Result<String> {
    to_line(&OutboundRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    })
}

/// Encode a success response line. `result` is omitted when `None`.
///
/// # Errors
///
/// Returns [`AppError::Acp`] if serialisation fails.
pub fn encode_response<T: Serialize>(id: &RequestId, result: Option<&T>) -> Result<String> {
    to_line(&OutboundResponse {
        jsonrpc: JSONRPC_VERSION,
        id,
        result,
    })
}

/// Encode an error response line.
///
/// # Errors
///
/// Returns [`AppError::Acp`] if serialisation fails.
pub fn encode_error_response(id: &RequestId, code: i64, message: &str) -> Result<String> {
    to_line(&OutboundError {
        jsonrpc: JSONRPC_VERSION,
        id,
        error: &RpcError {
            code,
            message: message.to_owned(),
            data: None,
        },
    })
}

/// Decode one inbound line.
///
/// # Errors
///
/// Returns [`AppError::Decode`] when the line is not a JSON object, when
/// none or more than one of `result`/`error`/`method` is present, or when
/// a member has the wrong type.
pub fn decode(line: &str) -> Result<InboundMessage> {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;

    let Value::Object(mut obj) = value else {
        return Err(AppError::Decode("message is not a JSON object".into()));
    };

    let shape = (
        obj.contains_key("result"),
        obj.contains_key("error"),
        obj.contains_key("method"),
    );

    match shape {
        (true, false, false) => {
            let id = take_id(&mut obj)?
                .ok_or_else(|| AppError::Decode("result without id".into()))?;
            let result = obj.remove("result").unwrap_or(Value::Null);
            Ok(InboundMessage::Result { id, result })
        }
        (false, true, false) => {
            let id = take_id(&mut obj)?;
            let raw = obj.remove("error").unwrap_or(Value::Null);
            let error: RpcError = serde_json::from_value(raw)
                .map_err(|e| AppError::Decode(format!("invalid error member: {e}")))?;
            Ok(InboundMessage::Error { id, error })
        }
        (false, false, true) => {
            let method = match obj.remove("method") {
                Some(Value::String(m)) => m,
                _ => return Err(AppError::Decode("method must be a string".into())),
            };
            let params = obj.remove("params").unwrap_or(Value::Null);
            match take_id(&mut obj)? {
                Some(id) => Ok(InboundMessage::Request { id, method, params }),
                None => Ok(InboundMessage::Notification { method, params }),
            }
        }
        (false, false, false) => Err(AppError::Decode(
            "message has none of result, error or method".into(),
        )),
        _ => Err(AppError::Decode(
            "ambiguous message: more than one of result, error or method".into(),
        )),
    }
}

fn take_id(obj: &mut Map<String, Value>) -> Result<Option<RequestId>> {
    match obj.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or_else(|| AppError::Decode(format!("id is not an integer: {n}"))),
        Some(Value::String(s)) => Ok(Some(RequestId::Text(s))),
        Some(other) => Err(AppError::Decode(format!(
            "id must be an integer or string, got {other}"
        ))),
    }
}

fn to_line<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Acp(format!("failed to serialise outbound message: {e}")))
}
