//! Bidirectional mapping between frame payloads and typed messages.
//!
//! Decoding is strict: the payload must be a JSON object carrying
//! `jsonrpc: "2.0"`, and the message category is determined purely by field
//! presence. Malformed JSON maps to a parse error (`-32700`, answered with a
//! null id); structurally non-conforming JSON maps to an invalid request
//! (`-32600`). Unknown top-level fields are tolerated for forward
//! compatibility.
//!
//! Encoding is total and deterministic: object keys serialize in sorted
//! order, so `encode(decode(b)) == b` holds for any `b` this encoder
//! produced. String fields are carried through owned buffers end to end and
//! must survive byte-for-byte (guarded by round-trip tests on every response
//! variant).

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::{Message, RequestId, ResponseBody, RpcError, JSONRPC_VERSION, MAX_METHOD_LEN};

/// Decode failure classification
///
/// The two variants map directly onto the protocol's parse-error and
/// invalid-request codes, which is everything a caller needs to construct
/// the right reply.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload was not valid JSON (`-32700`, reply with null id)
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that is not a conforming JSON-RPC 2.0 message (`-32600`)
    #[error("invalid request: {0}")]
    Invalid(&'static str),
}

/// Id field as found on the wire, before category rules are applied
enum RawId {
    Absent,
    Null,
    Id(RequestId),
}

fn parse_id(value: Option<&Value>) -> Result<RawId, DecodeError> {
    match value {
        None => Ok(RawId::Absent),
        Some(Value::Null) => Ok(RawId::Null),
        Some(Value::String(s)) => Ok(RawId::Id(RequestId::Str(s.clone()))),
        Some(Value::Number(n)) => {
            // Integers only; fractional ids and numbers outside i64 are rejected
            match n.as_i64() {
                Some(i) => Ok(RawId::Id(RequestId::Num(i))),
                None => Err(DecodeError::Invalid("id must be a string or an integer")),
            }
        }
        Some(_) => Err(DecodeError::Invalid("id must be a string or an integer")),
    }
}

fn parse_error_object(value: &Value) -> Result<RpcError, DecodeError> {
    let obj = value
        .as_object()
        .ok_or(DecodeError::Invalid("error must be an object"))?;
    let code = obj
        .get("code")
        .and_then(Value::as_i64)
        .ok_or(DecodeError::Invalid("error.code must be an integer"))?;
    let code = i32::try_from(code)
        .map_err(|_| DecodeError::Invalid("error.code out of range"))?;
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .ok_or(DecodeError::Invalid("error.message must be a string"))?
        .to_string();
    Ok(RpcError {
        code,
        message,
        data: obj.get("data").cloned(),
    })
}

/// Decode a frame payload into a typed message
///
/// Classification by field presence:
/// - `method` + id present: Request
/// - `method` present, id field absent: Notification
/// - id present, `method` absent, exactly one of `result`/`error`: Response
///
/// A null id is accepted only on responses (where it marks a parse-error
/// reply); a request with a null id is non-conforming.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let obj = value
        .as_object()
        .ok_or(DecodeError::Invalid("message must be a JSON object"))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        _ => return Err(DecodeError::Invalid("jsonrpc must be \"2.0\"")),
    }

    let id = parse_id(obj.get("id"))?;
    let method = match obj.get("method") {
        None => None,
        Some(Value::String(m)) => {
            if m.len() > MAX_METHOD_LEN {
                return Err(DecodeError::Invalid("method name too long"));
            }
            Some(m.clone())
        }
        Some(_) => return Err(DecodeError::Invalid("method must be a string")),
    };
    let result = obj.get("result");
    let error = obj.get("error");

    match (method, id) {
        (Some(method), id_field) => {
            // Requests and notifications never carry result/error members
            if result.is_some() || error.is_some() {
                return Err(DecodeError::Invalid(
                    "method messages must not carry result or error",
                ));
            }
            let params = obj.get("params").cloned();
            match id_field {
                RawId::Id(id) => Ok(Message::Request { id, method, params }),
                RawId::Absent => Ok(Message::Notification { method, params }),
                RawId::Null => Err(DecodeError::Invalid("request id must not be null")),
            }
        }
        (None, id_field) => {
            let id = match id_field {
                RawId::Id(id) => Some(id),
                RawId::Null => None,
                RawId::Absent => {
                    return Err(DecodeError::Invalid(
                        "message carries neither method nor id",
                    ))
                }
            };
            let body = match (result, error) {
                (Some(result), None) => ResponseBody::Result(result.clone()),
                (None, Some(error)) => ResponseBody::Error(parse_error_object(error)?),
                (Some(_), Some(_)) => {
                    return Err(DecodeError::Invalid(
                        "response carries both result and error",
                    ))
                }
                (None, None) => {
                    return Err(DecodeError::Invalid(
                        "response carries neither result nor error",
                    ))
                }
            };
            Ok(Message::Response { id, body })
        }
    }
}

fn id_to_value(id: &RequestId) -> Value {
    match id {
        RequestId::Str(s) => Value::String(s.clone()),
        RequestId::Num(n) => json!(n),
    }
}

fn params_is_empty(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Encode a typed message into a frame payload
///
/// Always emits `jsonrpc: "2.0"`. Responses carry the echoed id (null for
/// parse-error replies) and exactly one of `result`/`error`; requests and
/// notifications carry `params` only when non-empty. Numeric ids stay JSON
/// numbers and string ids stay JSON strings.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut obj = Map::new();
    obj.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));

    match message {
        Message::Request { id, method, params } => {
            obj.insert("id".to_string(), id_to_value(id));
            obj.insert("method".to_string(), json!(method));
            if let Some(params) = params {
                if !params_is_empty(params) {
                    obj.insert("params".to_string(), params.clone());
                }
            }
        }
        Message::Notification { method, params } => {
            obj.insert("method".to_string(), json!(method));
            if let Some(params) = params {
                if !params_is_empty(params) {
                    obj.insert("params".to_string(), params.clone());
                }
            }
        }
        Message::Response { id, body } => {
            let id_value = match id {
                Some(id) => id_to_value(id),
                None => Value::Null,
            };
            obj.insert("id".to_string(), id_value);
            match body {
                ResponseBody::Result(result) => {
                    obj.insert("result".to_string(), result.clone());
                }
                ResponseBody::Error(error) => {
                    let mut err = Map::new();
                    err.insert("code".to_string(), json!(error.code));
                    err.insert("message".to_string(), json!(error.message));
                    if let Some(data) = &error.data {
                        err.insert("data".to_string(), data.clone());
                    }
                    obj.insert("error".to_string(), Value::Object(err));
                }
            }
        }
    }

    // Serialization of a Map cannot fail; fall back to a bare parse-error
    // body if it ever does rather than panicking in the send path.
    serde_json::to_vec(&Value::Object(obj))
        .unwrap_or_else(|_| br#"{"error":{"code":-32603,"message":"Internal error"},"id":null,"jsonrpc":"2.0"}"#.to_vec())
}
