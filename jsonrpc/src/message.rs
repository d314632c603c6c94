//! JSON-RPC 2.0 message types and structural classification.
//!
//! Messages carry no explicit type tag. A decoded body is classified by
//! which members it has:
//!
//! | non-null `id` | `method` | kind         |
//! |---------------|----------|--------------|
//! | yes           | yes      | Request      |
//! | yes           | no       | Response     |
//! | no            | yes      | Notification |
//! | no            | no       | invalid      |

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ResponseError;
use crate::id::{InvalidRequestId, RequestId};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A reply to a [`Request`]. `result` and `error` are mutually exclusive,
/// which the `Result` encodes directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Result<Value, ResponseError>,
}

impl Response {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Ok(result),
        }
    }

    pub fn error(id: RequestId, error: ResponseError) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    /// Borrow the error object, if this is a failure response.
    #[must_use]
    pub fn error_object(&self) -> Option<&ResponseError> {
        self.result.as_ref().err()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

/// Why a frame body could not be turned into a [`Message`].
///
/// `id` is only populated when the body was request-shaped (a well-formed
/// non-null `id` and a `method` member), so the caller can still answer it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct DecodeError {
    id: Option<RequestId>,
    kind: DecodeErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("invalid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("message must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    InvalidId(#[from] InvalidRequestId),
    #[error("method must be a string")]
    InvalidMethod,
    #[error("malformed error object: {0}")]
    InvalidErrorObject(#[source] serde_json::Error),
    #[error("response carries both result and error")]
    ResultAndError,
    #[error("cannot determine message type: no id and no method")]
    Unclassifiable,
}

impl DecodeError {
    fn new(kind: DecodeErrorKind) -> Self {
        Self { id: None, kind }
    }

    /// The request ID recovered from the malformed body, if any.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }
}

impl Message {
    /// Decode and classify a frame body.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| DecodeError::new(DecodeErrorKind::Syntax(e)))?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(mut map) = value else {
            return Err(DecodeError::new(DecodeErrorKind::NotAnObject));
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                RequestId::from_value(&raw).map_err(|e| DecodeError::new(e.into()))?,
            ),
        };

        match (id, map.remove("method")) {
            (Some(id), Some(method)) => {
                let Value::String(method) = method else {
                    return Err(DecodeError {
                        id: Some(id),
                        kind: DecodeErrorKind::InvalidMethod,
                    });
                };
                Ok(Self::Request(Request {
                    id,
                    method,
                    params: map.remove("params"),
                }))
            }
            (Some(id), None) => decode_response(id, &mut map).map(Self::Response),
            (None, Some(Value::String(method))) => Ok(Self::Notification(Notification {
                method,
                params: map.remove("params"),
            })),
            (None, Some(_)) => Err(DecodeError::new(DecodeErrorKind::InvalidMethod)),
            (None, None) => Err(DecodeError::new(DecodeErrorKind::Unclassifiable)),
        }
    }

    /// Serialize to the JSON body of a frame.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Notification(_) => None,
        }
    }
}

fn decode_response(id: RequestId, map: &mut Map<String, Value>) -> Result<Response, DecodeError> {
    let result = map.remove("result");
    let error = map.remove("error");
    match (result, error) {
        (Some(_), Some(_)) => Err(DecodeError::new(DecodeErrorKind::ResultAndError)),
        (_, Some(error)) => {
            let error: ResponseError = serde_json::from_value(error)
                .map_err(|e| DecodeError::new(DecodeErrorKind::InvalidErrorObject(e)))?;
            Ok(Response::error(id, error))
        }
        (result, None) => Ok(Response::ok(id, result.unwrap_or(Value::Null))),
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ResponseError>,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = WireMessage {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match self {
            Self::Request(req) => {
                wire.id = Some(&req.id);
                wire.method = Some(&req.method);
                wire.params = req.params.as_ref();
            }
            Self::Response(resp) => {
                wire.id = Some(&resp.id);
                match &resp.result {
                    Ok(result) => wire.result = Some(result),
                    Err(error) => wire.error = Some(error),
                }
            }
            Self::Notification(notif) => {
                wire.method = Some(&notif.method);
                wire.params = notif.params.as_ref();
            }
        }
        wire.serialize(serializer)
    }
}
