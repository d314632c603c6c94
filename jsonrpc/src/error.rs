//! JSON-RPC error objects and the standard error codes.

use serde::{Deserialize, Serialize};

/// Standard JSON-RPC 2.0 codes plus the LSP-specific ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    RequestCancelled,
    ContentModified,
    ServerCancelled,
    RequestFailed,
    Other(i64),
}

impl ErrorCode {
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerNotInitialized => -32002,
            Self::RequestCancelled => -32800,
            Self::ContentModified => -32801,
            Self::ServerCancelled => -32802,
            Self::RequestFailed => -32803,
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32002 => Self::ServerNotInitialized,
            -32800 => Self::RequestCancelled,
            -32801 => Self::ContentModified,
            -32802 => Self::ServerCancelled,
            -32803 => Self::RequestFailed,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// The `error` member of a failed response.
///
/// Implements [`std::error::Error`] so handlers can return it through
/// `anyhow::Error`; the dispatcher recovers it by downcasting and forwards the
/// code verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("jsonrpc error {code}: {message}")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        let message = format!("method not found: {method}");
        Self::new(ErrorCode::MethodNotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn server_not_initialized() -> Self {
        Self::new(ErrorCode::ServerNotInitialized, "server not initialized")
    }

    #[must_use]
    pub fn request_cancelled() -> Self {
        Self::new(ErrorCode::RequestCancelled, "request cancelled")
    }

    pub fn content_modified(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContentModified, message)
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::ServerNotInitialized.code(), -32002);
        assert_eq!(ErrorCode::RequestCancelled.code(), -32800);
        assert_eq!(ErrorCode::RequestFailed.code(), -32803);
    }

    #[test]
    fn test_from_code_recognises_known_and_other() {
        assert_eq!(ErrorCode::from_code(-32602), ErrorCode::InvalidParams);
        assert_eq!(ErrorCode::from_code(-32801), ErrorCode::ContentModified);
        assert_eq!(ErrorCode::from_code(7), ErrorCode::Other(7));
    }

    #[test]
    fn test_serialization_omits_absent_data() {
        let err = ResponseError::method_not_found("foo/bar");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], -32601);
        assert_eq!(json["message"], "method not found: foo/bar");
        assert!(json.get("data").is_none(), "data must be omitted, not null");
    }

    #[test]
    fn test_data_roundtrips() {
        let err =
            ResponseError::request_failed("nope").with_data(serde_json::json!({"retry": false}));
        let back: ResponseError =
            serde_json::from_value(serde_json::to_value(&err).unwrap()).unwrap();
        assert_eq!(back, err);
        assert_eq!(back.error_code(), ErrorCode::RequestFailed);
    }

    #[test]
    fn test_survives_anyhow_downcast() {
        let err: anyhow::Error = ResponseError::content_modified("stale").into();
        let err = err.context("while hovering");
        let recovered = err.downcast_ref::<ResponseError>().unwrap();
        assert_eq!(recovered.code, -32801);
    }
}
