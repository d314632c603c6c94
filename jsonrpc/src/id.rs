//! JSON-RPC request identifiers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A JSON-RPC 2.0 request ID: an integer, a string, or null.
///
/// Equality is variant-aware, so `42` and `"42"` are different IDs. Tables
/// key on the value itself rather than on its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestId {
    Number(i64),
    String(String),
    /// Absent or explicit `null`. Only appears on error responses to
    /// requests whose ID could not be recovered.
    Null,
}

#[derive(Debug, thiserror::Error)]
#[error("request ID must be an integer or a string, got {found}")]
pub struct InvalidRequestId {
    found: String,
}

impl RequestId {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Interpret a raw JSON value as an ID.
    pub fn from_value(value: &Value) -> Result<Self, InvalidRequestId> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number).ok_or_else(|| {
                InvalidRequestId {
                    found: n.to_string(),
                }
            }),
            other => Err(InvalidRequestId {
                found: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for RequestId {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_id_encodes_as_number() {
        let id = RequestId::Number(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_string_id_encodes_as_string() {
        let id = RequestId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc""#);
        let back: RequestId = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_null_id_encodes_as_null() {
        assert_eq!(serde_json::to_string(&RequestId::Null).unwrap(), "null");
        let back: RequestId = serde_json::from_str("null").unwrap();
        assert!(back.is_null());
    }

    #[test]
    fn test_number_and_string_forms_are_distinct() {
        assert_ne!(RequestId::Number(42), RequestId::from("42"));
        assert_ne!(RequestId::Null, RequestId::from("null"));
        assert_eq!(RequestId::Number(42).to_string(), "42");
    }

    #[test]
    fn test_rejects_fractional_and_structured_ids() {
        assert!(serde_json::from_str::<RequestId>("1.5").is_err());
        assert!(serde_json::from_str::<RequestId>("[1]").is_err());
        assert!(serde_json::from_str::<RequestId>("true").is_err());
    }
}
