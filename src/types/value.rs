//! The tagged value held under each key.

use super::{List, Stream, Timestamp};
use bytes::Bytes;
use std::fmt;

/// A stored value.
///
/// Each key owns its value outright; the reactor is the only writer, so no
/// interior sharing is needed.
#[derive(Debug, Clone)]
pub enum Value {
    /// Binary-safe string with an optional absolute expiry (epoch ms).
    String {
        data: Bytes,
        expires_at: Option<Timestamp>,
    },

    /// List of strings.
    List(List),

    /// Append-only stream.
    Stream(Stream),
}

impl Value {
    /// A string value that never expires.
    #[inline]
    pub fn string(data: impl Into<Bytes>) -> Self {
        Self::String {
            data: data.into(),
            expires_at: None,
        }
    }

    /// Returns the type of this value.
    #[inline]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String { .. } => ValueType::String,
            Self::List(_) => ValueType::List,
            Self::Stream(_) => ValueType::Stream,
        }
    }

    /// True once the value's expiry lies at or before `now`.
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self {
            Self::String {
                expires_at: Some(at),
                ..
            } => *at <= now,
            _ => false,
        }
    }
}

/// Value type tags, as reported by TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    List,
    Stream,
}

impl ValueType {
    /// Returns the type name as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_names() {
        assert_eq!(Value::string("v").value_type().as_str(), "string");
        assert_eq!(Value::List(List::new()).value_type().as_str(), "list");
        assert_eq!(Value::Stream(Stream::new()).value_type().to_string(), "stream");
    }

    #[test]
    fn test_expiry_boundary() {
        let value = Value::String {
            data: Bytes::from("v"),
            expires_at: Some(1_000),
        };
        assert!(!value.is_expired(999));
        assert!(value.is_expired(1_000));
        assert!(!Value::string("v").is_expired(i64::MAX));
    }
}
