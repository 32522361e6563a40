//! Channel payloads, tagged at the serialization boundary.

use serde_json::{Number, Value};

/// A value emitted on or delivered to a channel.
///
/// Primitives other than strings ([`Payload::Null`], [`Payload::Bool`],
/// [`Payload::Number`]) travel raw. [`Payload::Text`] and
/// [`Payload::Structured`] travel compressed.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(Number),
    /// A string.
    Text(String),
    /// An object or array.
    Structured(Value),
}

impl Payload {
    /// Whether this payload bypasses compression.
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Null | Self::Bool(_) | Self::Number(_))
    }

    /// Borrow the text, if this is a [`Payload::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a plain JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Number(n) => Value::Number(n),
            Self::Text(s) => Value::String(s),
            Self::Structured(v) => v,
        }
    }

    /// Clone into a plain JSON value.
    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::Text(s),
            v @ (Value::Array(_) | Value::Object(_)) => Self::Structured(v),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Payload {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}
