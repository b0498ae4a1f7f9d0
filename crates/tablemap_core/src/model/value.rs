//! Storage-primitive values exchanged with the store.
//!
//! # Responsibility
//! - Represent one column value independently of the store driver.
//! - Convert between member types and `Value` through the `Scalar` trait.
//!
//! # Invariants
//! - `Value` equality and hashing are total: reals compare by bit pattern so
//!   values can serve as map keys.

use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Column type of a scalar member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    Integer,
    Real,
    Text,
    Blob,
    Uuid,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Uuid => "uuid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True when the value looks like an auto key the store has not assigned.
    pub fn is_unassigned(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Integer(value) => *value == 0,
            Self::Text(value) => value.is_empty(),
            Self::Uuid(value) => value.is_nil(),
            Self::Blob(value) => value.is_empty(),
            Self::Bool(_) | Self::Real(_) => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Uuid(_) => "uuid",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ConversionError {
        ConversionError::new(expected, self.kind())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(value) => value.hash(state),
            Self::Integer(value) => value.hash(state),
            Self::Real(value) => value.to_bits().hash(state),
            Self::Text(value) => value.hash(state),
            Self::Blob(value) => value.hash(state),
            Self::Uuid(value) => value.hash(state),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
            Self::Blob(value) => write!(f, "<{} bytes>", value.len()),
            Self::Uuid(value) => write!(f, "{value}"),
        }
    }
}

/// A member type that maps onto a single column.
pub trait Scalar: Clone + Send + Sync + 'static {
    const TYPE: ScalarType;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

macro_rules! impl_scalar {
    ($ty:ty, $scalar:ident, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value.into())
            }
        }

        impl Scalar for $ty {
            const TYPE: ScalarType = ScalarType::$scalar;

            fn into_value(self) -> Value {
                self.into()
            }

            fn from_value(value: Value) -> Result<Self, ConversionError> {
                Self::try_from(value)
            }
        }
    };
}

impl_scalar!(i64, Integer, Integer);
impl_scalar!(i32, Integer, Integer);
impl_scalar!(u32, Integer, Integer);
impl_scalar!(bool, Bool, Bool);
impl_scalar!(f64, Real, Real);
impl_scalar!(String, Text, Text);
impl_scalar!(Vec<u8>, Blob, Blob);
impl_scalar!(Uuid, Uuid, Uuid);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl<S: Scalar> Scalar for Option<S> {
    const TYPE: ScalarType = S::TYPE;

    fn into_value(self) -> Value {
        self.map_or(Value::Null, Scalar::into_value)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => S::from_value(other).map(Some),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(value) => Ok(value),
            Value::Bool(value) => Ok(i64::from(value)),
            other => Err(other.mismatch("integer")),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let wide = i64::try_from(value)?;
        i32::try_from(wide).map_err(|_| ConversionError::new("i32", wide.to_string()))
    }
}

impl TryFrom<Value> for u32 {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let wide = i64::try_from(value)?;
        u32::try_from(wide).map_err(|_| ConversionError::new("u32", wide.to_string()))
    }
}

impl TryFrom<Value> for bool {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(value) => Ok(value),
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            other => Err(other.mismatch("bool")),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Real(value) => Ok(value),
            // SQLite hands back whole reals as integers when column affinity allows.
            Value::Integer(value) => Ok(value as f64),
            other => Err(other.mismatch("real")),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(value) => Ok(value),
            Value::Uuid(value) => Ok(value.to_string()),
            other => Err(other.mismatch("text")),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Blob(value) => Ok(value),
            other => Err(other.mismatch("blob")),
        }
    }
}

impl TryFrom<Value> for Uuid {
    type Error = ConversionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Uuid(value) => Ok(value),
            Value::Text(text) => Uuid::parse_str(&text)
                .map_err(|_| ConversionError::new("uuid", format!("text `{text}`"))),
            Value::Blob(bytes) => Uuid::from_slice(&bytes)
                .map_err(|_| ConversionError::new("uuid", format!("{} byte blob", bytes.len()))),
            other => Err(other.mismatch("uuid")),
        }
    }
}
