//! Error taxonomy for the mapping layer.
//!
//! # Responsibility
//! - Separate construction-time configuration failures from store failures.
//! - Carry store failures through unmodified so callers see the driver error.
//!
//! # Invariants
//! - `ConfigError` is only produced while compiling metadata or building an
//!   executor/cache, never in the middle of a statement.
//! - `MapError::Store` wraps the collaborator error verbatim; nothing in this
//!   crate retries or rewrites it.

use crate::model::value::ScalarType;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MapResult<T> = Result<T, MapError>;

/// Problems with a record description detected while compiling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A key-typed API variant needs a specific number of key members.
    KeyCount {
        table: String,
        expected: usize,
        found: usize,
    },
    /// The key member's column type differs from the key type an API variant
    /// was instantiated with.
    KeyType {
        table: String,
        member: String,
        expected: ScalarType,
        found: ScalarType,
    },
    /// A table, column or member name cannot be used in statement text.
    InvalidIdentifier { kind: &'static str, value: String },
    /// Every member was excluded or non-scalar.
    NoColumns { table: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyCount {
                table,
                expected,
                found,
            } => write!(
                f,
                "table `{table}` must declare exactly {expected} key member(s), found {found}"
            ),
            Self::KeyType {
                table,
                member,
                expected,
                found,
            } => write!(
                f,
                "key member `{member}` of table `{table}` is {}, not {}",
                found.name(),
                expected.name()
            ),
            Self::InvalidIdentifier { kind, value } => {
                write!(f, "invalid {kind} identifier `{value}`")
            }
            Self::NoColumns { table } => {
                write!(f, "table `{table}` has no mappable scalar members")
            }
        }
    }
}

impl Error for ConfigError {}

/// A value read from the store could not be assigned to a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: String,
}

impl ConversionError {
    pub fn new(expected: &'static str, found: impl Into<String>) -> Self {
        Self {
            expected,
            found: found.into(),
        }
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected {} value, found {}", self.expected, self.found)
    }
}

impl Error for ConversionError {}

/// Top-level error returned by executor and cache operations.
#[derive(Debug)]
pub enum MapError {
    Config(ConfigError),
    Store(StoreError),
    Conversion {
        member: String,
        source: ConversionError,
    },
    /// Single-row operation on a key-less type without whole-table opt-in.
    KeylessSingleRow {
        table: String,
        operation: &'static str,
    },
    /// A supplied key does not line up with the compiled key members.
    KeyShape { table: String, message: String },
    /// The blocking worker running an async operation failed to join.
    Worker(String),
    /// A shared connection mutex was poisoned by a panicking holder.
    ConnectionPoisoned,
}

impl Display for MapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Conversion { member, source } => {
                write!(f, "cannot assign member `{member}`: {source}")
            }
            Self::KeylessSingleRow { table, operation } => write!(
                f,
                "`{operation}` on key-less table `{table}` would affect every row; opt into whole-table mode"
            ),
            Self::KeyShape { table, message } => {
                write!(f, "key does not match table `{table}`: {message}")
            }
            Self::Worker(message) => write!(f, "blocking worker failed: {message}"),
            Self::ConnectionPoisoned => write!(f, "shared connection mutex is poisoned"),
        }
    }
}

impl Error for MapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Conversion { source, .. } => Some(source),
            Self::KeylessSingleRow { .. } => None,
            Self::KeyShape { .. } => None,
            Self::Worker(_) => None,
            Self::ConnectionPoisoned => None,
        }
    }
}

impl From<ConfigError> for MapError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StoreError> for MapError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for MapError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}
