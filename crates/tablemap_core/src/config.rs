//! Mapper configuration.
//!
//! # Responsibility
//! - Select the statement dialect used by a registry.
//! - Provide defaults inherited by every executor built from that registry.
//!
//! # Invariants
//! - Configuration is read once, at registry construction. Changing it later
//!   has no effect on already compiled metadata.

use crate::metadata::dialect::{SqlDialect, SqlServerDialect, SqliteDialect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Target SQL dialect for generated statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    #[default]
    Sqlite,
    SqlServer,
}

impl DialectKind {
    pub fn build(self) -> Arc<dyn SqlDialect> {
        match self {
            Self::Sqlite => Arc::new(SqliteDialect),
            Self::SqlServer => Arc::new(SqlServerDialect),
        }
    }
}

/// How single-row operations behave on a record type without key members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeylessMode {
    /// Reject single-row operations with `MapError::KeylessSingleRow`.
    #[default]
    ByKey,
    /// Let single-row operations act on the whole table.
    WholeTable,
}

/// Registry-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub dialect: DialectKind,
    /// Timeout hint forwarded to the store on every call.
    pub command_timeout_ms: Option<u64>,
    pub keyless_mode: KeylessMode,
}

impl MapperConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}
