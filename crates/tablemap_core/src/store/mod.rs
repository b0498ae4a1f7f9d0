//! Store collaborator boundary.
//!
//! # Responsibility
//! - Define the minimal capability the executor needs from a relational store:
//!   execute, query, execute-scalar, begin/commit transaction.
//! - Host the SQLite implementation over `rusqlite`.
//!
//! # Invariants
//! - A transaction that is dropped without `commit()` is rolled back by the
//!   collaborator.
//! - Statement parameters are bound by name; parameters the statement does not
//!   reference are ignored, referenced but missing ones are an error.

mod open;
pub mod sqlite;

pub use open::{open_db, open_db_in_memory};

use crate::model::key::Params;
use crate::model::value::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// The statement references a parameter that was not supplied.
    UnboundParameter(String),
    /// Failure reported by a non-SQLite collaborator.
    Driver(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnboundParameter(name) => write!(f, "statement parameter `{name}` is not bound"),
            Self::Driver(message) => write!(f, "{message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnboundParameter(_) => None,
            Self::Driver(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One result row as ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Looks a column up by name, falling back to a case-insensitive match.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
            })
            .map(|(_, value)| value)
    }

    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<C: Into<String>> FromIterator<(C, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (C, Value)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(column, value)| (column.into(), value))
                .collect(),
        )
    }
}

/// Something statements can run against: a connection or a transaction.
pub trait SqlSession {
    /// Runs a statement that returns no rows; yields the affected row count.
    fn execute(&self, sql: &str, params: &Params, timeout: Option<Duration>) -> StoreResult<usize>;

    fn query(&self, sql: &str, params: &Params, timeout: Option<Duration>) -> StoreResult<Vec<Row>>;

    /// First column of the first row, if any.
    fn execute_scalar(
        &self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> StoreResult<Option<Value>> {
        let rows = self.query(sql, params, timeout)?;
        Ok(rows.first().and_then(Row::first).cloned())
    }
}

pub trait SqlTransaction: SqlSession {
    fn commit(self) -> StoreResult<()>;
}

pub trait SqlConnection: SqlSession {
    type Transaction<'c>: SqlTransaction
    where
        Self: 'c;

    fn begin_transaction(&self) -> StoreResult<Self::Transaction<'_>>;
}
