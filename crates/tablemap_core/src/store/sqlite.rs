//! SQLite store collaborator over `rusqlite`.
//!
//! # Invariants
//! - Statements go through the connection's prepared-statement cache, so the
//!   compiled templates are parsed once per connection.
//! - Implicit transactions use `unchecked_transaction`, which only needs a
//!   shared borrow; rusqlite rolls them back on drop.
//! - A timeout hint sets the busy timeout for one statement only; the
//!   connection's previous setting is restored once the statement finished.

use super::{Row, SqlConnection, SqlSession, SqlTransaction, StoreError, StoreResult};
use crate::model::key::Params;
use crate::model::value::Value;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use log::warn;
use rusqlite::{Connection, Transaction};
use std::time::Duration;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(value) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*value))),
            Value::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Value::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            Value::Uuid(value) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Text(value.to_string()))
            }
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Busy timeout override that lasts as long as the guard.
struct BusyTimeoutScope<'c> {
    conn: &'c Connection,
    previous: Option<Duration>,
}

impl<'c> BusyTimeoutScope<'c> {
    fn enter(conn: &'c Connection, timeout: Option<Duration>) -> StoreResult<Self> {
        let Some(timeout) = timeout else {
            return Ok(Self {
                conn,
                previous: None,
            });
        };
        let previous_ms: i64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
        conn.busy_timeout(timeout)?;
        Ok(Self {
            conn,
            previous: Some(Duration::from_millis(
                u64::try_from(previous_ms).unwrap_or_default(),
            )),
        })
    }
}

impl Drop for BusyTimeoutScope<'_> {
    fn drop(&mut self) {
        let Some(previous) = self.previous else {
            return;
        };
        if let Err(err) = self.conn.busy_timeout(previous) {
            warn!("event=busy_timeout_restore module=store status=error error={err}");
        }
    }
}

fn prepare<'c>(
    conn: &'c Connection,
    sql: &str,
    params: &Params,
) -> StoreResult<rusqlite::CachedStatement<'c>> {
    let mut stmt = conn.prepare_cached(sql)?;
    for index in 1..=stmt.parameter_count() {
        let name = stmt.parameter_name(index).map(str::to_string).unwrap_or_default();
        let value = params
            .get(&name)
            .ok_or_else(|| StoreError::UnboundParameter(name.clone()))?;
        stmt.raw_bind_parameter(index, value)?;
    }
    Ok(stmt)
}

fn execute_on(
    conn: &Connection,
    sql: &str,
    params: &Params,
    timeout: Option<Duration>,
) -> StoreResult<usize> {
    let _timeout = BusyTimeoutScope::enter(conn, timeout)?;
    let mut stmt = prepare(conn, sql, params)?;
    Ok(stmt.raw_execute()?)
}

fn query_on(
    conn: &Connection,
    sql: &str,
    params: &Params,
    timeout: Option<Duration>,
) -> StoreResult<Vec<Row>> {
    let _timeout = BusyTimeoutScope::enter(conn, timeout)?;
    let mut stmt = prepare(conn, sql, params)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    let mut rows = stmt.raw_query();
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut columns = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            columns.push((name.clone(), value_from_ref(row.get_ref(index)?)));
        }
        result.push(Row::new(columns));
    }
    Ok(result)
}

impl SqlSession for Connection {
    fn execute(&self, sql: &str, params: &Params, timeout: Option<Duration>) -> StoreResult<usize> {
        execute_on(self, sql, params, timeout)
    }

    fn query(
        &self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> StoreResult<Vec<Row>> {
        query_on(self, sql, params, timeout)
    }
}

impl SqlSession for Transaction<'_> {
    fn execute(&self, sql: &str, params: &Params, timeout: Option<Duration>) -> StoreResult<usize> {
        execute_on(self, sql, params, timeout)
    }

    fn query(
        &self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> StoreResult<Vec<Row>> {
        query_on(self, sql, params, timeout)
    }
}

impl SqlTransaction for Transaction<'_> {
    fn commit(self) -> StoreResult<()> {
        Transaction::commit(self)?;
        Ok(())
    }
}

impl SqlConnection for Connection {
    type Transaction<'c> = Transaction<'c>;

    fn begin_transaction(&self) -> StoreResult<Transaction<'_>> {
        Ok(self.unchecked_transaction()?)
    }
}
