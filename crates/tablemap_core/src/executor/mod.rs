//! Query executor: binds compiled statements to a connection or transaction.
//!
//! # Responsibility
//! - Run the CRUD, bulk and count operations of one record type.
//! - Return copies of written records carrying server-generated values.
//! - Own implicit transactions for bulk calls made without a caller
//!   transaction.
//!
//! # Invariants
//! - Store failures are returned unmodified; nothing is retried.
//! - A caller-supplied transaction is never committed or rolled back here.
//! - An implicit transaction is committed only after every item succeeded;
//!   on any error it is dropped, which rolls it back.
//! - Single-row operations on key-less types need `KeylessMode::WholeTable`.

mod keyed;
mod offload;

pub use keyed::KeyedExecutor;
pub use offload::{share, SharedConnection};

use crate::config::KeylessMode;
use crate::error::{MapError, MapResult};
use crate::metadata::dialect::UpsertTemplate;
use crate::metadata::registry::MetadataRegistry;
use crate::metadata::CompiledMetadata;
use crate::model::key::{Filter, Key, Params};
use crate::model::record::Record;
use crate::model::value::Value;
use crate::store::{Row, SqlConnection, SqlSession, SqlTransaction};
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Picks the caller's transaction when one is given.
fn session<'s, 'c, C>(conn: &'s C, tx: Option<&'s C::Transaction<'c>>) -> &'s dyn SqlSession
where
    C: SqlConnection + 'c,
{
    match tx {
        Some(tx) => tx,
        None => conn,
    }
}

/// Executes statements for record type `T`.
pub struct Executor<T> {
    metadata: Arc<CompiledMetadata<T>>,
    timeout: Option<Duration>,
    keyless_mode: KeylessMode,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            metadata: Arc::clone(&self.metadata),
            timeout: self.timeout,
            keyless_mode: self.keyless_mode,
        }
    }
}

impl<T: Record> Executor<T> {
    /// Builds an executor, compiling `T` in `registry` if needed.
    pub fn new(registry: &MetadataRegistry) -> MapResult<Self> {
        Ok(Self {
            metadata: registry.metadata::<T>()?,
            timeout: registry.command_timeout(),
            keyless_mode: registry.keyless_mode(),
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_keyless_mode(mut self, mode: KeylessMode) -> Self {
        self.keyless_mode = mode;
        self
    }

    pub fn metadata(&self) -> &Arc<CompiledMetadata<T>> {
        &self.metadata
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn keyless_mode(&self) -> KeylessMode {
        self.keyless_mode
    }

    pub fn get<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        key: &Key,
    ) -> MapResult<Option<T>> {
        self.get_in(session(conn, tx), key)
    }

    /// Looks a record up by the key values carried in `record`.
    pub fn get_by_record<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<Option<T>> {
        self.get_in(session(conn, tx), &self.metadata.get_key(record))
    }

    pub fn get_list<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        filter: Option<&Filter>,
    ) -> MapResult<Vec<T>> {
        let (sql, params) = filtered(&self.metadata.statements().select_list, filter);
        let rows = self.query(session(conn, tx), "get_list", &sql, &params)?;
        rows.iter().map(|row| self.metadata.materialize(row)).collect()
    }

    /// Keys of the matching rows (every column for key-less types).
    pub fn get_keys<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        filter: Option<&Filter>,
    ) -> MapResult<Vec<Key>> {
        let (sql, params) = filtered(&self.metadata.statements().select_keys, filter);
        let rows = self.query(session(conn, tx), "get_keys", &sql, &params)?;
        rows.iter().map(|row| self.metadata.key_from_row(row)).collect()
    }

    pub fn record_count<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        filter: Option<&Filter>,
    ) -> MapResult<u64> {
        let (sql, params) = filtered(&self.metadata.statements().count, filter);
        let started_at = Instant::now();
        let count = session(conn, tx)
            .execute_scalar(&sql, &params, self.timeout)
            .map_err(|err| self.store_failed("record_count", err))?;
        self.log_ok("record_count", 1, started_at);
        Ok(match count {
            Some(Value::Integer(count)) => u64::try_from(count).unwrap_or_default(),
            _ => 0,
        })
    }

    /// Inserts `record` and returns a copy carrying the values the store
    /// generated (auto keys in particular).
    pub fn insert<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<T> {
        self.insert_in(session(conn, tx), record)
    }

    pub fn insert_list<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<Vec<T>> {
        self.in_transaction(conn, tx, |session| {
            records
                .iter()
                .map(|record| self.insert_in(session, record))
                .collect()
        })
    }

    /// Returns true when at least one row changed.
    pub fn update<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<bool> {
        self.update_in(session(conn, tx), record)
    }

    /// Returns how many of `records` changed a row.
    pub fn update_list<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<usize> {
        self.in_transaction(conn, tx, |session| {
            let mut changed = 0;
            for record in records {
                changed += usize::from(self.update_in(session, record)?);
            }
            Ok(changed)
        })
    }

    /// Inserts `record` or updates the row with the same key, returning a
    /// copy carrying generated values.
    pub fn upsert<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<T> {
        self.upsert_in(session(conn, tx), record)
    }

    pub fn upsert_list<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<Vec<T>> {
        self.in_transaction(conn, tx, |session| {
            records
                .iter()
                .map(|record| self.upsert_in(session, record))
                .collect()
        })
    }

    /// Returns true when a row was deleted.
    pub fn delete<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        key: &Key,
    ) -> MapResult<bool> {
        self.guard_single_row("delete")?;
        let params = self.metadata.key_params(key)?;
        self.delete_in(session(conn, tx), &params)
    }

    pub fn delete_record<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<bool> {
        self.guard_single_row("delete")?;
        self.delete_in(session(conn, tx), &self.metadata.record_params(record))
    }

    /// Returns how many of `records` removed a row.
    pub fn delete_list<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<usize> {
        self.guard_single_row("delete_list")?;
        self.in_transaction(conn, tx, |session| {
            let mut deleted = 0;
            for record in records {
                let params = self.metadata.record_params(record);
                deleted += usize::from(self.delete_in(session, &params)?);
            }
            Ok(deleted)
        })
    }

    /// Deletes every matching row and reports the keys that were removed.
    pub fn delete_where<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        filter: Option<&Filter>,
    ) -> MapResult<Vec<Key>> {
        let statement = &self.metadata.statements().delete_bulk;
        let sql = statement.render(filter.map(Filter::clause));
        let params = filter.map(|filter| filter.params().clone()).unwrap_or_default();
        let rows = self.query(session(conn, tx), "delete_where", &sql, &params)?;
        rows.iter().map(|row| self.metadata.key_from_row(row)).collect()
    }

    fn get_in(&self, session: &dyn SqlSession, key: &Key) -> MapResult<Option<T>> {
        self.guard_single_row("get")?;
        let params = self.metadata.key_params(key)?;
        let rows = self.query(session, "get", &self.metadata.statements().select_single, &params)?;
        rows.first()
            .map(|row| self.metadata.materialize(row))
            .transpose()
    }

    fn insert_in(&self, session: &dyn SqlSession, record: &T) -> MapResult<T> {
        let params = self.metadata.record_params(record);
        let rows = self.query(session, "insert", &self.metadata.statements().insert, &params)?;
        self.written_back(record, rows.first())
    }

    fn update_in(&self, session: &dyn SqlSession, record: &T) -> MapResult<bool> {
        self.guard_single_row("update")?;
        let Some(sql) = &self.metadata.statements().update else {
            debug!(
                "event=statement module=executor status=skipped op=update table={} reason=no_updatable_members",
                self.metadata.table()
            );
            return Ok(false);
        };
        let params = self.metadata.record_params(record);
        Ok(self.execute(session, "update", sql, &params)? > 0)
    }

    fn upsert_in(&self, session: &dyn SqlSession, record: &T) -> MapResult<T> {
        self.guard_single_row("upsert")?;
        let mut params = self.metadata.record_params(record);
        // Unassigned auto keys must not match an existing row.
        for member in self.metadata.auto_key_members() {
            if member.read(record).is_unassigned() {
                params.set(member.name(), Value::Null);
            }
        }

        match &self.metadata.statements().upsert {
            UpsertTemplate::Native(sql) => {
                let rows = self.query(session, "upsert", sql, &params)?;
                self.written_back(record, rows.first())
            }
            UpsertTemplate::ProbeThenWrite { probe } => {
                let started_at = Instant::now();
                let exists = session
                    .execute_scalar(probe, &params, self.timeout)
                    .map_err(|err| self.store_failed("upsert_probe", err))?;
                self.log_ok("upsert_probe", 1, started_at);

                if matches!(exists, Some(Value::Integer(found)) if found != 0) {
                    if let Some(sql) = &self.metadata.statements().update {
                        self.execute(session, "upsert", sql, &params)?;
                    }
                    return Ok(record.clone());
                }
                let insert = &self.metadata.statements().insert;
                let rows = self.query(session, "upsert", insert, &params)?;
                self.written_back(record, rows.first())
            }
        }
    }

    fn delete_in(&self, session: &dyn SqlSession, params: &Params) -> MapResult<bool> {
        Ok(self.execute(session, "delete", &self.metadata.statements().delete_single, params)? > 0)
    }

    fn written_back(&self, record: &T, row: Option<&Row>) -> MapResult<T> {
        let mut written = record.clone();
        if let Some(row) = row {
            self.metadata.apply_row(&mut written, row)?;
        }
        Ok(written)
    }

    /// Runs `work` in the caller's transaction, or in an implicit one that is
    /// committed when `work` succeeds.
    fn in_transaction<'c, C, R>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        work: impl FnOnce(&dyn SqlSession) -> MapResult<R>,
    ) -> MapResult<R>
    where
        C: SqlConnection,
    {
        if let Some(tx) = tx {
            return work(tx);
        }

        let implicit = conn.begin_transaction()?;
        let result = work(&implicit)?;
        implicit.commit()?;
        debug!(
            "event=implicit_tx module=executor status=committed table={}",
            self.metadata.table()
        );
        Ok(result)
    }

    fn guard_single_row(&self, operation: &'static str) -> MapResult<()> {
        if !self.metadata.is_keyless() {
            return Ok(());
        }
        match self.keyless_mode {
            KeylessMode::ByKey => Err(MapError::KeylessSingleRow {
                table: self.metadata.table().to_string(),
                operation,
            }),
            KeylessMode::WholeTable => {
                warn!(
                    "event=whole_table module=executor status=ok op={} table={}",
                    operation,
                    self.metadata.table()
                );
                Ok(())
            }
        }
    }

    fn query(
        &self,
        session: &dyn SqlSession,
        op: &'static str,
        sql: &str,
        params: &Params,
    ) -> MapResult<Vec<Row>> {
        let started_at = Instant::now();
        let rows = session
            .query(sql, params, self.timeout)
            .map_err(|err| self.store_failed(op, err))?;
        self.log_ok(op, rows.len(), started_at);
        Ok(rows)
    }

    fn execute(
        &self,
        session: &dyn SqlSession,
        op: &'static str,
        sql: &str,
        params: &Params,
    ) -> MapResult<usize> {
        let started_at = Instant::now();
        let changed = session
            .execute(sql, params, self.timeout)
            .map_err(|err| self.store_failed(op, err))?;
        self.log_ok(op, changed, started_at);
        Ok(changed)
    }

    fn log_ok(&self, op: &str, rows: usize, started_at: Instant) {
        debug!(
            "event=statement module=executor status=ok op={} table={} rows={} duration_ms={}",
            op,
            self.metadata.table(),
            rows,
            started_at.elapsed().as_millis()
        );
    }

    fn store_failed(&self, op: &str, err: crate::store::StoreError) -> MapError {
        warn!(
            "event=statement module=executor status=error op={} table={} error={}",
            op,
            self.metadata.table(),
            err
        );
        MapError::Store(err)
    }
}

/// Appends the caller filter to `base` and collects its parameters.
fn filtered(base: &str, filter: Option<&Filter>) -> (String, Params) {
    match filter {
        Some(filter) => (
            format!("{base} WHERE {}", filter.clause()),
            filter.params().clone(),
        ),
        None => (base.to_string(), Params::new()),
    }
}
