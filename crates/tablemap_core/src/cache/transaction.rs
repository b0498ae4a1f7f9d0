//! Cache changes that wait for a store commit.
//!
//! # Invariants
//! - Nothing reaches the cache map before the store transaction committed.
//! - Dropping a `CacheTransaction` rolls the store transaction back and
//!   discards every buffered change.

use super::{refreshed, CacheKey, IdentityCache, Refresh};
use crate::error::MapResult;
use crate::model::key::{Filter, Key};
use crate::model::record::Record;
use crate::store::{SqlConnection, SqlTransaction};
use log::debug;

/// A cache change buffered until commit.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange<K, T> {
    Reconcile(K, T),
    Evict(K),
    /// A key-less write invalidated every cached view.
    Clear,
}

/// Store transaction paired with the cache changes it implies.
pub struct CacheTransaction<'a, 'c, T, V, K, C>
where
    C: SqlConnection + 'c,
{
    cache: &'a mut IdentityCache<T, V, K>,
    conn: &'c C,
    tx: C::Transaction<'c>,
    pending: Vec<PendingChange<K, T>>,
}

impl<'a, 'c, T, V, K, C> CacheTransaction<'a, 'c, T, V, K, C>
where
    T: Record,
    V: Clone,
    K: CacheKey<T>,
    C: SqlConnection + 'c,
{
    pub(super) fn new(cache: &'a mut IdentityCache<T, V, K>, conn: &'c C) -> MapResult<Self> {
        let tx = conn.begin_transaction()?;
        Ok(Self {
            cache,
            conn,
            tx,
            pending: Vec::new(),
        })
    }

    /// Changes that `commit()` will apply, in order.
    pub fn pending(&self) -> &[PendingChange<K, T>] {
        &self.pending
    }

    fn key_of(&self, record: &T) -> MapResult<K> {
        K::from_record(self.cache.executor.metadata(), record)
    }

    fn stage(&mut self, record: T) -> MapResult<T> {
        let key = self.key_of(&record)?;
        self.pending.push(PendingChange::Reconcile(key, record.clone()));
        Ok(record)
    }

    fn stage_records(&mut self, records: Vec<T>) -> MapResult<Vec<T>> {
        records.into_iter().map(|record| self.stage(record)).collect()
    }

    pub fn get(&mut self, key: &Key) -> MapResult<Option<T>> {
        let found = self.cache.executor.get(self.conn, Some(&self.tx), key)?;
        match found {
            Some(record) => self.stage(record).map(Some),
            None => {
                let key = K::from_key(self.cache.executor.metadata(), key)?;
                self.pending.push(PendingChange::Evict(key));
                Ok(None)
            }
        }
    }

    pub fn get_list(&mut self, filter: Option<&Filter>) -> MapResult<Vec<T>> {
        let records = self
            .cache
            .executor
            .get_list(self.conn, Some(&self.tx), filter)?;
        self.stage_records(records)
    }

    pub fn insert(&mut self, record: &T) -> MapResult<T> {
        let written = self.cache.executor.insert(self.conn, Some(&self.tx), record)?;
        self.stage(written)
    }

    pub fn insert_list(&mut self, records: &[T]) -> MapResult<Vec<T>> {
        let written = self
            .cache
            .executor
            .insert_list(self.conn, Some(&self.tx), records)?;
        self.stage_records(written)
    }

    pub fn upsert(&mut self, record: &T) -> MapResult<T> {
        let written = self.cache.executor.upsert(self.conn, Some(&self.tx), record)?;
        self.stage(written)
    }

    pub fn upsert_list(&mut self, records: &[T]) -> MapResult<Vec<T>> {
        let written = self
            .cache
            .executor
            .upsert_list(self.conn, Some(&self.tx), records)?;
        self.stage_records(written)
    }

    /// Updates the row and stages a reload of it, whether or not it changed.
    pub fn update(&mut self, record: &T) -> MapResult<bool> {
        let changed = self.cache.executor.update(self.conn, Some(&self.tx), record)?;
        self.stage_refresh(record, changed)?;
        Ok(changed)
    }

    pub fn update_list(&mut self, records: &[T]) -> MapResult<usize> {
        let changed = self
            .cache
            .executor
            .update_list(self.conn, Some(&self.tx), records)?;
        for record in records {
            self.stage_refresh(record, changed > 0)?;
        }
        Ok(changed)
    }

    fn stage_refresh(&mut self, record: &T, changed: bool) -> MapResult<()> {
        let refresh = refreshed(&self.cache.executor, self.conn, Some(&self.tx), record, changed)?;
        match refresh {
            Refresh::Reconcile(key, fresh) => {
                self.pending.push(PendingChange::Reconcile(key, fresh));
            }
            Refresh::Evict(key) => self.pending.push(PendingChange::Evict(key)),
            Refresh::Rebuild(fresh) => {
                self.pending.push(PendingChange::Clear);
                self.stage(fresh)?;
            }
            Refresh::Clear => self.pending.push(PendingChange::Clear),
        }
        Ok(())
    }

    pub fn delete(&mut self, key: &Key) -> MapResult<bool> {
        let deleted = self.cache.executor.delete(self.conn, Some(&self.tx), key)?;
        let key = K::from_key(self.cache.executor.metadata(), key)?;
        self.pending.push(PendingChange::Evict(key));
        Ok(deleted)
    }

    pub fn delete_record(&mut self, record: &T) -> MapResult<bool> {
        let key = self.key_of(record)?;
        let deleted = self
            .cache
            .executor
            .delete_record(self.conn, Some(&self.tx), record)?;
        self.pending.push(PendingChange::Evict(key));
        Ok(deleted)
    }

    pub fn delete_list(&mut self, records: &[T]) -> MapResult<usize> {
        let keys = records
            .iter()
            .map(|record| self.key_of(record))
            .collect::<MapResult<Vec<_>>>()?;
        let deleted = self
            .cache
            .executor
            .delete_list(self.conn, Some(&self.tx), records)?;
        self.pending.extend(keys.into_iter().map(PendingChange::Evict));
        Ok(deleted)
    }

    pub fn delete_where(&mut self, filter: Option<&Filter>) -> MapResult<Vec<Key>> {
        let deleted = self
            .cache
            .executor
            .delete_where(self.conn, Some(&self.tx), filter)?;
        for key in &deleted {
            let key = K::from_key(self.cache.executor.metadata(), key)?;
            self.pending.push(PendingChange::Evict(key));
        }
        Ok(deleted)
    }

    /// Commits the store transaction, then applies the buffered changes.
    pub fn commit(self) -> MapResult<()> {
        let Self {
            cache, tx, pending, ..
        } = self;
        tx.commit()?;

        let applied = pending.len();
        for change in pending {
            match change {
                PendingChange::Reconcile(key, record) => {
                    cache.reconcile_keyed(key, &record);
                }
                PendingChange::Evict(key) => {
                    cache.entries.remove(&key);
                }
                PendingChange::Clear => cache.entries.clear(),
            }
        }
        debug!(
            "event=cache_commit module=cache status=ok table={} applied={}",
            cache.executor.metadata().table(),
            applied
        );
        Ok(())
    }
}
