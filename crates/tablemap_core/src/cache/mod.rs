//! Identity cache over an executor.
//!
//! # Responsibility
//! - Keep at most one caller-defined view per key, folding every record the
//!   executor returns into it through the `construct` / `update` pair.
//! - Mirror the executor's effects: reads and writes reconcile, deletes evict,
//!   updates refresh from the store.
//!
//! # Invariants
//! - An existing view is only ever passed to `update`, never replaced by a
//!   fresh `construct`.
//! - Bulk calls change the map only after the executor returned, which for
//!   implicit transactions means after the commit.
//! - The map is not synchronized; callers serialize access (`&mut self`).

mod transaction;

pub use transaction::{CacheTransaction, PendingChange};

use crate::error::{MapError, MapResult};
use crate::executor::{Executor, SharedConnection};
use crate::metadata::registry::MetadataRegistry;
use crate::metadata::CompiledMetadata;
use crate::model::key::{Filter, Key, RecordIdentity};
use crate::model::record::Record;
use crate::model::value::Scalar;
use crate::store::SqlConnection;
use log::debug;
use std::collections::HashMap;
use std::hash::Hash;
use uuid::Uuid;

/// How a cache derives map keys from records and store keys.
pub trait CacheKey<T: Record>: Clone + Eq + Hash + Send + Sync + 'static {
    /// Rejects record types this key shape cannot address.
    fn validate(metadata: &CompiledMetadata<T>) -> MapResult<()>;

    fn from_record(metadata: &CompiledMetadata<T>, record: &T) -> MapResult<Self>;

    fn from_key(metadata: &CompiledMetadata<T>, key: &Key) -> MapResult<Self>;

    fn to_key(&self, metadata: &CompiledMetadata<T>) -> Key;
}

/// Structural identity works for every record type, key-less ones included.
impl<T: Record> CacheKey<T> for RecordIdentity {
    fn validate(_: &CompiledMetadata<T>) -> MapResult<()> {
        Ok(())
    }

    fn from_record(metadata: &CompiledMetadata<T>, record: &T) -> MapResult<Self> {
        Ok(metadata.identity(record))
    }

    fn from_key(metadata: &CompiledMetadata<T>, key: &Key) -> MapResult<Self> {
        metadata.identity_of_key(key)
    }

    fn to_key(&self, metadata: &CompiledMetadata<T>) -> Key {
        metadata.key_of_identity(self)
    }
}

fn single_key_value<T: Record, S: Scalar>(
    metadata: &CompiledMetadata<T>,
    key: Key,
) -> MapResult<S> {
    let member = metadata
        .key_members()
        .next()
        .map_or("", |member| member.name());
    match key {
        Key::Single(value) => S::from_value(value).map_err(|source| MapError::Conversion {
            member: member.to_string(),
            source,
        }),
        Key::Composite(_) => Err(MapError::KeyShape {
            table: metadata.table().to_string(),
            message: "expected a single key value".to_string(),
        }),
    }
}

macro_rules! scalar_cache_key {
    ($($ty:ty),*) => {$(
        impl<T: Record> CacheKey<T> for $ty {
            fn validate(metadata: &CompiledMetadata<T>) -> MapResult<()> {
                Ok(metadata.require_single_key(<$ty as Scalar>::TYPE)?)
            }

            fn from_record(metadata: &CompiledMetadata<T>, record: &T) -> MapResult<Self> {
                single_key_value(metadata, metadata.get_key(record))
            }

            fn from_key(metadata: &CompiledMetadata<T>, key: &Key) -> MapResult<Self> {
                single_key_value(metadata, key.clone())
            }

            fn to_key(&self, _: &CompiledMetadata<T>) -> Key {
                Key::Single(self.clone().into_value())
            }
        }
    )*};
}

scalar_cache_key!(i64, i32, String, Uuid);

type Construct<T, V> = Box<dyn Fn(&T) -> V + Send + Sync>;
type Update<T, V> = Box<dyn Fn(&T, V) -> V + Send + Sync>;

/// Key to view map kept in step with an executor.
pub struct IdentityCache<T, V, K = RecordIdentity> {
    executor: Executor<T>,
    entries: HashMap<K, V>,
    construct: Construct<T, V>,
    update: Update<T, V>,
}

impl<T, V, K> IdentityCache<T, V, K>
where
    T: Record,
    V: Clone,
    K: CacheKey<T>,
{
    /// Fails with `ConfigError::KeyCount` or `ConfigError::KeyType` when `K`
    /// is a single-value key that does not match `T`'s one key member.
    pub fn new(
        executor: Executor<T>,
        construct: impl Fn(&T) -> V + Send + Sync + 'static,
        update: impl Fn(&T, V) -> V + Send + Sync + 'static,
    ) -> MapResult<Self> {
        K::validate(executor.metadata())?;
        Ok(Self {
            executor,
            entries: HashMap::new(),
            construct: Box::new(construct),
            update: Box::new(update),
        })
    }

    pub fn from_registry(
        registry: &MetadataRegistry,
        construct: impl Fn(&T) -> V + Send + Sync + 'static,
        update: impl Fn(&T, V) -> V + Send + Sync + 'static,
    ) -> MapResult<Self> {
        Self::new(Executor::new(registry)?, construct, update)
    }

    pub fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    pub fn view(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops one view without touching the store.
    pub fn evict(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Folds `record` into the map and returns its view.
    pub fn reconcile(&mut self, record: &T) -> MapResult<V> {
        let key = K::from_record(self.executor.metadata(), record)?;
        Ok(self.reconcile_keyed(key, record))
    }

    pub(crate) fn reconcile_keyed(&mut self, key: K, record: &T) -> V {
        let view = match self.entries.remove(&key) {
            Some(existing) => (self.update)(record, existing),
            None => (self.construct)(record),
        };
        self.entries.insert(key, view.clone());
        view
    }

    fn reconcile_all(&mut self, records: &[T]) -> MapResult<Vec<V>> {
        let keyed = records
            .iter()
            .map(|record| K::from_record(self.executor.metadata(), record))
            .collect::<MapResult<Vec<_>>>()?;
        Ok(keyed
            .into_iter()
            .zip(records)
            .map(|(key, record)| self.reconcile_keyed(key, record))
            .collect())
    }

    fn evict_key(&mut self, key: &Key) -> MapResult<()> {
        let key = K::from_key(self.executor.metadata(), key)?;
        self.entries.remove(&key);
        Ok(())
    }

    /// Fetches by key. A missing row also evicts any view held for the key.
    pub fn get<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        key: &Key,
    ) -> MapResult<Option<V>> {
        match self.executor.get(conn, tx, key)? {
            Some(record) => self.reconcile(&record).map(Some),
            None => {
                self.evict_key(key)?;
                Ok(None)
            }
        }
    }

    pub fn get_list<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        filter: Option<&Filter>,
    ) -> MapResult<Vec<V>> {
        let records = self.executor.get_list(conn, tx, filter)?;
        self.reconcile_all(&records)
    }

    pub fn insert<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<V> {
        let written = self.executor.insert(conn, tx, record)?;
        self.reconcile(&written)
    }

    pub fn insert_list<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<Vec<V>> {
        let written = self.executor.insert_list(conn, tx, records)?;
        self.reconcile_all(&written)
    }

    pub fn upsert<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<V> {
        let written = self.executor.upsert(conn, tx, record)?;
        self.reconcile(&written)
    }

    pub fn upsert_list<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<Vec<V>> {
        let written = self.executor.upsert_list(conn, tx, records)?;
        self.reconcile_all(&written)
    }

    /// Updates the row, then reloads it so the view matches the store. The
    /// reload also runs when no row changed, which evicts the view of a row
    /// that no longer exists.
    pub fn update<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<bool> {
        let changed = self.executor.update(conn, tx, record)?;
        self.refresh(conn, tx, record, changed)?;
        Ok(changed)
    }

    pub fn update_list<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<usize> {
        let changed = self.executor.update_list(conn, tx, records)?;
        for record in records {
            self.refresh(conn, tx, record, changed > 0)?;
        }
        Ok(changed)
    }

    fn refresh<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
        changed: bool,
    ) -> MapResult<()> {
        let refresh = refreshed(&self.executor, conn, tx, record, changed)?;
        self.apply_refresh(refresh)
    }

    pub(crate) fn apply_refresh(&mut self, refresh: Refresh<K, T>) -> MapResult<()> {
        match refresh {
            Refresh::Reconcile(key, fresh) => {
                self.reconcile_keyed(key, &fresh);
            }
            Refresh::Evict(key) => {
                self.entries.remove(&key);
            }
            Refresh::Rebuild(fresh) => {
                self.entries.clear();
                self.reconcile(&fresh)?;
            }
            Refresh::Clear => self.entries.clear(),
        }
        Ok(())
    }

    pub fn delete<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        key: &Key,
    ) -> MapResult<bool> {
        let deleted = self.executor.delete(conn, tx, key)?;
        self.evict_key(key)?;
        Ok(deleted)
    }

    pub fn delete_record<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        record: &T,
    ) -> MapResult<bool> {
        let key = K::from_record(self.executor.metadata(), record)?;
        let deleted = self.executor.delete_record(conn, tx, record)?;
        self.entries.remove(&key);
        Ok(deleted)
    }

    pub fn delete_list<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        records: &[T],
    ) -> MapResult<usize> {
        let keys = records
            .iter()
            .map(|record| K::from_record(self.executor.metadata(), record))
            .collect::<MapResult<Vec<_>>>()?;
        let deleted = self.executor.delete_list(conn, tx, records)?;
        for key in &keys {
            self.entries.remove(key);
        }
        Ok(deleted)
    }

    /// Deletes every matching row and evicts the reported keys.
    pub fn delete_where<'c, C: SqlConnection>(
        &mut self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        filter: Option<&Filter>,
    ) -> MapResult<Vec<Key>> {
        let deleted = self.executor.delete_where(conn, tx, filter)?;
        for key in &deleted {
            self.evict_key(key)?;
        }
        debug!(
            "event=cache_evict module=cache status=ok table={} evicted={} remaining={}",
            self.executor.metadata().table(),
            deleted.len(),
            self.entries.len()
        );
        Ok(deleted)
    }

    /// Starts a transaction whose cache changes wait for `commit()`.
    pub fn begin<'a, 'c, C: SqlConnection>(
        &'a mut self,
        conn: &'c C,
    ) -> MapResult<CacheTransaction<'a, 'c, T, V, K, C>> {
        CacheTransaction::new(self, conn)
    }

    pub async fn get_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        key: Key,
    ) -> MapResult<Option<V>>
    where
        C: SqlConnection + Send + 'static,
    {
        match self.executor.get_async(conn, key.clone()).await? {
            Some(record) => self.reconcile(&record).map(Some),
            None => {
                self.evict_key(&key)?;
                Ok(None)
            }
        }
    }

    pub async fn get_list_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        filter: Option<Filter>,
    ) -> MapResult<Vec<V>>
    where
        C: SqlConnection + Send + 'static,
    {
        let records = self.executor.get_list_async(conn, filter).await?;
        self.reconcile_all(&records)
    }

    pub async fn insert_async<C>(&mut self, conn: &SharedConnection<C>, record: T) -> MapResult<V>
    where
        C: SqlConnection + Send + 'static,
    {
        let written = self.executor.insert_async(conn, record).await?;
        self.reconcile(&written)
    }

    pub async fn insert_list_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<Vec<V>>
    where
        C: SqlConnection + Send + 'static,
    {
        let written = self.executor.insert_list_async(conn, records).await?;
        self.reconcile_all(&written)
    }

    pub async fn upsert_async<C>(&mut self, conn: &SharedConnection<C>, record: T) -> MapResult<V>
    where
        C: SqlConnection + Send + 'static,
    {
        let written = self.executor.upsert_async(conn, record).await?;
        self.reconcile(&written)
    }

    pub async fn upsert_list_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<Vec<V>>
    where
        C: SqlConnection + Send + 'static,
    {
        let written = self.executor.upsert_list_async(conn, records).await?;
        self.reconcile_all(&written)
    }

    pub async fn update_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        record: T,
    ) -> MapResult<bool>
    where
        C: SqlConnection + Send + 'static,
    {
        let changed = self.executor.update_async(conn, record.clone()).await?;
        self.refresh_async(conn, record, changed).await?;
        Ok(changed)
    }

    pub async fn update_list_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<usize>
    where
        C: SqlConnection + Send + 'static,
    {
        let changed = self.executor.update_list_async(conn, records.clone()).await?;
        for record in records {
            self.refresh_async(conn, record, changed > 0).await?;
        }
        Ok(changed)
    }

    async fn refresh_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        record: T,
        changed: bool,
    ) -> MapResult<()>
    where
        C: SqlConnection + Send + 'static,
    {
        let refresh = match keyless_refresh(self.executor.metadata(), &record, changed) {
            Some(refresh) => refresh,
            None => {
                let key = K::from_record(self.executor.metadata(), &record)?;
                match self.executor.get_by_record_async(conn, record).await? {
                    Some(fresh) => Refresh::Reconcile(key, fresh),
                    None => Refresh::Evict(key),
                }
            }
        };
        self.apply_refresh(refresh)
    }

    pub async fn delete_async<C>(&mut self, conn: &SharedConnection<C>, key: Key) -> MapResult<bool>
    where
        C: SqlConnection + Send + 'static,
    {
        let deleted = self.executor.delete_async(conn, key.clone()).await?;
        self.evict_key(&key)?;
        Ok(deleted)
    }

    pub async fn delete_record_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        record: T,
    ) -> MapResult<bool>
    where
        C: SqlConnection + Send + 'static,
    {
        let key = K::from_record(self.executor.metadata(), &record)?;
        let deleted = self.executor.delete_record_async(conn, record).await?;
        self.entries.remove(&key);
        Ok(deleted)
    }

    pub async fn delete_list_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<usize>
    where
        C: SqlConnection + Send + 'static,
    {
        let keys = records
            .iter()
            .map(|record| K::from_record(self.executor.metadata(), record))
            .collect::<MapResult<Vec<_>>>()?;
        let deleted = self.executor.delete_list_async(conn, records).await?;
        for key in &keys {
            self.entries.remove(key);
        }
        Ok(deleted)
    }

    pub async fn delete_where_async<C>(
        &mut self,
        conn: &SharedConnection<C>,
        filter: Option<Filter>,
    ) -> MapResult<Vec<Key>>
    where
        C: SqlConnection + Send + 'static,
    {
        let deleted = self.executor.delete_where_async(conn, filter).await?;
        for key in &deleted {
            self.evict_key(key)?;
        }
        Ok(deleted)
    }
}

/// What an update means for the cached view of a record.
pub(crate) enum Refresh<K, T> {
    /// The row still exists; fold the reloaded copy in.
    Reconcile(K, T),
    /// The row is gone.
    Evict(K),
    /// A key-less update rewrote every row.
    Rebuild(T),
    /// A key-less update changed nothing; no cached view can be trusted.
    Clear,
}

/// Key-less records cannot be reloaded by key.
fn keyless_refresh<T: Record, K>(
    metadata: &CompiledMetadata<T>,
    record: &T,
    changed: bool,
) -> Option<Refresh<K, T>> {
    if !metadata.is_keyless() {
        return None;
    }
    Some(if changed {
        Refresh::Rebuild(record.clone())
    } else {
        Refresh::Clear
    })
}

pub(crate) fn refreshed<'c, T, K, C>(
    executor: &Executor<T>,
    conn: &'c C,
    tx: Option<&C::Transaction<'c>>,
    record: &T,
    changed: bool,
) -> MapResult<Refresh<K, T>>
where
    T: Record,
    K: CacheKey<T>,
    C: SqlConnection,
{
    let metadata = executor.metadata();
    if let Some(refresh) = keyless_refresh(metadata, record, changed) {
        return Ok(refresh);
    }
    let key = K::from_record(metadata, record)?;
    Ok(match executor.get_by_record(conn, tx, record)? {
        Some(fresh) => Refresh::Reconcile(key, fresh),
        None => Refresh::Evict(key),
    })
}
