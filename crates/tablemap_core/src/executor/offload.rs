//! Async forms of the executor operations.
//!
//! Each `_async` call moves the same blocking operation onto tokio's blocking
//! pool; nothing about statement execution changes. The connection is shared
//! behind a mutex, so calls on one connection still run in issue order.
//!
//! Async calls always use the connection directly. A borrowed transaction
//! cannot move to a worker thread, so transactional work stays synchronous.

use super::Executor;
use crate::error::{MapError, MapResult};
use crate::model::key::{Filter, Key};
use crate::model::record::Record;
use crate::store::SqlConnection;
use std::sync::{Arc, Mutex};

/// A connection the blocking pool can lock.
pub type SharedConnection<C> = Arc<Mutex<C>>;

pub fn share<C>(conn: C) -> SharedConnection<C> {
    Arc::new(Mutex::new(conn))
}

impl<T: Record> Executor<T> {
    async fn offload<C, R, F>(&self, conn: &SharedConnection<C>, work: F) -> MapResult<R>
    where
        C: SqlConnection + Send + 'static,
        R: Send + 'static,
        F: FnOnce(&Executor<T>, &C) -> MapResult<R> + Send + 'static,
    {
        let executor = self.clone();
        let conn = Arc::clone(conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| MapError::ConnectionPoisoned)?;
            work(&executor, &*conn)
        })
        .await
        .map_err(|err| MapError::Worker(err.to_string()))?
    }

    pub async fn get_async<C>(&self, conn: &SharedConnection<C>, key: Key) -> MapResult<Option<T>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| executor.get(conn, None, &key))
            .await
    }

    pub async fn get_by_record_async<C>(
        &self,
        conn: &SharedConnection<C>,
        record: T,
    ) -> MapResult<Option<T>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.get_by_record(conn, None, &record)
        })
        .await
    }

    pub async fn get_list_async<C>(
        &self,
        conn: &SharedConnection<C>,
        filter: Option<Filter>,
    ) -> MapResult<Vec<T>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.get_list(conn, None, filter.as_ref())
        })
        .await
    }

    pub async fn get_keys_async<C>(
        &self,
        conn: &SharedConnection<C>,
        filter: Option<Filter>,
    ) -> MapResult<Vec<Key>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.get_keys(conn, None, filter.as_ref())
        })
        .await
    }

    pub async fn record_count_async<C>(
        &self,
        conn: &SharedConnection<C>,
        filter: Option<Filter>,
    ) -> MapResult<u64>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.record_count(conn, None, filter.as_ref())
        })
        .await
    }

    pub async fn insert_async<C>(&self, conn: &SharedConnection<C>, record: T) -> MapResult<T>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| executor.insert(conn, None, &record))
            .await
    }

    pub async fn insert_list_async<C>(
        &self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<Vec<T>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.insert_list(conn, None, &records)
        })
        .await
    }

    pub async fn update_async<C>(&self, conn: &SharedConnection<C>, record: T) -> MapResult<bool>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| executor.update(conn, None, &record))
            .await
    }

    pub async fn update_list_async<C>(
        &self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<usize>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.update_list(conn, None, &records)
        })
        .await
    }

    pub async fn upsert_async<C>(&self, conn: &SharedConnection<C>, record: T) -> MapResult<T>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| executor.upsert(conn, None, &record))
            .await
    }

    pub async fn upsert_list_async<C>(
        &self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<Vec<T>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.upsert_list(conn, None, &records)
        })
        .await
    }

    pub async fn delete_async<C>(&self, conn: &SharedConnection<C>, key: Key) -> MapResult<bool>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| executor.delete(conn, None, &key))
            .await
    }

    pub async fn delete_record_async<C>(
        &self,
        conn: &SharedConnection<C>,
        record: T,
    ) -> MapResult<bool>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.delete_record(conn, None, &record)
        })
        .await
    }

    pub async fn delete_list_async<C>(
        &self,
        conn: &SharedConnection<C>,
        records: Vec<T>,
    ) -> MapResult<usize>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.delete_list(conn, None, &records)
        })
        .await
    }

    pub async fn delete_where_async<C>(
        &self,
        conn: &SharedConnection<C>,
        filter: Option<Filter>,
    ) -> MapResult<Vec<Key>>
    where
        C: SqlConnection + Send + 'static,
    {
        self.offload(conn, move |executor, conn| {
            executor.delete_where(conn, None, filter.as_ref())
        })
        .await
    }
}
