//! Typed front end for record types keyed by one scalar member.
//!
//! # Responsibility
//! - Accept and return keys as the member's own type instead of `Key`.
//!
//! # Invariants
//! - Construction fails with `ConfigError::KeyCount` unless the record type
//!   has exactly one key member, and with `ConfigError::KeyType` unless that
//!   member's column type is `K::TYPE`. No statement runs before both hold.

use super::Executor;
use crate::error::{MapError, MapResult};
use crate::metadata::registry::MetadataRegistry;
use crate::model::key::Key;
use crate::model::record::Record;
use crate::model::value::Scalar;
use crate::store::SqlConnection;
use std::marker::PhantomData;
use std::ops::Deref;

/// Executor for record types with exactly one key member of type `K`.
pub struct KeyedExecutor<T, K> {
    inner: Executor<T>,
    _key: PhantomData<fn() -> K>,
}

impl<T, K> Clone for KeyedExecutor<T, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _key: PhantomData,
        }
    }
}

impl<T: Record, K: Scalar> KeyedExecutor<T, K> {
    pub fn new(registry: &MetadataRegistry) -> MapResult<Self> {
        Self::from_executor(Executor::new(registry)?)
    }

    pub fn from_executor(inner: Executor<T>) -> MapResult<Self> {
        inner.metadata().require_single_key(K::TYPE)?;
        Ok(Self {
            inner,
            _key: PhantomData,
        })
    }

    pub fn into_inner(self) -> Executor<T> {
        self.inner
    }

    pub fn get<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        key: K,
    ) -> MapResult<Option<T>> {
        self.inner.get(conn, tx, &Key::Single(key.into_value()))
    }

    pub fn delete<'c, C: SqlConnection>(
        &self,
        conn: &'c C,
        tx: Option<&C::Transaction<'c>>,
        key: K,
    ) -> MapResult<bool> {
        self.inner.delete(conn, tx, &Key::Single(key.into_value()))
    }

    pub fn get_key(&self, record: &T) -> MapResult<K> {
        let member = self.key_member_name();
        match self.inner.metadata().get_key(record) {
            Key::Single(value) => K::from_value(value).map_err(|source| MapError::Conversion {
                member: member.to_string(),
                source,
            }),
            Key::Composite(_) => Err(MapError::KeyShape {
                table: self.inner.metadata().table().to_string(),
                message: "expected a single key member".to_string(),
            }),
        }
    }

    pub fn set_key(&self, record: &mut T, key: K) -> MapResult<()> {
        self.inner
            .metadata()
            .set_key(record, &Key::Single(key.into_value()))
    }

    fn key_member_name(&self) -> &'static str {
        self.inner
            .metadata()
            .key_members()
            .next()
            .map_or("", |member| member.name())
    }
}

impl<T, K> Deref for KeyedExecutor<T, K> {
    type Target = Executor<T>;

    fn deref(&self) -> &Executor<T> {
        &self.inner
    }
}
