//! Explicit registry of compiled metadata.
//!
//! # Responsibility
//! - Own the dialect and defaults chosen at construction.
//! - Compile each record type lazily, exactly once, and hand out shared
//!   read-only handles afterwards.
//!
//! # Invariants
//! - One successful compilation per type is visible to every caller; racing
//!   first callers block on the same per-type cell instead of compiling twice.
//! - A failed compilation leaves the cell empty so the error is reported to
//!   every caller that asks, never cached as a half-built entry.

use super::dialect::SqlDialect;
use super::{compile, CompiledMetadata};
use crate::config::{KeylessMode, MapperConfig};
use crate::error::MapResult;
use crate::model::record::Record;
use log::{info, warn};
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

type Slot = Arc<OnceCell<Arc<dyn Any + Send + Sync>>>;

/// Per-process (or per-owner) table of compiled record metadata.
pub struct MetadataRegistry {
    dialect: Arc<dyn SqlDialect>,
    command_timeout: Option<Duration>,
    keyless_mode: KeylessMode,
    slots: Mutex<HashMap<TypeId, Slot>>,
    compilations: AtomicUsize,
}

impl MetadataRegistry {
    pub fn new(config: &MapperConfig) -> Self {
        Self {
            dialect: config.dialect.build(),
            command_timeout: config.command_timeout(),
            keyless_mode: config.keyless_mode,
            slots: Mutex::new(HashMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Registry with an explicit dialect and default settings.
    pub fn with_dialect(dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            ..Self::new(&MapperConfig::default())
        }
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    pub fn keyless_mode(&self) -> KeylessMode {
        self.keyless_mode
    }

    /// Returns the compiled metadata of `T`, compiling it on first use.
    pub fn metadata<T: Record>(&self) -> MapResult<Arc<CompiledMetadata<T>>> {
        let slot = self.slot(TypeId::of::<T>());
        let entry = slot.get_or_try_init(|| {
            let started_at = Instant::now();
            match compile::<T>(Arc::clone(&self.dialect)) {
                Ok(metadata) => {
                    self.compilations.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "event=metadata_compile module=registry status=ok type={} table={} members={} keys={} dialect={} duration_ms={}",
                        metadata.type_name(),
                        metadata.table(),
                        metadata.members().len(),
                        metadata.key_count(),
                        self.dialect.name(),
                        started_at.elapsed().as_millis()
                    );
                    Ok(Arc::new(metadata) as Arc<dyn Any + Send + Sync>)
                }
                Err(err) => {
                    warn!(
                        "event=metadata_compile module=registry status=error type={} error={}",
                        std::any::type_name::<T>(),
                        err
                    );
                    Err(err)
                }
            }
        })?;

        Ok(Arc::clone(entry)
            .downcast::<CompiledMetadata<T>>()
            .unwrap_or_else(|_| unreachable!("registry slot keyed by TypeId holds another type")))
    }

    /// Number of record types compiled so far.
    pub fn compiled_count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    fn slot(&self, type_id: TypeId) -> Slot {
        // A panic while holding this lock cannot leave the map half-updated.
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(type_id).or_default())
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new(&MapperConfig::default())
    }
}
