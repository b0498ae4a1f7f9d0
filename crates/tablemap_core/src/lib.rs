//! Metadata-driven table mapping over a relational store.
//! Record types are compiled once into statement templates, executed through
//! a store session, and optionally folded into an identity cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod store;

pub use cache::{CacheKey, CacheTransaction, IdentityCache, PendingChange};
pub use config::{DialectKind, KeylessMode, MapperConfig};
pub use error::{ConfigError, ConversionError, MapError, MapResult};
pub use executor::{share, Executor, KeyedExecutor, SharedConnection};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use metadata::dialect::{SqlDialect, SqlServerDialect, SqliteDialect};
pub use metadata::registry::MetadataRegistry;
pub use metadata::{CompiledMetadata, StatementSet};
pub use model::key::{Filter, Key, Params, RecordIdentity};
pub use model::record::{KeyKind, MemberDescriptor, Record, RecordDescriptor};
pub use model::value::{Scalar, ScalarType, Value};
pub use store::{
    open_db, open_db_in_memory, Row, SqlConnection, SqlSession, SqlTransaction, StoreError,
    StoreResult,
};

/// Returns the crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
