//! Record descriptions: per-member mapping metadata with typed accessors.
//!
//! # Responsibility
//! - Let a plain data type declare its table, columns, keys and exclusions.
//! - Supply read/write accessors so compiled metadata can bind parameters and
//!   materialize rows without any runtime reflection.
//!
//! # Invariants
//! - A description is only a declaration. Classification (what participates in
//!   which statement) happens once, in `metadata::compile`.

use crate::error::ConversionError;
use crate::model::value::{Scalar, ScalarType, Value};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A plain data type mapped to one table.
pub trait Record: Default + Clone + Send + Sync + 'static {
    fn describe() -> RecordDescriptor<Self>;
}

/// Whether a key member is supplied by the caller or generated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Required,
    Auto,
}

/// Declared type of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Scalar(ScalarType),
    /// Anything that is not a storage primitive. Never auto-mapped.
    Nested(&'static str),
}

/// Statement phases a member is kept out of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub select: bool,
    pub insert: bool,
    pub update: bool,
    pub all: bool,
}

/// Informational foreign-key marker; not validated at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

pub(crate) type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
pub(crate) type Setter<T> = Arc<dyn Fn(&mut T, Value) -> Result<(), ConversionError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct MemberAccess<T> {
    pub(crate) get: Getter<T>,
    pub(crate) set: Setter<T>,
}

/// One member of a record type with its resolved markers.
pub struct MemberDescriptor<T> {
    pub(crate) name: &'static str,
    pub(crate) ty: MemberType,
    pub(crate) column: Option<String>,
    pub(crate) key: Option<KeyKind>,
    pub(crate) exclusions: Exclusions,
    pub(crate) foreign_key: Option<ForeignKey>,
    pub(crate) access: Option<MemberAccess<T>>,
}

impl<T: 'static> MemberDescriptor<T> {
    /// Scalar member reached through a pair of field projections, e.g.
    /// `MemberDescriptor::field("id", |u: &User| &u.id, |u: &mut User| &mut u.id)`.
    pub fn field<S: Scalar>(
        name: &'static str,
        get: fn(&T) -> &S,
        get_mut: fn(&mut T) -> &mut S,
    ) -> Self {
        Self {
            name,
            ty: MemberType::Scalar(S::TYPE),
            column: None,
            key: None,
            exclusions: Exclusions::default(),
            foreign_key: None,
            access: Some(MemberAccess {
                get: Arc::new(move |record: &T| get(record).clone().into_value()),
                set: Arc::new(move |record: &mut T, value: Value| {
                    *get_mut(record) = S::from_value(value)?;
                    Ok(())
                }),
            }),
        }
    }

    /// Non-scalar member; listed for completeness and dropped at compile time.
    pub fn nested(name: &'static str, type_name: &'static str) -> Self {
        Self {
            name,
            ty: MemberType::Nested(type_name),
            column: None,
            key: None,
            exclusions: Exclusions::default(),
            foreign_key: None,
            access: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Caller-supplied primary key member.
    pub fn key(mut self) -> Self {
        self.key = Some(KeyKind::Required);
        self
    }

    /// Store-generated primary key member, written back after insert.
    pub fn auto_key(mut self) -> Self {
        self.key = Some(KeyKind::Auto);
        self
    }

    pub fn skip_select(mut self) -> Self {
        self.exclusions.select = true;
        self
    }

    pub fn skip_insert(mut self) -> Self {
        self.exclusions.insert = true;
        self
    }

    pub fn skip_update(mut self) -> Self {
        self.exclusions.update = true;
        self
    }

    /// Excludes the member from every statement.
    pub fn ignore(mut self) -> Self {
        self.exclusions.all = true;
        self
    }

    pub fn foreign_key(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Debug for MemberDescriptor<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("column", &self.column)
            .field("key", &self.key)
            .field("exclusions", &self.exclusions)
            .field("foreign_key", &self.foreign_key)
            .finish()
    }
}

/// Table-level description of a record type.
#[derive(Debug)]
pub struct RecordDescriptor<T> {
    pub(crate) type_name: &'static str,
    pub(crate) table: Option<String>,
    pub(crate) members: Vec<MemberDescriptor<T>>,
}

impl<T: 'static> RecordDescriptor<T> {
    /// Starts a description; the table name defaults to `type_name`.
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            table: None,
            members: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn member(mut self, member: MemberDescriptor<T>) -> Self {
        self.members.push(member);
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(self.type_name)
    }
}
