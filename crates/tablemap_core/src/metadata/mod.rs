//! Metadata compiler: classifies record members once and synthesizes the
//! statement texts reused by every executor call.
//!
//! # Responsibility
//! - Drop ignored and non-scalar members, partition the rest into key, select,
//!   insert, update and compare sets.
//! - Build the canonical statement set through the registry's dialect.
//! - Provide key extraction/injection and structural equality over the
//!   compiled member lists.
//!
//! # Invariants
//! - A `CompiledMetadata<T>` is immutable once built; nothing rebuilds its
//!   statement texts.
//! - Compare members are the key members when any exist, else every member.
//! - Key members never appear in an update `SET` list; auto keys never appear
//!   in an insert value list.

pub mod dialect;
pub mod registry;

use crate::error::{ConfigError, MapError, MapResult};
use crate::model::key::{Key, Params, RecordIdentity};
use crate::model::record::{ForeignKey, KeyKind, MemberAccess, MemberType, Record};
use crate::model::value::{ScalarType, Value};
use crate::store::Row;
use dialect::{SplitStatement, SqlDialect, UpsertParts, UpsertTemplate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

static MEMBER_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("member identifier pattern"));
static TABLE_IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("table identifier pattern")
});

/// One participating member after classification.
pub struct MappedMember<T> {
    name: &'static str,
    column: String,
    scalar_type: ScalarType,
    key: Option<KeyKind>,
    foreign_key: Option<ForeignKey>,
    access: MemberAccess<T>,
}

impl<T> MappedMember<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn key_kind(&self) -> Option<KeyKind> {
        self.key
    }

    pub fn is_auto_key(&self) -> bool {
        self.key == Some(KeyKind::Auto)
    }

    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        self.foreign_key.as_ref()
    }

    pub fn read(&self, record: &T) -> Value {
        (self.access.get)(record)
    }

    pub fn write(&self, record: &mut T, value: Value) -> MapResult<()> {
        (self.access.set)(record, value).map_err(|source| MapError::Conversion {
            member: self.name.to_string(),
            source,
        })
    }
}

impl<T> Debug for MappedMember<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedMember")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("scalar_type", &self.scalar_type)
            .field("key", &self.key)
            .finish()
    }
}

/// Statement texts built once per record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSet {
    pub select_list: String,
    /// Key columns only (every column for key-less types).
    pub select_keys: String,
    pub select_single: String,
    pub insert: String,
    /// `None` when no member is updatable.
    pub update: Option<String>,
    pub delete_single: String,
    pub delete_bulk: SplitStatement,
    pub count: String,
    pub upsert: UpsertTemplate,
}

/// Classified members and statement texts of one record type.
pub struct CompiledMetadata<T> {
    type_name: &'static str,
    table: String,
    members: Vec<MappedMember<T>>,
    keys: Vec<usize>,
    select: Vec<usize>,
    insert: Vec<usize>,
    update: Vec<usize>,
    compare: Vec<usize>,
    statements: StatementSet,
    dialect: Arc<dyn SqlDialect>,
}

impl<T> Debug for CompiledMetadata<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledMetadata")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("members", &self.members)
            .field("statements", &self.statements)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

/// Compiles the description of `T` against `dialect`.
pub fn compile<T: Record>(
    dialect: Arc<dyn SqlDialect>,
) -> Result<CompiledMetadata<T>, ConfigError> {
    let descriptor = T::describe();
    let table = descriptor.table_name().to_string();
    if !TABLE_IDENT.is_match(&table) {
        return Err(ConfigError::InvalidIdentifier {
            kind: "table",
            value: table,
        });
    }

    let mut members = Vec::new();
    let mut phases = Vec::new();
    for member in descriptor.members {
        if member.exclusions.all {
            continue;
        }
        let (MemberType::Scalar(scalar_type), Some(access)) = (member.ty, member.access) else {
            continue;
        };
        if !MEMBER_IDENT.is_match(member.name) {
            return Err(ConfigError::InvalidIdentifier {
                kind: "member",
                value: member.name.to_string(),
            });
        }
        let column = member.column.unwrap_or_else(|| member.name.to_string());
        if !MEMBER_IDENT.is_match(&column) {
            return Err(ConfigError::InvalidIdentifier {
                kind: "column",
                value: column,
            });
        }

        phases.push(member.exclusions);
        members.push(MappedMember {
            name: member.name,
            column,
            scalar_type,
            key: member.key,
            foreign_key: member.foreign_key,
            access,
        });
    }

    let indexes = |keep: &dyn Fn(usize) -> bool| -> Vec<usize> {
        (0..members.len()).filter(|index| keep(*index)).collect()
    };
    let keys = indexes(&|i| members[i].key.is_some());
    let select = indexes(&|i| !phases[i].select);
    let insert = indexes(&|i| !members[i].is_auto_key() && !phases[i].insert);
    let update = indexes(&|i| members[i].key.is_none() && !phases[i].update);
    let compare = if keys.is_empty() {
        indexes(&|_| true)
    } else {
        keys.clone()
    };

    if members.is_empty() || select.is_empty() {
        return Err(ConfigError::NoColumns { table });
    }

    let statements = synthesize(
        dialect.as_ref(),
        &table,
        &members,
        &keys,
        &select,
        &insert,
        &update,
        &compare,
    );

    Ok(CompiledMetadata {
        type_name: descriptor.type_name,
        table,
        members,
        keys,
        select,
        insert,
        update,
        compare,
        statements,
        dialect,
    })
}

#[allow(clippy::too_many_arguments)]
fn synthesize<T>(
    dialect: &dyn SqlDialect,
    table: &str,
    members: &[MappedMember<T>],
    keys: &[usize],
    select: &[usize],
    insert: &[usize],
    update: &[usize],
    compare: &[usize],
) -> StatementSet {
    let table = dialect.quote_ident(table);
    let columns = |set: &[usize]| -> Vec<String> {
        set.iter()
            .map(|index| dialect.quote_ident(&members[*index].column))
            .collect()
    };
    let placeholders = |set: &[usize]| -> Vec<String> {
        set.iter()
            .map(|index| format!("@{}", members[*index].name))
            .collect()
    };
    let assignments = |set: &[usize]| -> String {
        set.iter()
            .map(|index| {
                format!(
                    "{} = @{}",
                    dialect.quote_ident(&members[*index].column),
                    members[*index].name
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let key_clause = if keys.is_empty() {
        String::new()
    } else {
        format!(
            " WHERE {}",
            keys.iter()
                .map(|index| {
                    format!(
                        "{} = @{}",
                        dialect.quote_ident(&members[*index].column),
                        members[*index].name
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ")
        )
    };

    let select_list = format!("SELECT {} FROM {table}", columns(select).join(", "));
    let returning = columns(compare);
    let insert_sql = dialect.insert(&table, &columns(insert), &placeholders(insert), &returning);
    let set_clause = (!update.is_empty()).then(|| assignments(update));

    let merge: Vec<usize> = (0..members.len())
        .filter(|index| members[*index].is_auto_key() || insert.contains(index))
        .collect();
    let key_columns = columns(keys);
    let merge_columns = columns(&merge);
    let merge_values = placeholders(&merge);
    let upsert = dialect.upsert(&UpsertParts {
        table: &table,
        key_columns: &key_columns,
        key_clause: &key_clause,
        insert: &insert_sql,
        merge_columns: &merge_columns,
        merge_values: &merge_values,
        set_clause: set_clause.as_deref(),
        returning: &returning,
    });

    StatementSet {
        select_single: format!("{select_list}{key_clause}"),
        select_keys: format!("SELECT {} FROM {table}", returning.join(", ")),
        select_list,
        insert: insert_sql,
        update: set_clause.map(|set| format!("UPDATE {table} SET {set}{key_clause}")),
        delete_single: format!("DELETE FROM {table}{key_clause}"),
        delete_bulk: dialect.delete_returning(&table, &returning),
        count: format!("SELECT COUNT(*) FROM {table}"),
        upsert,
    }
}

impl<T: Record> CompiledMetadata<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    pub fn statements(&self) -> &StatementSet {
        &self.statements
    }

    pub fn members(&self) -> &[MappedMember<T>] {
        &self.members
    }

    /// Column names, 1:1 with `members()`.
    pub fn column_names(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.column.as_str()).collect()
    }

    pub fn key_members(&self) -> impl Iterator<Item = &MappedMember<T>> {
        self.pick(&self.keys)
    }

    pub fn auto_key_members(&self) -> impl Iterator<Item = &MappedMember<T>> {
        self.key_members().filter(|member| member.is_auto_key())
    }

    pub fn select_members(&self) -> impl Iterator<Item = &MappedMember<T>> {
        self.pick(&self.select)
    }

    pub fn insert_members(&self) -> impl Iterator<Item = &MappedMember<T>> {
        self.pick(&self.insert)
    }

    pub fn update_members(&self) -> impl Iterator<Item = &MappedMember<T>> {
        self.pick(&self.update)
    }

    pub fn compare_members(&self) -> impl Iterator<Item = &MappedMember<T>> {
        self.pick(&self.compare)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_keyless(&self) -> bool {
        self.keys.is_empty()
    }

    /// Checks that the type has exactly one key member and that its column
    /// type is `key_type`.
    pub fn require_single_key(&self, key_type: ScalarType) -> Result<(), ConfigError> {
        let [index] = self.keys.as_slice() else {
            return Err(ConfigError::KeyCount {
                table: self.table.clone(),
                expected: 1,
                found: self.keys.len(),
            });
        };
        let member = &self.members[*index];
        if member.scalar_type() != key_type {
            return Err(ConfigError::KeyType {
                table: self.table.clone(),
                member: member.name().to_string(),
                expected: key_type,
                found: member.scalar_type(),
            });
        }
        Ok(())
    }

    fn pick<'a>(&'a self, set: &'a [usize]) -> impl Iterator<Item = &'a MappedMember<T>> + 'a {
        set.iter().map(move |index| &self.members[*index])
    }

    /// Key of `record`: a single value for one key member, column/value pairs
    /// otherwise (every member for key-less types).
    pub fn get_key(&self, record: &T) -> Key {
        if self.keys.len() == 1 {
            return Key::Single(self.members[self.keys[0]].read(record));
        }
        Key::Composite(
            self.compare_members()
                .map(|member| (member.column.clone(), member.read(record)))
                .collect(),
        )
    }

    /// Writes `key` into the compare members of `record`.
    pub fn set_key(&self, record: &mut T, key: &Key) -> MapResult<()> {
        for (index, value) in self.compare.iter().zip(self.key_values(key)?) {
            self.members[*index].write(record, value)?;
        }
        Ok(())
    }

    /// Key values ordered like the compare members.
    fn key_values(&self, key: &Key) -> MapResult<Vec<Value>> {
        match key {
            Key::Single(value) if self.compare.len() == 1 => Ok(vec![value.clone()]),
            Key::Single(_) => Err(self.key_shape(format!(
                "single value given for {} key member(s)",
                self.compare.len()
            ))),
            Key::Composite(pairs) => self
                .compare_members()
                .map(|member| {
                    pairs
                        .iter()
                        .find(|(column, _)| column.eq_ignore_ascii_case(&member.column))
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| {
                            self.key_shape(format!("missing column `{}`", member.column))
                        })
                })
                .collect(),
        }
    }

    fn key_shape(&self, message: String) -> MapError {
        MapError::KeyShape {
            table: self.table.clone(),
            message,
        }
    }

    /// Parameters for the key-equality clause.
    pub fn key_params(&self, key: &Key) -> MapResult<Params> {
        let mut params = Params::new();
        for (index, value) in self.compare.iter().zip(self.key_values(key)?) {
            params.set(self.members[*index].name, value);
        }
        Ok(params)
    }

    /// Every member value, named after its member.
    pub fn record_params(&self, record: &T) -> Params {
        let mut params = Params::new();
        for member in &self.members {
            params.set(member.name, member.read(record));
        }
        params
    }

    pub fn identity(&self, record: &T) -> RecordIdentity {
        RecordIdentity(self.compare_members().map(|member| member.read(record)).collect())
    }

    pub fn identity_of_key(&self, key: &Key) -> MapResult<RecordIdentity> {
        self.key_values(key).map(RecordIdentity)
    }

    pub fn key_of_identity(&self, identity: &RecordIdentity) -> Key {
        if self.keys.len() == 1 {
            if let Some(value) = identity.0.first() {
                return Key::Single(value.clone());
            }
        }
        Key::Composite(
            self.compare_members()
                .zip(identity.0.iter())
                .map(|(member, value)| (member.column.clone(), value.clone()))
                .collect(),
        )
    }

    pub fn structural_eq(&self, left: &T, right: &T) -> bool {
        self.compare_members()
            .all(|member| member.read(left) == member.read(right))
    }

    pub fn structural_hash<H: Hasher>(&self, record: &T, state: &mut H) {
        for member in self.compare_members() {
            member.read(record).hash(state);
        }
    }

    /// Drops structurally equal duplicates, keeping the first occurrence.
    pub fn dedup(&self, records: Vec<T>) -> Vec<T> {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|record| seen.insert(self.identity(record)))
            .collect()
    }

    /// Builds a record from a row; columns absent from the row keep defaults.
    pub fn materialize(&self, row: &Row) -> MapResult<T> {
        let mut record = T::default();
        self.apply_row(&mut record, row)?;
        Ok(record)
    }

    /// Copies every mapped column present in `row` onto `record`.
    pub fn apply_row(&self, record: &mut T, row: &Row) -> MapResult<()> {
        for member in &self.members {
            if let Some(value) = row.get(&member.column) {
                member.write(record, value.clone())?;
            }
        }
        Ok(())
    }

    /// Reads the compare columns of a row, converted through the member
    /// types so the key equals one taken from a materialized record.
    pub fn key_from_row(&self, row: &Row) -> MapResult<Key> {
        let mut record = T::default();
        for member in self.compare_members() {
            let value = row
                .get(&member.column)
                .cloned()
                .ok_or_else(|| self.key_shape(format!("row lacks column `{}`", member.column)))?;
            member.write(&mut record, value)?;
        }
        Ok(self.get_key(&record))
    }
}
