//! Key, identity, parameter and filter shapes.
//!
//! # Responsibility
//! - Give primary keys a statically known shape (single scalar or ordered
//!   column/value pairs).
//! - Carry structural identity for record types compared member by member.
//!
//! # Invariants
//! - `Key::Composite` pairs are ordered like the compiled key members.
//! - `RecordIdentity` values are ordered like the compiled compare members.

use crate::model::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Primary-key value of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Single(Value),
    /// `(column, value)` pairs.
    Composite(Vec<(String, Value)>),
}

impl Key {
    pub fn single(value: impl Into<Value>) -> Self {
        Self::Single(value.into())
    }

    pub fn composite<I, C, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<Value>,
    {
        Self::Composite(
            pairs
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        )
    }

    /// Values in key order.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Self::Single(value) => vec![value],
            Self::Composite(pairs) => pairs.iter().map(|(_, value)| value).collect(),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(value) => write!(f, "{value}"),
            Self::Composite(pairs) => {
                write!(f, "(")?;
                for (index, (column, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{column}={value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Structural identity of a record: its compare-member values in order.
///
/// For keyed types this is the key; for key-less types it is every member,
/// which gives key-less records value semantics as map keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordIdentity(pub(crate) Vec<Value>);

impl RecordIdentity {
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

/// Named statement parameters. Names are stored without the `@` prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, Value)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a parameter.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.trim_start_matches(['@', ':', '$']);
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn extend(&mut self, other: &Params) {
        for (name, value) in &other.0 {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Caller-supplied `WHERE` clause with its own parameters.
///
/// The clause is appended verbatim; it is not parsed or planned.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    clause: String,
    params: Params,
}

impl Filter {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Params::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.set(name, value);
        self
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, Key, Params};
    use crate::model::value::Value;

    #[test]
    fn params_replace_existing_names() {
        let mut params = Params::new();
        params.set("id", 1_i64);
        params.set("id", 2_i64);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("@id"), Some(&Value::Integer(2)));
    }

    #[test]
    fn composite_key_keeps_pair_order() {
        let key = Key::composite([("tenant", 1_i64), ("user_id", 9_i64)]);
        assert_eq!(key.values(), vec![&Value::Integer(1), &Value::Integer(9)]);
        assert_eq!(key.to_string(), "(tenant=1, user_id=9)");
    }

    #[test]
    fn filter_collects_bound_params() {
        let filter = Filter::new("name = @name").bind("name", "ada");
        assert_eq!(filter.clause(), "name = @name");
        assert_eq!(
            filter.params().get("name"),
            Some(&Value::Text("ada".to_string()))
        );
    }
}
