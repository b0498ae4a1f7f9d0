//! Dialect strategies for the statement shapes that differ between stores.
//!
//! # Responsibility
//! - Quote identifiers.
//! - Render the statements that report values back (insert, bulk delete,
//!   upsert), because each store spells "return the affected row" differently.
//!
//! # Invariants
//! - Every piece handed to a dialect is already quoted by that same dialect.
//! - Parameters are always written as `@member`, which both SQL Server and
//!   SQLite accept as named placeholders.

use std::fmt::Debug;

/// A statement split around the point where a caller filter is inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitStatement {
    pub head: String,
    pub tail: String,
}

impl SplitStatement {
    /// Renders the statement, appending `WHERE <clause>` when one is given.
    pub fn render(&self, clause: Option<&str>) -> String {
        match clause {
            Some(clause) => format!("{} WHERE {}{}", self.head, clause, self.tail),
            None => format!("{}{}", self.head, self.tail),
        }
    }
}

/// How a dialect performs insert-or-update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertTemplate {
    /// One statement, arbitrated by the server.
    Native(String),
    /// Run `probe` (a scalar existence check), then the insert or the update
    /// template.
    ProbeThenWrite { probe: String },
}

/// Quoted building blocks of an upsert.
#[derive(Debug, Clone, Copy)]
pub struct UpsertParts<'a> {
    pub table: &'a str,
    pub key_columns: &'a [String],
    /// ` WHERE <key> = @<member> AND ...`, or empty for key-less types.
    pub key_clause: &'a str,
    /// The dialect's own insert statement for this type.
    pub insert: &'a str,
    /// Key columns followed by insert columns.
    pub merge_columns: &'a [String],
    pub merge_values: &'a [String],
    /// `<col> = @<member>, ...`; `None` when nothing is updatable.
    pub set_clause: Option<&'a str>,
    pub returning: &'a [String],
}

pub trait SqlDialect: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Quotes one identifier; dotted names are quoted segment by segment.
    fn quote_ident(&self, ident: &str) -> String;

    fn insert(
        &self,
        table: &str,
        columns: &[String],
        values: &[String],
        returning: &[String],
    ) -> String;

    fn delete_returning(&self, table: &str, returning: &[String]) -> SplitStatement;

    fn upsert(&self, parts: &UpsertParts<'_>) -> UpsertTemplate;
}

/// SQL Server: `OUTPUT INSERTED/DELETED` and `IF NOT EXISTS ... ELSE ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    fn output(prefix: &str, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| format!("{prefix}.{column}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sql_server"
    }

    fn quote_ident(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|segment| format!("[{segment}]"))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn insert(
        &self,
        table: &str,
        columns: &[String],
        values: &[String],
        returning: &[String],
    ) -> String {
        let output = Self::output("INSERTED", returning);
        if columns.is_empty() {
            return format!("INSERT INTO {table} OUTPUT {output} DEFAULT VALUES");
        }
        format!(
            "INSERT INTO {table} ({}) OUTPUT {output} VALUES ({})",
            columns.join(", "),
            values.join(", ")
        )
    }

    fn delete_returning(&self, table: &str, returning: &[String]) -> SplitStatement {
        SplitStatement {
            head: format!(
                "DELETE FROM {table} OUTPUT {}",
                Self::output("DELETED", returning)
            ),
            tail: String::new(),
        }
    }

    fn upsert(&self, parts: &UpsertParts<'_>) -> UpsertTemplate {
        let probe = format!(
            "IF NOT EXISTS (SELECT 1 FROM {}{}) {}",
            parts.table, parts.key_clause, parts.insert
        );
        let sql = match parts.set_clause {
            Some(set_clause) => format!(
                "{probe} ELSE UPDATE {} SET {set_clause} OUTPUT {}{}",
                parts.table,
                Self::output("DELETED", parts.returning),
                parts.key_clause
            ),
            None => probe,
        };
        UpsertTemplate::Native(sql)
    }
}

/// SQLite: `RETURNING` and `ON CONFLICT (...) DO UPDATE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|segment| format!("\"{segment}\""))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn insert(
        &self,
        table: &str,
        columns: &[String],
        values: &[String],
        returning: &[String],
    ) -> String {
        let returning = returning.join(", ");
        if columns.is_empty() {
            return format!("INSERT INTO {table} DEFAULT VALUES RETURNING {returning}");
        }
        format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING {returning}",
            columns.join(", "),
            values.join(", ")
        )
    }

    fn delete_returning(&self, table: &str, returning: &[String]) -> SplitStatement {
        SplitStatement {
            head: format!("DELETE FROM {table}"),
            tail: format!(" RETURNING {}", returning.join(", ")),
        }
    }

    fn upsert(&self, parts: &UpsertParts<'_>) -> UpsertTemplate {
        // ON CONFLICT needs a conflict target.
        if parts.key_columns.is_empty() {
            return UpsertTemplate::ProbeThenWrite {
                probe: format!("SELECT EXISTS (SELECT 1 FROM {}{})", parts.table, parts.key_clause),
            };
        }

        let action = match parts.set_clause {
            Some(set_clause) => format!("DO UPDATE SET {set_clause}"),
            None => "DO NOTHING".to_string(),
        };
        UpsertTemplate::Native(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {action} RETURNING {}",
            parts.table,
            parts.merge_columns.join(", "),
            parts.merge_values.join(", "),
            parts.key_columns.join(", "),
            parts.returning.join(", ")
        ))
    }
}
