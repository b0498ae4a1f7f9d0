#![allow(dead_code)]

use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;
use tablemap_core::{
    open_db_in_memory, MemberDescriptor, Params, Record, RecordDescriptor, Row, SqlConnection,
    SqlSession, SqlTransaction, StoreResult,
};
use uuid::Uuid;

/// Auto-key record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
}

impl User {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Record for User {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new("User")
            .table("users")
            .member(
                MemberDescriptor::field("id", |u: &User| &u.id, |u: &mut User| &mut u.id)
                    .auto_key(),
            )
            .member(MemberDescriptor::field(
                "name",
                |u: &User| &u.name,
                |u: &mut User| &mut u.name,
            ))
            .member(MemberDescriptor::field(
                "email",
                |u: &User| &u.email,
                |u: &mut User| &mut u.email,
            ))
    }
}

/// Caller-supplied text key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub code: String,
    pub label: String,
}

impl Tag {
    pub fn new(code: &str, label: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
        }
    }
}

impl Record for Tag {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new("Tag")
            .table("tags")
            .member(
                MemberDescriptor::field("code", |t: &Tag| &t.code, |t: &mut Tag| &mut t.code)
                    .key(),
            )
            .member(MemberDescriptor::field(
                "label",
                |t: &Tag| &t.label,
                |t: &mut Tag| &mut t.label,
            ))
    }
}

/// Two-column key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Membership {
    pub team_id: i64,
    pub user_id: i64,
    pub role: String,
}

impl Record for Membership {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new("Membership")
            .table("memberships")
            .member(
                MemberDescriptor::field(
                    "team_id",
                    |m: &Membership| &m.team_id,
                    |m: &mut Membership| &mut m.team_id,
                )
                .key(),
            )
            .member(
                MemberDescriptor::field(
                    "user_id",
                    |m: &Membership| &m.user_id,
                    |m: &mut Membership| &mut m.user_id,
                )
                .key()
                .foreign_key("users", "id"),
            )
            .member(MemberDescriptor::field(
                "role",
                |m: &Membership| &m.role,
                |m: &mut Membership| &mut m.role,
            ))
    }
}

/// No key members at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
}

impl AuditEntry {
    pub fn new(actor: &str, action: &str) -> Self {
        Self {
            actor: actor.to_string(),
            action: action.to_string(),
        }
    }
}

impl Record for AuditEntry {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new("AuditEntry")
            .table("audit_log")
            .member(MemberDescriptor::field(
                "actor",
                |a: &AuditEntry| &a.actor,
                |a: &mut AuditEntry| &mut a.actor,
            ))
            .member(MemberDescriptor::field(
                "action",
                |a: &AuditEntry| &a.action,
                |a: &mut AuditEntry| &mut a.action,
            ))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Owner {
    pub name: String,
}

/// Exercises renames and phase exclusions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub draft: bool,
    pub checksum: String,
    pub cached_len: i64,
    pub owner: Owner,
}

impl Record for Document {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new("Document")
            .table("documents")
            .member(
                MemberDescriptor::field("id", |d: &Document| &d.id, |d: &mut Document| &mut d.id)
                    .key(),
            )
            .member(MemberDescriptor::field(
                "title",
                |d: &Document| &d.title,
                |d: &mut Document| &mut d.title,
            ))
            .member(
                MemberDescriptor::field(
                    "body",
                    |d: &Document| &d.body,
                    |d: &mut Document| &mut d.body,
                )
                .skip_update(),
            )
            .member(
                MemberDescriptor::field(
                    "draft",
                    |d: &Document| &d.draft,
                    |d: &mut Document| &mut d.draft,
                )
                .column("is_draft"),
            )
            .member(
                MemberDescriptor::field(
                    "checksum",
                    |d: &Document| &d.checksum,
                    |d: &mut Document| &mut d.checksum,
                )
                .skip_select(),
            )
            .member(
                MemberDescriptor::field(
                    "cached_len",
                    |d: &Document| &d.cached_len,
                    |d: &mut Document| &mut d.cached_len,
                )
                .ignore(),
            )
            .member(MemberDescriptor::nested("owner", "Owner"))
    }
}

pub const SCHEMA: &str = "
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT
);
CREATE TABLE tags (
    code TEXT PRIMARY KEY,
    label TEXT NOT NULL
);
CREATE TABLE memberships (
    team_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    PRIMARY KEY (team_id, user_id)
);
CREATE TABLE audit_log (
    actor TEXT NOT NULL,
    action TEXT NOT NULL
);
CREATE TABLE documents (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    is_draft INTEGER NOT NULL,
    checksum TEXT NOT NULL
);
";

/// In-memory database with every fixture table.
pub fn setup() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn
}

/// Statement log entry of the recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Params,
}

/// Store double that records statements and replays canned result sets.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    pub log: RefCell<Vec<Recorded>>,
    pub results: RefCell<VecDeque<Vec<Row>>>,
    pub affected: RefCell<VecDeque<usize>>,
}

impl RecordingConnection {
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.results.borrow_mut().push_back(rows);
    }

    pub fn push_affected(&self, count: usize) {
        self.affected.borrow_mut().push_back(count);
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.borrow().iter().map(|entry| entry.sql.clone()).collect()
    }

    fn record(&self, sql: &str, params: &Params) {
        self.log.borrow_mut().push(Recorded {
            sql: sql.to_string(),
            params: params.clone(),
        });
    }
}

impl SqlSession for RecordingConnection {
    fn execute(&self, sql: &str, params: &Params, _: Option<Duration>) -> StoreResult<usize> {
        self.record(sql, params);
        Ok(self.affected.borrow_mut().pop_front().unwrap_or(1))
    }

    fn query(&self, sql: &str, params: &Params, _: Option<Duration>) -> StoreResult<Vec<Row>> {
        self.record(sql, params);
        Ok(self.results.borrow_mut().pop_front().unwrap_or_default())
    }
}

pub struct RecordingTransaction<'c> {
    conn: &'c RecordingConnection,
    committed: bool,
}

impl SqlSession for RecordingTransaction<'_> {
    fn execute(&self, sql: &str, params: &Params, timeout: Option<Duration>) -> StoreResult<usize> {
        self.conn.execute(sql, params, timeout)
    }

    fn query(
        &self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> StoreResult<Vec<Row>> {
        self.conn.query(sql, params, timeout)
    }
}

impl SqlTransaction for RecordingTransaction<'_> {
    fn commit(mut self) -> StoreResult<()> {
        self.committed = true;
        self.conn.record("COMMIT", &Params::new());
        Ok(())
    }
}

impl Drop for RecordingTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.conn.record("ROLLBACK", &Params::new());
        }
    }
}

impl SqlConnection for RecordingConnection {
    type Transaction<'c> = RecordingTransaction<'c>;

    fn begin_transaction(&self) -> StoreResult<RecordingTransaction<'_>> {
        self.record("BEGIN", &Params::new());
        Ok(RecordingTransaction {
            conn: self,
            committed: false,
        })
    }
}
