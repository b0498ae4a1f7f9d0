mod common;

use common::{setup, AuditEntry, Document, Membership, RecordingConnection, Tag, User};
use std::sync::Arc;
use std::time::Duration;
use tablemap_core::{
    Executor, Filter, Key, KeyedExecutor, KeylessMode, MapError, MetadataRegistry, Row,
    SqlConnection, SqlServerDialect, StoreError, Value,
};
use uuid::Uuid;

#[test]
fn insert_count_delete_get_scenario() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let users = Executor::<User>::new(&registry).unwrap();

    let a = users.insert(&conn, None, &User::named("a")).unwrap();
    let b = users.insert(&conn, None, &User::named("b")).unwrap();
    assert_eq!(a.id, 1);
    assert_eq!(b.id, 2);
    assert_eq!(users.record_count(&conn, None, None).unwrap(), 2);

    assert!(users.delete(&conn, None, &Key::single(1_i64)).unwrap());
    assert_eq!(users.record_count(&conn, None, None).unwrap(), 1);
    assert_eq!(users.get(&conn, None, &Key::single(1_i64)).unwrap(), None);
    assert!(!users.delete(&conn, None, &Key::single(1_i64)).unwrap());
}

#[test]
fn insert_returns_written_copy_and_leaves_input_alone() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let users = Executor::<User>::new(&registry).unwrap();

    let draft = User {
        email: Some("ada@example.com".to_string()),
        ..User::named("ada")
    };
    let written = users.insert(&conn, None, &draft).unwrap();

    assert_eq!(draft.id, 0);
    assert_ne!(written.id, 0);
    let loaded = users.get_by_record(&conn, None, &written).unwrap().unwrap();
    assert_eq!(loaded, written);
    assert_eq!(users.metadata().get_key(&written), Key::single(written.id));
}

#[test]
fn required_key_round_trip() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let tags = Executor::<Tag>::new(&registry).unwrap();

    let tag = Tag::new("rust", "Rust");
    let written = tags.insert(&conn, None, &tag).unwrap();
    assert_eq!(written, tag);

    let loaded = tags.get(&conn, None, &Key::single("rust")).unwrap();
    assert_eq!(loaded, Some(tag));
}

#[test]
fn update_honours_exclusions_and_reports_misses() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let documents = Executor::<Document>::new(&registry).unwrap();

    let mut doc = Document {
        id: Uuid::new_v4(),
        title: "draft".to_string(),
        body: "first body".to_string(),
        draft: true,
        checksum: "abc".to_string(),
        cached_len: 99,
        ..Document::default()
    };
    documents.insert(&conn, None, &doc).unwrap();

    doc.title = "final".to_string();
    doc.body = "ignored body".to_string();
    doc.draft = false;
    assert!(documents.update(&conn, None, &doc).unwrap());

    let loaded = documents.get(&conn, None, &Key::single(doc.id)).unwrap().unwrap();
    assert_eq!(loaded.id, doc.id);
    assert_eq!(loaded.title, "final");
    assert_eq!(loaded.body, "first body");
    assert!(!loaded.draft);
    assert_eq!(loaded.checksum, "", "checksum is not selected");
    assert_eq!(loaded.cached_len, 0, "ignored member is never mapped");

    let missing = Document {
        id: Uuid::new_v4(),
        ..doc
    };
    assert!(!documents.update(&conn, None, &missing).unwrap());
}

#[test]
fn upsert_twice_leaves_one_row() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let tags = Executor::<Tag>::new(&registry).unwrap();

    let tag = Tag::new("db", "Databases");
    tags.upsert(&conn, None, &tag).unwrap();
    tags.upsert(&conn, None, &tag).unwrap();
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 1);
    assert_eq!(tags.get(&conn, None, &Key::single("db")).unwrap(), Some(tag.clone()));

    let relabelled = Tag::new("db", "Storage");
    tags.upsert(&conn, None, &relabelled).unwrap();
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 1);
    assert_eq!(tags.get(&conn, None, &Key::single("db")).unwrap(), Some(relabelled));
}

#[test]
fn upsert_with_unassigned_auto_key_inserts() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let users = Executor::<User>::new(&registry).unwrap();

    let first = users.upsert(&conn, None, &User::named("grace")).unwrap();
    assert_ne!(first.id, 0);

    let renamed = User {
        name: "grace h".to_string(),
        ..first.clone()
    };
    let second = users.upsert(&conn, None, &renamed).unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(users.record_count(&conn, None, None).unwrap(), 1);
    assert_eq!(
        users.get(&conn, None, &Key::single(first.id)).unwrap().unwrap().name,
        "grace h"
    );
}

#[test]
fn failed_bulk_insert_rolls_back_implicit_transaction() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let tags = Executor::<Tag>::new(&registry).unwrap();

    let batch = vec![Tag::new("a", "A"), Tag::new("b", "B"), Tag::new("a", "again")];
    let err = tags.insert_list(&conn, None, &batch).unwrap_err();
    assert!(matches!(err, MapError::Store(StoreError::Sqlite(_))));
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 0);

    let written = tags.insert_list(&conn, None, &batch[..2]).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 2);
}

#[test]
fn caller_transaction_is_left_to_the_caller() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let tags = Executor::<Tag>::new(&registry).unwrap();
    let batch = vec![Tag::new("x", "X"), Tag::new("y", "Y")];

    {
        let tx = conn.begin_transaction().unwrap();
        tags.insert_list(&conn, Some(&tx), &batch).unwrap();
        assert_eq!(tags.record_count(&conn, Some(&tx), None).unwrap(), 2);
    }
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 0);

    let tx = conn.begin_transaction().unwrap();
    tags.insert_list(&conn, Some(&tx), &batch).unwrap();
    assert_eq!(tags.delete_list(&conn, Some(&tx), &batch[..1]).unwrap(), 1);
    tx.commit().unwrap();
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 1);
}

#[test]
fn filters_drive_list_keys_count_and_bulk_delete() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let users = Executor::<User>::new(&registry).unwrap();
    let written = users
        .insert_list(
            &conn,
            None,
            &[User::named("ann"), User::named("andy"), User::named("bob")],
        )
        .unwrap();

    let starts_with_an = Filter::new(r#""name" LIKE @prefix"#).bind("prefix", "an%");
    let listed = users.get_list(&conn, None, Some(&starts_with_an)).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(
        users.get_keys(&conn, None, Some(&starts_with_an)).unwrap(),
        vec![Key::single(written[0].id), Key::single(written[1].id)]
    );
    assert_eq!(users.record_count(&conn, None, Some(&starts_with_an)).unwrap(), 2);

    let mut removed = users.delete_where(&conn, None, Some(&starts_with_an)).unwrap();
    removed.sort_by_key(|key| key.to_string());
    assert_eq!(removed, vec![Key::single(written[0].id), Key::single(written[1].id)]);
    assert_eq!(users.get_list(&conn, None, None).unwrap(), vec![written[2].clone()]);

    assert_eq!(users.delete_where(&conn, None, None).unwrap().len(), 1);
    assert_eq!(users.record_count(&conn, None, None).unwrap(), 0);
}

#[test]
fn composite_keys_address_one_row() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let memberships = Executor::<Membership>::new(&registry).unwrap();

    let rows = [
        Membership {
            team_id: 1,
            user_id: 1,
            role: "owner".to_string(),
        },
        Membership {
            team_id: 1,
            user_id: 2,
            role: "member".to_string(),
        },
    ];
    memberships.insert_list(&conn, None, &rows).unwrap();

    let key = Key::composite([("team_id", 1_i64), ("user_id", 2_i64)]);
    assert_eq!(memberships.metadata().get_key(&rows[1]), key);
    assert_eq!(memberships.get(&conn, None, &key).unwrap(), Some(rows[1].clone()));

    let mut blank = Membership::default();
    memberships.metadata().set_key(&mut blank, &key).unwrap();
    assert_eq!((blank.team_id, blank.user_id), (1, 2));

    assert!(memberships.delete(&conn, None, &key).unwrap());
    assert_eq!(memberships.record_count(&conn, None, None).unwrap(), 1);

    let err = memberships.get(&conn, None, &Key::single(1_i64)).unwrap_err();
    assert!(matches!(err, MapError::KeyShape { .. }));
}

#[test]
fn key_less_single_row_ops_need_whole_table_mode() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let audit = Executor::<AuditEntry>::new(&registry).unwrap();

    audit.insert(&conn, None, &AuditEntry::new("ann", "login")).unwrap();
    audit.insert(&conn, None, &AuditEntry::new("bob", "logout")).unwrap();

    let err = audit
        .update(&conn, None, &AuditEntry::new("sys", "purge"))
        .unwrap_err();
    assert!(matches!(
        err,
        MapError::KeylessSingleRow { operation: "update", .. }
    ));
    let err = audit
        .delete_record(&conn, None, &AuditEntry::new("ann", "login"))
        .unwrap_err();
    assert!(matches!(err, MapError::KeylessSingleRow { operation: "delete", .. }));
    assert_eq!(audit.record_count(&conn, None, None).unwrap(), 2);

    let whole_table = audit.clone().with_keyless_mode(KeylessMode::WholeTable);
    assert!(whole_table
        .update(&conn, None, &AuditEntry::new("sys", "purge"))
        .unwrap());
    let entries = whole_table.get_list(&conn, None, None).unwrap();
    assert_eq!(entries, vec![AuditEntry::new("sys", "purge"); 2]);
    assert_eq!(whole_table.metadata().dedup(entries).len(), 1);

    whole_table.delete_where(&conn, None, None).unwrap();
    whole_table
        .upsert(&conn, None, &AuditEntry::new("ann", "login"))
        .unwrap();
    whole_table
        .upsert(&conn, None, &AuditEntry::new("bob", "login"))
        .unwrap();
    assert_eq!(
        whole_table.get_list(&conn, None, None).unwrap(),
        vec![AuditEntry::new("bob", "login")]
    );
}

#[test]
fn keyed_executor_speaks_the_key_type() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let users = KeyedExecutor::<User, i64>::new(&registry).unwrap();

    let written = users.insert(&conn, None, &User::named("lin")).unwrap();
    assert_eq!(users.get_key(&written).unwrap(), written.id);
    assert_eq!(users.get(&conn, None, written.id).unwrap(), Some(written.clone()));

    let mut copy = User::named("lin");
    users.set_key(&mut copy, written.id).unwrap();
    assert_eq!(copy, written);

    assert!(users.delete(&conn, None, written.id).unwrap());
    assert_eq!(users.get(&conn, None, written.id).unwrap(), None);
}

#[test]
fn timeout_hint_is_accepted() {
    let conn = setup();
    let registry = MetadataRegistry::default();
    let tags = Executor::<Tag>::new(&registry)
        .unwrap()
        .with_timeout(Some(Duration::from_millis(250)));

    assert_eq!(tags.timeout(), Some(Duration::from_millis(250)));
    tags.insert(&conn, None, &Tag::new("t", "T")).unwrap();
    assert_eq!(tags.record_count(&conn, None, None).unwrap(), 1);
}

#[test]
fn sql_server_flow_binds_and_writes_back() {
    let conn = RecordingConnection::default();
    let registry = MetadataRegistry::with_dialect(Arc::new(SqlServerDialect));
    let users = Executor::<User>::new(&registry).unwrap();

    conn.push_rows(vec![[("id", Value::Integer(7))].into_iter().collect::<Row>()]);
    let written = users.insert(&conn, None, &User::named("ada")).unwrap();
    assert_eq!(written.id, 7);

    conn.push_rows(vec![[("id", Value::Integer(8))].into_iter().collect::<Row>()]);
    let upserted = users.upsert(&conn, None, &User::named("bob")).unwrap();
    assert_eq!(upserted.id, 8);
    {
        let log = conn.log.borrow();
        assert!(log[1].sql.starts_with("IF NOT EXISTS (SELECT 1 FROM [users] WHERE [id] = @id)"));
        assert_eq!(log[1].params.get("id"), Some(&Value::Null));
        assert_eq!(log[1].params.get("name"), Some(&Value::Text("bob".to_string())));
    }

    users
        .insert_list(&conn, None, &[User::named("c"), User::named("d")])
        .unwrap();
    let statements = conn.statements();
    assert_eq!(statements[2], "BEGIN");
    assert!(statements[3].starts_with("INSERT INTO [users]"));
    assert!(statements[4].starts_with("INSERT INTO [users]"));
    assert_eq!(statements[5], "COMMIT");
}
