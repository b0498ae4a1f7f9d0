mod common;

use common::{setup, Tag, User};
use std::sync::Arc;
use tablemap_core::{share, Executor, Filter, IdentityCache, Key, MetadataRegistry};

#[tokio::test]
async fn async_forms_match_blocking_semantics() {
    let conn = share(setup());
    let registry = MetadataRegistry::default();
    let users = Executor::<User>::new(&registry).unwrap();

    let a = users.insert_async(&conn, User::named("a")).await.unwrap();
    let b = users.insert_async(&conn, User::named("b")).await.unwrap();
    assert_eq!((a.id, b.id), (1, 2));
    assert_eq!(users.record_count_async(&conn, None).await.unwrap(), 2);

    assert!(users.delete_async(&conn, Key::single(1_i64)).await.unwrap());
    assert_eq!(users.record_count_async(&conn, None).await.unwrap(), 1);
    assert_eq!(users.get_async(&conn, Key::single(1_i64)).await.unwrap(), None);

    let renamed = User {
        name: "bee".to_string(),
        ..b.clone()
    };
    assert!(users.update_async(&conn, renamed.clone()).await.unwrap());
    assert_eq!(
        users.get_by_record_async(&conn, b).await.unwrap(),
        Some(renamed)
    );
}

#[tokio::test]
async fn async_bulk_calls_use_an_implicit_transaction() {
    let conn = share(setup());
    let registry = MetadataRegistry::default();
    let tags = Executor::<Tag>::new(&registry).unwrap();

    let batch = vec![Tag::new("a", "A"), Tag::new("a", "dup")];
    assert!(tags.insert_list_async(&conn, batch.clone()).await.is_err());
    assert_eq!(tags.record_count_async(&conn, None).await.unwrap(), 0);

    tags.upsert_list_async(&conn, batch).await.unwrap();
    let keys = tags
        .get_keys_async(&conn, Some(Filter::new(r#""label" = @label"#).bind("label", "dup")))
        .await
        .unwrap();
    assert_eq!(keys, vec![Key::single("a")]);

    let removed = tags.delete_where_async(&conn, None).await.unwrap();
    assert_eq!(removed, vec![Key::single("a")]);
}

#[tokio::test]
async fn cache_reconciles_async_results_on_the_calling_task() {
    let conn = share(setup());
    let registry = MetadataRegistry::default();
    let mut cache = IdentityCache::<User, Arc<std::sync::Mutex<User>>, i64>::from_registry(
        &registry,
        |user| Arc::new(std::sync::Mutex::new(user.clone())),
        |user, view| {
            *view.lock().unwrap() = user.clone();
            view
        },
    )
    .unwrap();

    let view = cache.insert_async(&conn, User::named("eve")).await.unwrap();
    let id = view.lock().unwrap().id;
    let fetched = cache.get_async(&conn, Key::single(id)).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&view, &fetched));

    let edited = User {
        email: Some("eve@example.com".to_string()),
        ..view.lock().unwrap().clone()
    };
    assert!(cache.update_async(&conn, edited).await.unwrap());
    assert_eq!(view.lock().unwrap().email.as_deref(), Some("eve@example.com"));

    assert!(cache.delete_async(&conn, Key::single(id)).await.unwrap());
    assert!(cache.is_empty());
    assert!(cache.get_list_async(&conn, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn async_bulk_cache_calls_touch_the_map_only_on_success() {
    let conn = share(setup());
    let registry = MetadataRegistry::default();
    let mut cache = IdentityCache::<Tag, Tag, String>::from_registry(
        &registry,
        |tag| tag.clone(),
        |tag, _| tag.clone(),
    )
    .unwrap();

    let batch = vec![Tag::new("a", "A"), Tag::new("a", "dup")];
    assert!(cache.insert_list_async(&conn, batch.clone()).await.is_err());
    assert!(cache.is_empty());

    let views = cache.upsert_list_async(&conn, batch).await.unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(cache.len(), 1);

    let relabeled = vec![Tag::new("a", "again"), Tag::new("gone", "never stored")];
    assert_eq!(cache.update_list_async(&conn, relabeled).await.unwrap(), 1);
    assert_eq!(
        cache.view(&"a".to_string()).map(|tag| tag.label.as_str()),
        Some("again")
    );
    assert!(!cache.contains(&"gone".to_string()));

    let removed = cache.delete_where_async(&conn, None).await.unwrap();
    assert_eq!(removed, vec![Key::single("a")]);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn async_update_of_a_vanished_row_evicts_its_view() {
    let conn = share(setup());
    let registry = MetadataRegistry::default();
    let mut cache = IdentityCache::<Tag, Tag, String>::from_registry(
        &registry,
        |tag| tag.clone(),
        |tag, _| tag.clone(),
    )
    .unwrap();

    let stored = cache.insert_async(&conn, Tag::new("t", "T")).await.unwrap();
    cache
        .executor()
        .clone()
        .delete_record_async(&conn, stored.clone())
        .await
        .unwrap();

    assert!(!cache.update_async(&conn, stored).await.unwrap());
    assert!(!cache.contains(&"t".to_string()));

    let records = vec![Tag::new("x", "X"), Tag::new("y", "Y")];
    cache.insert_list_async(&conn, records.clone()).await.unwrap();
    assert_eq!(cache.delete_list_async(&conn, records).await.unwrap(), 2);
    assert!(cache.is_empty());
}
