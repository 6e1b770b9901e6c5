//! Integration tests for the context-backed CRUD repository.

mod support;

use tracked_rust::{
    BatchMode, Context, CrudRepository, EntryState, InMemoryStore, RepositoryError, Store,
};
use support::library::{Author, Note, Setting};
use support::{context, seed_authors};

#[tokio::test]
async fn create_assigns_key_and_get_by_id_finds_it() {
    let mut context = context();

    let created = context.records::<Author>().create(Author::new("A1")).await.unwrap();
    assert_eq!(created.id, 1);

    context.detach_all();
    let loaded = context
        .records::<Author>()
        .get_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, created);
}

#[tokio::test]
async fn created_records_read_back_equal() {
    let mut context = context();
    let created = seed_authors(&mut context, &["a", "b", "c"]).await;
    let ids: Vec<i64> = created.iter().map(|author| author.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    context.detach_all();
    let mut authors = context.records::<Author>();
    for author in &created {
        assert_eq!(authors.get_by_id(&author.id).await.unwrap().as_ref(), Some(author));
    }
}

#[tokio::test]
async fn get_by_id_of_missing_key_is_absent() {
    let mut context = context();
    seed_authors(&mut context, &["a"]).await;

    assert!(context.records::<Author>().get_by_id(&15).await.unwrap().is_none());
}

#[tokio::test]
async fn update_without_row_is_not_found() {
    let store = InMemoryStore::new();
    let mut context = Context::new(store.clone());

    let err = context
        .records::<Author>()
        .update(Author::with_id(7, "ghost"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::NotFound { ref key, .. } if key == "7"));
    assert!(store.rows(None, "authors").await.unwrap().is_empty());
}

#[tokio::test]
async fn save_creates_then_updates() {
    let mut context = context();
    let mut authors = context.records::<Author>();

    let created = authors.save(Author::new("first")).await.unwrap();
    assert_eq!(created.id, 1);

    let mut renamed = created.clone();
    renamed.name = "renamed".into();
    let saved = authors.save(renamed).await.unwrap();
    assert_eq!(saved.id, 1);
    assert_eq!(saved.name, "renamed");

    assert_eq!(authors.get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn save_of_detached_record_with_stored_key_updates() {
    let mut context = context();
    seed_authors(&mut context, &["a"]).await;
    context.detach_all();

    let saved = context
        .records::<Author>()
        .save(Author::with_id(1, "via save"))
        .await
        .unwrap();

    assert_eq!(saved.name, "via save");
    assert_eq!(context.records::<Author>().get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn save_of_unknown_caller_key_creates() {
    let mut context = context();

    let saved = context
        .records::<Setting>()
        .save(Setting::new("theme", "dark"))
        .await
        .unwrap();

    assert_eq!(saved.name, "theme");
    assert_eq!(context.entry_state::<Setting>(&"theme".to_string()), Some(EntryState::Unchanged));
}

#[tokio::test]
async fn empty_batches_do_nothing() {
    let mut context = context();
    let mut authors = context.records::<Author>();

    assert!(authors.create_many(Vec::new()).await.unwrap().is_empty());
    assert!(authors.update_many(Vec::new()).await.unwrap().is_empty());
    assert!(authors.save_many(Vec::new(), BatchMode::Atomic).await.unwrap().is_empty());
    assert!(authors.delete_many(Vec::new()).await.unwrap().is_empty());
    assert!(authors.delete_many_by_id(Vec::new()).await.unwrap().is_empty());
    assert!(!context.in_transaction());

    // No sequence value was drawn by the empty calls.
    let created = context.records::<Author>().create(Author::new("a")).await.unwrap();
    assert_eq!(created.id, 1);
}

#[tokio::test]
async fn delete_of_missing_id_leaves_store_unchanged() {
    let mut context = context();
    seed_authors(&mut context, &["a", "b", "c"]).await;

    let removed = context.records::<Author>().delete_by_id(&15).await.unwrap();

    assert!(removed.is_none());
    assert_eq!(context.records::<Author>().get_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn detached_update_matches_tracked_update() {
    let mut tracked_context = context();
    seed_authors(&mut tracked_context, &["a"]).await;
    let mut tracked = tracked_context
        .records::<Author>()
        .get_by_id(&1)
        .await
        .unwrap()
        .unwrap();
    tracked.name = "changed".into();
    let via_tracked = tracked_context.records::<Author>().update(tracked).await.unwrap();

    let mut detached_context = context();
    seed_authors(&mut detached_context, &["a"]).await;
    detached_context.detach_all();
    let via_detached = detached_context
        .records::<Author>()
        .update(Author::with_id(1, "changed"))
        .await
        .unwrap();

    assert_eq!(via_tracked, via_detached);
    detached_context.detach_all();
    let persisted = detached_context
        .records::<Author>()
        .get_by_id(&1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.name, "changed");
}

#[tokio::test]
async fn create_many_mixes_generated_and_caller_keys() {
    let store = InMemoryStore::new();
    let mut context = Context::new(store.clone());

    let created = context
        .records::<Author>()
        .create_many(vec![Author::new("generated"), Author::with_id(1, "caller")])
        .await
        .unwrap();

    assert_eq!(created[0].id, 2);
    assert_eq!(created[1].id, 1);
    assert_eq!(store.rows(None, "authors").await.unwrap().len(), 2);

    let next = context.records::<Author>().create(Author::new("later")).await.unwrap();
    assert_eq!(next.id, 3);
}

#[tokio::test]
async fn clearing_a_skipped_when_none_field_reaches_the_store() {
    let mut context = context();
    let created = context.records::<Note>().create(Note::new("x")).await.unwrap();

    // Detached path.
    context.detach_all();
    let cleared = Note {
        id: created.id,
        body: None,
    };
    let updated = context.records::<Note>().update(cleared).await.unwrap();
    assert_eq!(updated.body, None);

    context.detach_all();
    let stored = context.records::<Note>().get_by_id(&created.id).await.unwrap().unwrap();
    assert_eq!(stored.body, None);

    // Tracked path.
    let mut tracked = context
        .records::<Note>()
        .update(Note::new("y").with_id(created.id))
        .await
        .unwrap();
    assert_eq!(tracked.body.as_deref(), Some("y"));
    tracked.body = None;
    let updated = context.records::<Note>().update(tracked).await.unwrap();
    assert_eq!(updated.body, None);

    context.detach_all();
    let stored = context.records::<Note>().get_by_id(&created.id).await.unwrap().unwrap();
    assert_eq!(stored.body, None);
}

#[tokio::test]
async fn ignore_on_update_fields_keep_persisted_values() {
    let mut context = context();
    seed_authors(&mut context, &["a"]).await;

    let mut incoming = Author::with_id(1, "b");
    incoming.created_by = "intruder".into();
    let updated = context.records::<Author>().update(incoming.clone()).await.unwrap();
    assert_eq!(updated.name, "b");
    assert_eq!(updated.created_by, "seed");

    context.detach_all();
    incoming.name = "c".into();
    let updated = context.records::<Author>().update(incoming).await.unwrap();
    assert_eq!(updated.name, "c");
    assert_eq!(updated.created_by, "seed");
}

#[tokio::test]
async fn serde_skipped_fields_are_not_persisted() {
    let mut context = context();
    let mut author = Author::new("a");
    author.books.push(Default::default());
    context.records::<Author>().create(author).await.unwrap();
    context.detach_all();

    let loaded = context.records::<Author>().get_by_id(&1).await.unwrap().unwrap();
    assert!(loaded.books.is_empty());
}

#[tokio::test]
async fn duplicate_keys_are_rejected() {
    let mut context = context();
    let mut settings = context.records::<Setting>();
    settings.create(Setting::new("theme", "dark")).await.unwrap();

    // Still tracked in this unit of work.
    let err = settings.create(Setting::new("theme", "light")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateKey { .. }));

    // Detached: the store reports the conflict.
    context.detach_all();
    let err = context
        .records::<Setting>()
        .create(Setting::new("theme", "light"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateKey { ref key, .. } if key == "theme"));
    assert_eq!(context.tracked_count::<Setting>(), 0);
}

#[tokio::test]
async fn unset_natural_key_is_rejected_before_the_store() {
    let store = InMemoryStore::new();
    let mut context = Context::new(store.clone());

    let err = context
        .records::<Setting>()
        .create(Setting::new("", "orphan"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::InvalidArgument(_)));
    assert!(store.rows(None, "settings").await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_batch_writes_nothing_and_context_stays_usable() {
    let store = InMemoryStore::new();
    let mut context = Context::new(store.clone());
    context.records::<Setting>().create(Setting::new("a", "1")).await.unwrap();
    context.detach_all();

    let err = context
        .records::<Setting>()
        .create_many(vec![Setting::new("b", "2"), Setting::new("a", "again")])
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateKey { .. }));
    assert_eq!(store.rows(None, "settings").await.unwrap().len(), 1);
    assert!(!context.has_changes());

    context.records::<Setting>().create(Setting::new("b", "2")).await.unwrap();
    assert_eq!(store.rows(None, "settings").await.unwrap().len(), 2);
}

#[tokio::test]
async fn delete_tracked_and_detached_records() {
    let mut context = context();
    let seeded = seed_authors(&mut context, &["a", "b"]).await;

    let removed = context.records::<Author>().delete(seeded[0].clone()).await.unwrap();
    assert_eq!(removed.map(|author| author.id), Some(1));
    assert!(!context.is_tracked(&seeded[0]));

    context.detach_all();
    let removed = context.records::<Author>().delete(seeded[1].clone()).await.unwrap();
    assert_eq!(removed.map(|author| author.name), Some("b".to_string()));

    let again = context.records::<Author>().delete(seeded[1].clone()).await.unwrap();
    assert!(again.is_none());
    assert!(context.records::<Author>().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_many_by_id_collects_present_rows() {
    let mut context = context();
    seed_authors(&mut context, &["a", "b", "c"]).await;

    let removed = context
        .records::<Author>()
        .delete_many_by_id(vec![1, 15, 3])
        .await
        .unwrap();

    let ids: Vec<i64> = removed.iter().map(|author| author.id).collect();
    assert_eq!(ids, vec![1, 3]);
    let remaining = context.records::<Author>().get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "b");
}

#[tokio::test]
async fn update_many_writes_in_one_flush() {
    let mut context = context();
    let seeded = seed_authors(&mut context, &["a", "b"]).await;
    context.detach_all();

    let renamed: Vec<Author> = seeded
        .into_iter()
        .map(|mut author| {
            author.name = author.name.to_uppercase();
            author
        })
        .collect();
    let updated = context.records::<Author>().update_many(renamed).await.unwrap();

    let names: Vec<&str> = updated.iter().map(|author| author.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert!(!context.has_changes());
}

#[tokio::test]
async fn update_many_with_unknown_key_writes_nothing() {
    let mut context = context();
    seed_authors(&mut context, &["a"]).await;
    context.detach_all();

    let err = context
        .records::<Author>()
        .update_many(vec![Author::with_id(1, "changed"), Author::with_id(9, "ghost")])
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));

    let stored = context.records::<Author>().get_by_id(&1).await.unwrap().unwrap();
    assert_eq!(stored.name, "a");
}
