//! Integration tests for registry dispatch and record self-operations.

mod support;

use tracked_rust::{
    BatchMode, Context, ContextRepository, CrudRepository, InMemoryStore, Record, RecordExt,
    Registry, RepositoryError, RepositoryFactory, RepositoryOptions, Store,
};
use support::library::{Author, Book};
use support::context;

/// Hands out selective repositories for books.
struct BookRepositoryFactory;

impl<S: Store + 'static> RepositoryFactory<S, Book> for BookRepositoryFactory {
    fn repository<'c>(&self, context: &'c mut Context<S>) -> Box<dyn CrudRepository<Book> + 'c> {
        Box::new(ContextRepository::new(context, RepositoryOptions::selective()))
    }
}

fn registry() -> Registry<InMemoryStore> {
    let mut registry = Registry::new();
    registry
        .register_default::<Author>(RepositoryOptions::default())
        .register::<Book, _>(BookRepositoryFactory);
    registry
}

#[tokio::test]
async fn records_route_through_their_registered_repository() {
    let registry = registry();
    let mut context = context();

    let author = Author::new("a").create_with(&registry, &mut context).await.unwrap();
    assert_eq!(author.id, 1);

    let mut renamed = author.clone();
    renamed.name = "b".into();
    let renamed = renamed.update_with(&registry, &mut context).await.unwrap();
    assert_eq!(renamed.name, "b");

    let saved = Author::new("c").save_with(&registry, &mut context).await.unwrap();
    assert_eq!(saved.id, 2);

    let removed = renamed.delete_with(&registry, &mut context).await.unwrap();
    assert_eq!(removed.map(|author| author.id), Some(1));
    assert_eq!(context.records::<Author>().get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn factory_decides_repository_behaviour() {
    let registry = registry();
    let mut context = context();

    let book = registry.create(&mut context, Book::new("draft", 7)).await.unwrap();
    let mut incoming = book.clone();
    incoming.title = "final".into();
    incoming.author_id = 99;
    let updated = registry.update(&mut context, incoming).await.unwrap();

    assert_eq!(updated.title, "final");
    assert_eq!(updated.author_id, 7);
}

#[tokio::test]
async fn batch_helpers_dispatch_by_type() {
    let registry = registry();
    let mut context = context();

    let created = registry
        .create_many(&mut context, vec![Author::new("a"), Author::new("b")])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    let saved = registry
        .save_many(&mut context, vec![Author::with_id(1, "a2"), Author::new("c")], BatchMode::Atomic)
        .await
        .unwrap();
    assert_eq!(saved.len(), 2);

    let updated = registry
        .update_many(&mut context, vec![Author::with_id(2, "b2")])
        .await
        .unwrap();
    assert_eq!(updated[0].name, "b2");

    let removed = registry.delete_many(&mut context, created).await.unwrap();
    assert_eq!(removed.len(), 2);

    let mut authors = registry.repository::<Author>(&mut context).unwrap();
    let remaining = authors.get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "c");
}

#[tokio::test]
async fn unregistered_type_is_reported() {
    let mut registry = registry();
    registry.reset();
    let mut context = context();

    let err = Author::new("a")
        .save_with(&registry, &mut context)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepositoryError::NotRegistered { ref collection } if collection == Author::COLLECTION
    ));
    assert!(!registry.is_registered::<Book>());
}

#[test]
fn registrations_are_listed_by_collection() {
    let registry = registry();

    assert!(registry.is_registered::<Author>());
    assert_eq!(registry.collections(), vec!["authors", "books"]);
}
