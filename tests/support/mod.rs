#![allow(dead_code)]

pub mod library;

use tracked_rust::{Context, CrudRepository, InMemoryStore};

use library::Author;

pub fn context() -> Context<InMemoryStore> {
    Context::new(InMemoryStore::new())
}

/// Creates one author per name; keys are assigned 1..=n.
pub async fn seed_authors(context: &mut Context<InMemoryStore>, names: &[&str]) -> Vec<Author> {
    let authors = names.iter().map(|name| Author::new(name)).collect();
    context.records::<Author>().create_many(authors).await.unwrap()
}
