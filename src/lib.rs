mod context;
mod error;
mod policy;
mod query;
mod record;
mod registry;
mod repository;
mod store;
mod sync;

pub use context::{Context, EntryState, Transaction};
pub use error::RepositoryError;
pub use policy::{FieldSelection, UpdateMode, UpdatePolicy};
pub use query::Query;
pub use record::{Field, Record, RecordKey};
pub use registry::{RecordExt, Registry, RepositoryFactory};
pub use repository::{BatchMode, ContextRepository, CrudRepository, RepositoryOptions};
pub use store::{InMemoryStore, Mutation, Row, Store, StoreError, TransactionId, WriteBatch};
pub use sync::SynchronizationResult;

// Re-export the Record derive macro from the tracked_rust_macros crate
pub use tracked_rust_macros::Record;

// Re-export async_trait so custom stores and repositories can implement the async traits
pub use async_trait::async_trait;
