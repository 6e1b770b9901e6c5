//! Repositories - typed CRUD over a context.

mod context_repository;
mod options;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::query::Query;
use crate::record::Record;
use crate::sync::SynchronizationResult;

pub use context_repository::ContextRepository;
pub use options::{BatchMode, RepositoryOptions};

/// Generic CRUD and synchronization contract for one record type.
///
/// Every call borrows the repository mutably, and through it the unit of
/// work it is bound to. Absence on point lookups and deletes is `Ok(None)`,
/// not an error.
#[async_trait]
pub trait CrudRepository<R: Record>: Send {
    /// A query over every row of the record type, to be refined by the caller.
    fn as_query(&self) -> Query<R> {
        Query::new()
    }

    async fn get_all(&mut self) -> Result<Vec<R>, RepositoryError>;

    async fn get_by_id(&mut self, key: &R::Key) -> Result<Option<R>, RepositoryError>;

    async fn query(&mut self, query: Query<R>) -> Result<Vec<R>, RepositoryError>;

    /// First row of the query, if any.
    async fn query_single(&mut self, query: Query<R>) -> Result<Option<R>, RepositoryError>;

    /// Inserts a record. Fails with `DuplicateKey` if the key is already
    /// stored or tracked.
    async fn create(&mut self, record: R) -> Result<R, RepositoryError>;

    /// Inserts all records in one write; either all are stored or none.
    async fn create_many(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError>;

    /// Writes an existing record back. Fails with `NotFound` if no row has its key.
    async fn update(&mut self, record: R) -> Result<R, RepositoryError>;

    async fn update_many(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError>;

    /// Updates the record if it exists in the store, creates it otherwise.
    async fn save(&mut self, record: R) -> Result<R, RepositoryError>;

    async fn save_many(&mut self, records: Vec<R>, mode: BatchMode) -> Result<Vec<R>, RepositoryError>;

    /// Deletes the record. Returns the removed record, or None if it had no row.
    async fn delete(&mut self, record: R) -> Result<Option<R>, RepositoryError>;

    async fn delete_many(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError>;

    async fn delete_by_id(&mut self, key: &R::Key) -> Result<Option<R>, RepositoryError>;

    async fn delete_many_by_id(&mut self, keys: Vec<R::Key>) -> Result<Vec<R>, RepositoryError>;

    /// Makes the rows selected by `source` match `desired`: creates what is
    /// new, updates what exists and deletes selected rows whose key is not
    /// desired.
    async fn synchronize(
        &mut self,
        source: Query<R>,
        desired: Vec<R>,
        mode: BatchMode,
    ) -> Result<SynchronizationResult<R>, RepositoryError>;

    /// [`synchronize`](Self::synchronize) with the source built from
    /// [`as_query`](Self::as_query).
    async fn synchronize_with<F>(
        &mut self,
        source: F,
        desired: Vec<R>,
        mode: BatchMode,
    ) -> Result<SynchronizationResult<R>, RepositoryError>
    where
        F: FnOnce(Query<R>) -> Query<R> + Send,
        Self: Sized,
    {
        let source = source(self.as_query());
        self.synchronize(source, desired, mode).await
    }
}
