//! Synchronization - reconcile persisted rows with a desired list.
//!
//! The rows selected by a source query are diffed against the desired
//! records by key: desired records that exist are updated, the others are
//! created, and selected rows whose key is not desired are deleted.

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::error::RepositoryError;
use crate::query::Query;
use crate::record::{Record, RecordKey};
use crate::repository::{ContextRepository, CrudRepository};
use crate::store::Store;

/// Outcome of a synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizationResult<R> {
    pub added: Vec<R>,
    pub updated: Vec<R>,
    pub removed: Vec<R>,
}

impl<R> SynchronizationResult<R> {
    /// Records that are persisted after the synchronization: added, then updated.
    pub fn synchronized(&self) -> impl Iterator<Item = &R> {
        self.added.iter().chain(self.updated.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

impl<R> Default for SynchronizationResult<R> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Current rows whose key matches no desired record. Unset desired keys
/// match nothing.
pub(crate) fn plan_removals<R: Record>(current: Vec<R>, desired: &[R]) -> Vec<R> {
    let keep: HashSet<&R::Key> = desired
        .iter()
        .map(|record| record.key())
        .filter(|key| !key.is_unset())
        .collect();

    current
        .into_iter()
        .filter(|record| !keep.contains(record.key()))
        .collect()
}

#[instrument(skip_all, fields(collection = R::COLLECTION, desired = desired.len()))]
pub(crate) async fn reconcile<S: Store, R: Record>(
    repository: &mut ContextRepository<'_, S, R>,
    source: Query<R>,
    desired: Vec<R>,
) -> Result<SynchronizationResult<R>, RepositoryError> {
    let current = repository.query(source.tracking(true)).await?;

    let mut to_create = Vec::new();
    let mut to_update = Vec::new();
    for record in &desired {
        if repository.context().exists_in_store(record).await? {
            to_update.push(record.clone());
        } else {
            to_create.push(record.clone());
        }
    }
    let to_remove = plan_removals(current, &desired);

    let added = repository.create_many(to_create).await?;
    let updated = repository.update_many(to_update).await?;
    let removed = repository.delete_many(to_remove).await?;

    debug!(
        added = added.len(),
        updated = updated.len(),
        removed = removed.len(),
        "synchronized"
    );
    Ok(SynchronizationResult {
        added,
        updated,
        removed,
    })
}
