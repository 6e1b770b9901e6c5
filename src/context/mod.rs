//! Context - one unit of work over a store.
//!
//! The context owns the working set: at most one tracked instance per key
//! and record type. Repositories stage changes into it and flush them with
//! [`Context::save_changes`], which writes every pending change of every
//! record type in a single atomic batch.
//!
//! ## Example
//!
//! ```ignore
//! use tracked_rust::{Context, CrudRepository, InMemoryStore};
//!
//! let mut context = Context::new(InMemoryStore::new());
//! let author = context.records::<Author>().create(author).await?;
//! let loaded = context.records::<Author>().get_by_id(&author.id).await?;
//! ```
//!
//! A context is not shared between tasks; every operation borrows it mutably.

mod transaction;
mod working_set;

use std::any::TypeId;
use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::RepositoryError;
use crate::query::Query;
use crate::record::{storage_key, Record, RecordKey};
use crate::repository::{ContextRepository, RepositoryOptions};
use crate::store::{Store, TransactionId, WriteBatch};

pub use transaction::Transaction;
pub use working_set::EntryState;
pub(crate) use working_set::{EntryId, WorkingSet};

use working_set::TrackedSet;

struct ActiveTransaction {
    id: TransactionId,
    /// Number of live guards, the owning one included.
    depth: usize,
    /// Set when a nested guard is dropped without commit.
    rollback_only: bool,
}

/// A unit of work: a store handle plus the records tracked against it.
pub struct Context<S> {
    store: S,
    sets: HashMap<TypeId, Box<dyn TrackedSet>>,
    transaction: Option<ActiveTransaction>,
}

impl<S: Store> Context<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            sets: HashMap::new(),
            transaction: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a typed repository bound to this context with default options.
    pub fn records<R: Record>(&mut self) -> ContextRepository<'_, S, R> {
        ContextRepository::new(self, RepositoryOptions::default())
    }

    /// Get a typed repository bound to this context.
    pub fn records_with<R: Record>(
        &mut self,
        options: RepositoryOptions,
    ) -> ContextRepository<'_, S, R> {
        ContextRepository::new(self, options)
    }

    /// Finds the tracked instance equivalent to `candidate`: the candidate
    /// itself, or the live entry sharing its key. Unset keys only match by
    /// reference.
    pub fn resolve<R: Record>(&self, candidate: &R) -> Option<&R> {
        let set = self.working_set::<R>()?;
        let found = set.position(candidate).map(|index| &set.entry(index).record);
        trace!(
            collection = R::COLLECTION,
            key = %candidate.key(),
            found = found.is_some(),
            "resolved tracked identity"
        );
        found
    }

    pub fn is_tracked<R: Record>(&self, candidate: &R) -> bool {
        self.resolve(candidate).is_some()
    }

    /// State of the entry tracking `key`, if any.
    pub fn entry_state<R: Record>(&self, key: &R::Key) -> Option<EntryState> {
        let set = self.working_set::<R>()?;
        match set.position_by_key(key) {
            Some(index) => Some(set.entry(index).state),
            None if set.is_deleting(key) => Some(EntryState::Deleted),
            None => None,
        }
    }

    /// Every live tracked instance of a record type.
    pub fn tracked<R: Record>(&self) -> Vec<&R> {
        self.working_set::<R>()
            .map(|set| set.records().collect())
            .unwrap_or_default()
    }

    pub fn tracked_count<R: Record>(&self) -> usize {
        self.working_set::<R>().map_or(0, |set| set.len())
    }

    /// Stops tracking everything. Later operations treat records as detached.
    pub fn detach_all(&mut self) {
        self.sets.clear();
    }

    pub fn has_changes(&self) -> bool {
        self.sets.values().any(|set| set.has_changes())
    }

    /// Drops pending inserts and restores modified and deleted entries.
    pub fn reject_changes(&mut self) {
        for set in self.sets.values_mut() {
            set.reject();
        }
    }

    /// Writes every pending change in one batch. Returns the number of
    /// mutations written. On failure all pending changes are rejected and
    /// the store is left as it was.
    pub async fn save_changes(&mut self) -> Result<usize, RepositoryError> {
        match self.flush().await {
            Ok(written) => {
                if written > 0 {
                    debug!(
                        written,
                        transaction = ?self.transaction_id(),
                        "saved changes"
                    );
                }
                Ok(written)
            }
            Err(err) => {
                self.reject_changes();
                debug!(error = %err, "save failed, pending changes rejected");
                Err(err)
            }
        }
    }

    async fn flush(&mut self) -> Result<usize, RepositoryError> {
        let tx = self.transaction_id();
        let mut batch = WriteBatch::new();

        for set in self.sets.values_mut() {
            if !set.has_changes() {
                continue;
            }
            let unkeyed = set.unkeyed();
            let mut sequences = Vec::with_capacity(unkeyed);
            let reserved = if unkeyed > 0 { set.caller_keys() } else { Default::default() };
            while sequences.len() < unkeyed {
                let next = self.store.next_sequence(set.collection()).await?;
                if !reserved.contains(&next.to_string()) {
                    sequences.push(next);
                }
            }
            set.prepare(sequences, &mut batch)?;
        }

        let written = batch.len();
        let rows = if batch.is_empty() {
            Vec::new()
        } else {
            self.store.apply(tx, batch).await?
        };

        for set in self.sets.values_mut() {
            if set.has_changes() {
                set.accept(&rows)?;
            }
        }
        Ok(written)
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(|active| active.id)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Opens a transaction scope. If one is already open, the returned guard
    /// joins it instead of opening a second one.
    ///
    /// The guard dereferences to this context. Dropping it without
    /// [`Transaction::commit`] rolls back the outermost scope, or marks it
    /// rollback-only when nested.
    pub async fn begin_transaction(&mut self) -> Result<Transaction<'_, S>, RepositoryError> {
        if let Some(active) = self.transaction.as_mut() {
            active.depth += 1;
            trace!(transaction = ?active.id, depth = active.depth, "joined open transaction");
            return Ok(Transaction::new(self, false));
        }

        let id = self.store.begin().await?;
        self.transaction = Some(ActiveTransaction {
            id,
            depth: 1,
            rollback_only: false,
        });
        debug!(transaction = ?id, "transaction started");
        Ok(Transaction::new(self, true))
    }

    pub(crate) fn working_set<R: Record>(&self) -> Option<&WorkingSet<R>> {
        self.sets
            .get(&TypeId::of::<R>())
            .and_then(|set| set.as_any().downcast_ref::<WorkingSet<R>>())
    }

    pub(crate) fn working_set_mut<R: Record>(&mut self) -> &mut WorkingSet<R> {
        self.sets
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(WorkingSet::<R>::new()))
            .as_any_mut()
            .downcast_mut::<WorkingSet<R>>()
            .expect("working sets are keyed by their record TypeId")
    }

    /// Whether a persisted row exists for the key.
    pub(crate) async fn row_exists<R: Record>(&self, key: &R::Key) -> Result<bool, RepositoryError> {
        if key.is_unset() {
            return Ok(false);
        }
        let row = self
            .store
            .row(self.transaction_id(), R::COLLECTION, &key.storage_key())
            .await?;
        Ok(row.is_some())
    }

    /// Existence as seen by Save and Synchronize: a set key that is either
    /// tracked or backed by a persisted row.
    pub(crate) async fn exists_in_store<R: Record>(&self, record: &R) -> Result<bool, RepositoryError> {
        if record.key().is_unset() {
            return Ok(false);
        }
        if self.is_tracked(record) {
            return Ok(true);
        }
        self.row_exists::<R>(record.key()).await
    }

    /// Runs a query against the store and resolves the results through the
    /// working set. With `tracking`, untracked results start being tracked
    /// and tracked ones are returned as the tracked instance.
    pub(crate) async fn load<R: Record>(
        &mut self,
        query: &Query<R>,
        tracking: bool,
    ) -> Result<Vec<R>, RepositoryError> {
        let rows = self
            .store
            .rows(self.transaction_id(), R::COLLECTION)
            .await?;

        let mut matched = Vec::with_capacity(rows.len());
        for row in rows {
            let record: R = serde_json::from_slice(&row.bytes)?;
            let deleting = self
                .working_set::<R>()
                .is_some_and(|set| set.is_deleting(record.key()));
            if !deleting && query.matches(&record) {
                matched.push(record);
            }
        }
        let matched = query.arrange(matched);

        if !tracking {
            return Ok(matched);
        }

        let set = self.working_set_mut::<R>();
        Ok(matched
            .into_iter()
            .map(|record| {
                let index = set.track_unchanged(record);
                set.entry(index).record.clone()
            })
            .collect())
    }

    /// Index of the live entry tracking `key`, loading the row into the
    /// working set if it is not tracked yet. None if the key has no row or a
    /// delete is pending.
    pub(crate) async fn attach_by_key<R: Record>(
        &mut self,
        key: &R::Key,
    ) -> Result<Option<usize>, RepositoryError> {
        if key.is_unset() {
            return Ok(None);
        }
        if let Some(set) = self.working_set::<R>() {
            if let Some(index) = set.position_by_key(key) {
                return Ok(Some(index));
            }
            if set.is_deleting(key) {
                return Ok(None);
            }
        }

        let row = self
            .store
            .row(self.transaction_id(), R::COLLECTION, &key.storage_key())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let record: R = serde_json::from_slice(&row.bytes)?;
        Ok(Some(self.working_set_mut::<R>().track_unchanged(record)))
    }

    /// Point lookup by key. Without `tracking`, returns the stored row as is.
    pub(crate) async fn find_by_key<R: Record>(
        &mut self,
        key: &R::Key,
        tracking: bool,
    ) -> Result<Option<R>, RepositoryError> {
        if tracking {
            let index = self.attach_by_key::<R>(key).await?;
            return Ok(index.and_then(|index| {
                self.working_set::<R>()
                    .map(|set| set.entry(index).record.clone())
            }));
        }

        if key.is_unset() {
            return Ok(None);
        }
        let row = self
            .store
            .row(self.transaction_id(), R::COLLECTION, &key.storage_key())
            .await?;
        row.map(|row| serde_json::from_slice(&row.bytes))
            .transpose()
            .map_err(RepositoryError::from)
    }

    /// The tracked record behind an entry handle.
    pub(crate) fn tracked_record<R: Record>(&self, id: EntryId) -> Option<R> {
        self.working_set::<R>()
            .and_then(|set| set.find(id))
            .map(|entry| entry.record.clone())
    }
}
