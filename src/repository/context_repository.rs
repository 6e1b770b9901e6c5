//! ContextRepository - the CrudRepository backed by a change-tracking context.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{BatchMode, CrudRepository, RepositoryOptions};
use crate::context::{Context, EntryId, Transaction};
use crate::error::RepositoryError;
use crate::policy::{UpdateMode, UpdatePolicy};
use crate::query::Query;
use crate::record::{Record, RecordKey};
use crate::store::Store;
use crate::sync::{self, SynchronizationResult};

/// Typed repository bound to a context for the duration of a borrow.
///
/// Obtained with [`Context::records`] or [`Context::records_with`].
pub struct ContextRepository<'c, S, R> {
    context: &'c mut Context<S>,
    options: RepositoryOptions,
    _marker: PhantomData<R>,
}

impl<'c, S: Store, R: Record> ContextRepository<'c, S, R> {
    pub fn new(context: &'c mut Context<S>, options: RepositoryOptions) -> Self {
        Self {
            context,
            options,
            _marker: PhantomData,
        }
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub(crate) fn context(&mut self) -> &mut Context<S> {
        self.context
    }

    fn tracking(&self, query: &Query<R>) -> bool {
        query.tracking_override().unwrap_or(self.options.tracking)
    }

    fn not_found(key: &R::Key) -> RepositoryError {
        RepositoryError::NotFound {
            collection: R::COLLECTION.to_string(),
            key: key.to_string(),
        }
    }

    fn stage_create(&mut self, record: R) -> Result<EntryId, RepositoryError> {
        let key = record.key();
        if key.is_unset() && !R::Key::is_generated() {
            return Err(RepositoryError::InvalidArgument(format!(
                "{} records need a key before they are created",
                R::COLLECTION
            )));
        }
        let tracked = self
            .context
            .working_set::<R>()
            .and_then(|set| set.position_by_key(key))
            .is_some();
        if tracked {
            return Err(RepositoryError::DuplicateKey {
                collection: R::COLLECTION.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.context.working_set_mut::<R>().track_added(record))
    }

    async fn stage_update(&mut self, record: R) -> Result<EntryId, RepositoryError> {
        let policy = UpdatePolicy::for_record::<R>();

        if self.options.update_mode == UpdateMode::Selective {
            let index = self
                .context
                .attach_by_key::<R>(record.key())
                .await?
                .ok_or_else(|| Self::not_found(record.key()))?;
            let fields = policy.resolve(true)?;
            return Ok(self.context.working_set_mut::<R>().merge(index, &record, &fields));
        }

        let fields = policy.default_fields();
        let tracked = self
            .context
            .working_set::<R>()
            .and_then(|set| set.position(&record));
        if let Some(index) = tracked {
            return Ok(self.context.working_set_mut::<R>().merge(index, &record, &fields));
        }
        if !self.context.row_exists::<R>(record.key()).await? {
            return Err(Self::not_found(record.key()));
        }
        Ok(self.context.working_set_mut::<R>().attach_modified(record, &fields))
    }

    async fn stage_delete_by_id(&mut self, key: &R::Key) -> Result<Option<R>, RepositoryError> {
        let Some(index) = self.context.attach_by_key::<R>(key).await? else {
            return Ok(None);
        };
        Ok(Some(self.context.working_set_mut::<R>().mark_deleted(index)))
    }

    async fn stage_delete(&mut self, record: R) -> Result<Option<R>, RepositoryError> {
        let tracked = self
            .context
            .working_set::<R>()
            .and_then(|set| set.position(&record));
        match tracked {
            Some(index) => Ok(Some(self.context.working_set_mut::<R>().mark_deleted(index))),
            None => self.stage_delete_by_id(record.key()).await,
        }
    }

    /// Flushes staged entries and returns their refreshed tracked records.
    async fn write(&mut self, staged: Vec<EntryId>) -> Result<Vec<R>, RepositoryError> {
        self.context.save_changes().await?;
        Ok(staged
            .into_iter()
            .filter_map(|id| self.context.tracked_record::<R>(id))
            .collect())
    }

    /// Drops whatever a failed batch staged before returning its error.
    fn abandon<T>(&mut self, err: RepositoryError) -> Result<T, RepositoryError> {
        self.context.reject_changes();
        Err(err)
    }

    async fn save_each(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError> {
        let mut saved = Vec::with_capacity(records.len());
        for record in records {
            saved.push(self.save(record).await?);
        }
        Ok(saved)
    }

    async fn delete_each(&mut self, keys: Vec<R::Key>) -> Result<Vec<R>, RepositoryError> {
        let mut removed = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.stage_delete_by_id(key).await {
                Ok(Some(record)) => removed.push(record),
                Ok(None) => {}
                Err(err) => return self.abandon(err),
            }
        }
        self.context.save_changes().await?;
        Ok(removed)
    }
}

/// Commits the transaction if the work succeeded, rolls it back otherwise.
async fn finish<S: Store, T>(
    tx: Transaction<'_, S>,
    outcome: Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed batch failed");
            }
            Err(err)
        }
    }
}

fn single<R: Record>(mut records: Vec<R>, key: String) -> Result<R, RepositoryError> {
    records.pop().ok_or_else(|| RepositoryError::NotFound {
        collection: R::COLLECTION.to_string(),
        key,
    })
}

#[async_trait]
impl<S: Store, R: Record> CrudRepository<R> for ContextRepository<'_, S, R> {
    async fn get_all(&mut self) -> Result<Vec<R>, RepositoryError> {
        self.query(Query::new()).await
    }

    async fn get_by_id(&mut self, key: &R::Key) -> Result<Option<R>, RepositoryError> {
        let tracking = self.options.tracking;
        self.context.find_by_key::<R>(key, tracking).await
    }

    async fn query(&mut self, query: Query<R>) -> Result<Vec<R>, RepositoryError> {
        let tracking = self.tracking(&query);
        self.context.load(&query, tracking).await
    }

    async fn query_single(&mut self, query: Query<R>) -> Result<Option<R>, RepositoryError> {
        let found = self.query(query.first()).await?;
        Ok(found.into_iter().next())
    }

    async fn create(&mut self, record: R) -> Result<R, RepositoryError> {
        let key = record.key().to_string();
        let created = self.create_many(vec![record]).await?;
        single(created, key)
    }

    async fn create_many(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            match self.stage_create(record) {
                Ok(id) => staged.push(id),
                Err(err) => return self.abandon(err),
            }
        }
        let created = self.write(staged).await?;
        debug!(collection = R::COLLECTION, count = created.len(), "created records");
        Ok(created)
    }

    async fn update(&mut self, record: R) -> Result<R, RepositoryError> {
        let key = record.key().to_string();
        let updated = self.update_many(vec![record]).await?;
        single(updated, key)
    }

    async fn update_many(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            match self.stage_update(record).await {
                Ok(id) => staged.push(id),
                Err(err) => return self.abandon(err),
            }
        }
        let updated = self.write(staged).await?;
        debug!(
            collection = R::COLLECTION,
            count = updated.len(),
            mode = ?self.options.update_mode,
            "updated records"
        );
        Ok(updated)
    }

    async fn save(&mut self, record: R) -> Result<R, RepositoryError> {
        if self.context.exists_in_store(&record).await? {
            self.update(record).await
        } else {
            self.create(record).await
        }
    }

    async fn save_many(&mut self, records: Vec<R>, mode: BatchMode) -> Result<Vec<R>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        match mode {
            BatchMode::Sequential => self.save_each(records).await,
            BatchMode::Atomic => {
                let options = self.options.clone();
                let mut tx = self.context.begin_transaction().await?;
                let outcome = ContextRepository::<S, R>::new(&mut tx, options)
                    .save_each(records)
                    .await;
                finish(tx, outcome).await
            }
        }
    }

    async fn delete(&mut self, record: R) -> Result<Option<R>, RepositoryError> {
        let removed = self.stage_delete(record).await?;
        if removed.is_some() {
            self.context.save_changes().await?;
        }
        Ok(removed)
    }

    async fn delete_many(&mut self, records: Vec<R>) -> Result<Vec<R>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(records.len());
        for record in records {
            match self.stage_delete(record).await {
                Ok(Some(record)) => removed.push(record),
                Ok(None) => {}
                Err(err) => return self.abandon(err),
            }
        }
        self.context.save_changes().await?;
        Ok(removed)
    }

    async fn delete_by_id(&mut self, key: &R::Key) -> Result<Option<R>, RepositoryError> {
        let removed = self.stage_delete_by_id(key).await?;
        if removed.is_some() {
            self.context.save_changes().await?;
        }
        Ok(removed)
    }

    async fn delete_many_by_id(&mut self, keys: Vec<R::Key>) -> Result<Vec<R>, RepositoryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.delete_each(keys).await
    }

    async fn synchronize(
        &mut self,
        source: Query<R>,
        desired: Vec<R>,
        mode: BatchMode,
    ) -> Result<SynchronizationResult<R>, RepositoryError> {
        match mode {
            BatchMode::Sequential => sync::reconcile(self, source, desired).await,
            BatchMode::Atomic => {
                let options = self.options.clone();
                let mut tx = self.context.begin_transaction().await?;
                let outcome = {
                    let mut inner = ContextRepository::<S, R>::new(&mut tx, options);
                    sync::reconcile(&mut inner, source, desired).await
                };
                finish(tx, outcome).await
            }
        }
    }
}
