//! Registry - routes record operations to the repository registered for
//! the record's type.
//!
//! The registry is an ordinary value owned by the application and passed by
//! reference; nothing is registered globally.
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.register_default::<Author>(RepositoryOptions::default());
//!
//! let author = author.save_with(&registry, &mut context).await?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::RepositoryError;
use crate::record::Record;
use crate::repository::{BatchMode, ContextRepository, CrudRepository, RepositoryOptions};
use crate::store::Store;

/// Builds the repository used for one record type.
pub trait RepositoryFactory<S: Store, R: Record>: Send + Sync {
    fn repository<'c>(&self, context: &'c mut Context<S>) -> Box<dyn CrudRepository<R> + 'c>;
}

/// Options register the default context-backed repository.
impl<S: Store + 'static, R: Record> RepositoryFactory<S, R> for RepositoryOptions {
    fn repository<'c>(&self, context: &'c mut Context<S>) -> Box<dyn CrudRepository<R> + 'c> {
        Box::new(ContextRepository::new(context, self.clone()))
    }
}

struct Registration {
    collection: &'static str,
    /// `Arc<dyn RepositoryFactory<S, R>>` for the registered `R`.
    factory: Box<dyn Any + Send + Sync>,
}

/// Record type to repository factory map.
pub struct Registry<S> {
    registrations: HashMap<TypeId, Registration>,
    _store: PhantomData<fn() -> S>,
}

impl<S: Store + 'static> Registry<S> {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
            _store: PhantomData,
        }
    }

    /// Registers the factory for `R`, replacing any earlier registration.
    pub fn register<R, F>(&mut self, factory: F) -> &mut Self
    where
        R: Record,
        F: RepositoryFactory<S, R> + 'static,
    {
        let factory: Arc<dyn RepositoryFactory<S, R>> = Arc::new(factory);
        let replaced = self
            .registrations
            .insert(
                TypeId::of::<R>(),
                Registration {
                    collection: R::COLLECTION,
                    factory: Box::new(factory),
                },
            )
            .is_some();
        debug!(collection = R::COLLECTION, replaced, "repository registered");
        self
    }

    /// Registers the context-backed repository for `R`.
    pub fn register_default<R: Record>(&mut self, options: RepositoryOptions) -> &mut Self {
        self.register::<R, _>(options)
    }

    pub fn is_registered<R: Record>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<R>())
    }

    /// Collections with a registered repository, sorted.
    pub fn collections(&self) -> Vec<&'static str> {
        let mut collections: Vec<_> = self
            .registrations
            .values()
            .map(|registration| registration.collection)
            .collect();
        collections.sort_unstable();
        collections
    }

    /// Removes every registration.
    pub fn reset(&mut self) {
        self.registrations.clear();
    }

    fn factory<R: Record>(&self) -> Result<&Arc<dyn RepositoryFactory<S, R>>, RepositoryError> {
        self.registrations
            .get(&TypeId::of::<R>())
            .and_then(|registration| {
                registration
                    .factory
                    .downcast_ref::<Arc<dyn RepositoryFactory<S, R>>>()
            })
            .ok_or_else(|| RepositoryError::NotRegistered {
                collection: R::COLLECTION.to_string(),
            })
    }

    /// The registered repository for `R`, bound to `context`.
    pub fn repository<'c, R: Record>(
        &self,
        context: &'c mut Context<S>,
    ) -> Result<Box<dyn CrudRepository<R> + 'c>, RepositoryError> {
        Ok(self.factory::<R>()?.repository(context))
    }

    pub async fn create<R: Record>(&self, context: &mut Context<S>, record: R) -> Result<R, RepositoryError> {
        self.repository::<R>(context)?.create(record).await
    }

    pub async fn create_many<R: Record>(
        &self,
        context: &mut Context<S>,
        records: Vec<R>,
    ) -> Result<Vec<R>, RepositoryError> {
        self.repository::<R>(context)?.create_many(records).await
    }

    pub async fn update<R: Record>(&self, context: &mut Context<S>, record: R) -> Result<R, RepositoryError> {
        self.repository::<R>(context)?.update(record).await
    }

    pub async fn update_many<R: Record>(
        &self,
        context: &mut Context<S>,
        records: Vec<R>,
    ) -> Result<Vec<R>, RepositoryError> {
        self.repository::<R>(context)?.update_many(records).await
    }

    pub async fn save<R: Record>(&self, context: &mut Context<S>, record: R) -> Result<R, RepositoryError> {
        self.repository::<R>(context)?.save(record).await
    }

    pub async fn save_many<R: Record>(
        &self,
        context: &mut Context<S>,
        records: Vec<R>,
        mode: BatchMode,
    ) -> Result<Vec<R>, RepositoryError> {
        self.repository::<R>(context)?.save_many(records, mode).await
    }

    pub async fn delete<R: Record>(
        &self,
        context: &mut Context<S>,
        record: R,
    ) -> Result<Option<R>, RepositoryError> {
        self.repository::<R>(context)?.delete(record).await
    }

    pub async fn delete_many<R: Record>(
        &self,
        context: &mut Context<S>,
        records: Vec<R>,
    ) -> Result<Vec<R>, RepositoryError> {
        self.repository::<R>(context)?.delete_many(records).await
    }
}

impl<S: Store + 'static> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets a record route its own persistence through a registry.
#[async_trait]
pub trait RecordExt: Record {
    async fn create_with<S: Store + 'static>(
        self,
        registry: &Registry<S>,
        context: &mut Context<S>,
    ) -> Result<Self, RepositoryError> {
        registry.create(context, self).await
    }

    async fn update_with<S: Store + 'static>(
        self,
        registry: &Registry<S>,
        context: &mut Context<S>,
    ) -> Result<Self, RepositoryError> {
        registry.update(context, self).await
    }

    async fn save_with<S: Store + 'static>(
        self,
        registry: &Registry<S>,
        context: &mut Context<S>,
    ) -> Result<Self, RepositoryError> {
        registry.save(context, self).await
    }

    async fn delete_with<S: Store + 'static>(
        self,
        registry: &Registry<S>,
        context: &mut Context<S>,
    ) -> Result<Option<Self>, RepositoryError> {
        registry.delete(context, self).await
    }
}

impl<R: Record> RecordExt for R {}
