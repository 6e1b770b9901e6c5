use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use super::Context;
use crate::error::RepositoryError;
use crate::store::Store;

/// Guard over an open transaction scope.
///
/// Dereferences to the [`Context`], so repositories are obtained from the
/// guard while it is alive. Finish it with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); dropping it unfinished rolls back.
pub struct Transaction<'c, S: Store> {
    context: &'c mut Context<S>,
    owner: bool,
    finished: bool,
}

impl<'c, S: Store> Transaction<'c, S> {
    pub(super) fn new(context: &'c mut Context<S>, owner: bool) -> Self {
        Self {
            context,
            owner,
            finished: false,
        }
    }

    /// True if this guard joined a scope opened by an outer guard.
    pub fn is_nested(&self) -> bool {
        !self.owner
    }

    /// Commits the scope. Nested guards only hand control back to the outer
    /// scope; the owning guard commits the store transaction, unless an inner
    /// scope was abandoned, in which case everything is rolled back.
    pub async fn commit(mut self) -> Result<(), RepositoryError> {
        self.finished = true;

        if !self.owner {
            if let Some(active) = self.context.transaction.as_mut() {
                active.depth -= 1;
            }
            return Ok(());
        }

        let Some(active) = self.context.transaction.take() else {
            return Err(RepositoryError::TransactionAborted(
                "no transaction is open".to_string(),
            ));
        };

        if active.rollback_only {
            self.context.detach_all();
            self.context.store.rollback(active.id).await?;
            warn!(transaction = ?active.id, "inner scope abandoned, transaction rolled back");
            return Err(RepositoryError::TransactionAborted(
                "an inner scope ended without commit".to_string(),
            ));
        }

        if let Err(err) = self.context.store.commit(active.id).await {
            self.context.detach_all();
            if let Err(rollback) = self.context.store.rollback(active.id).await {
                warn!(
                    transaction = ?active.id,
                    error = %rollback,
                    "rollback after failed commit failed"
                );
            }
            return Err(err.into());
        }
        debug!(transaction = ?active.id, "transaction committed");
        Ok(())
    }

    /// Rolls the scope back. A nested rollback dooms the outer scope.
    pub async fn rollback(mut self) -> Result<(), RepositoryError> {
        self.finished = true;

        if !self.owner {
            if let Some(active) = self.context.transaction.as_mut() {
                active.depth -= 1;
                active.rollback_only = true;
            }
            return Ok(());
        }

        let Some(active) = self.context.transaction.take() else {
            return Ok(());
        };
        self.context.detach_all();
        self.context.store.rollback(active.id).await?;
        debug!(transaction = ?active.id, "transaction rolled back");
        Ok(())
    }
}

impl<S: Store> Deref for Transaction<'_, S> {
    type Target = Context<S>;

    fn deref(&self) -> &Context<S> {
        self.context
    }
}

impl<S: Store> DerefMut for Transaction<'_, S> {
    fn deref_mut(&mut self) -> &mut Context<S> {
        self.context
    }
}

impl<S: Store> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if !self.owner {
            if let Some(active) = self.context.transaction.as_mut() {
                active.depth -= 1;
                active.rollback_only = true;
            }
            return;
        }

        if let Some(active) = self.context.transaction.take() {
            self.context.store.start_rollback(active.id);
            self.context.detach_all();
            warn!(transaction = ?active.id, "transaction dropped without commit, rolled back");
        }
    }
}
