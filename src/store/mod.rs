//! Store - the persistence contract behind a context.
//!
//! A store holds serialized rows addressed by `(collection, key)`. It does
//! not track identities or merge field values; that is the context's job.
//! What it must provide is atomic write batches, key sequences, and explicit
//! transactions whose writes are invisible to others until commit.

mod in_memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use in_memory::InMemoryStore;

/// Identifies an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

/// A persisted row as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub collection: String,
    pub key: String,
    /// JSON-serialized record
    pub bytes: Vec<u8>,
    pub version: u64,
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert a new row. Fails if the key is taken.
    Insert {
        collection: &'static str,
        key: String,
        bytes: Vec<u8>,
    },
    /// Overwrite the listed columns of an existing row and drop the `unset`
    /// ones. Fails if the row is missing.
    Patch {
        collection: &'static str,
        key: String,
        fields: Map<String, Value>,
        unset: Vec<String>,
    },
    /// Remove an existing row. Fails if the row is missing.
    Delete {
        collection: &'static str,
        key: String,
    },
}

impl Mutation {
    pub fn collection(&self) -> &'static str {
        match self {
            Mutation::Insert { collection, .. }
            | Mutation::Patch { collection, .. }
            | Mutation::Delete { collection, .. } => collection,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Mutation::Insert { key, .. } | Mutation::Patch { key, .. } | Mutation::Delete { key, .. } => {
                key
            }
        }
    }
}

/// Mutations applied all-or-nothing, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl IntoIterator for WriteBatch {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("duplicate key {collection}:{key}")]
    DuplicateKey { collection: String, key: String },

    #[error("row not found: {collection}:{key}")]
    Missing { collection: String, key: String },

    #[error("unknown transaction {0:?}")]
    UnknownTransaction(TransactionId),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("row encoding error: {0}")]
    Encoding(String),
}

/// Abstract row storage used by a [`Context`](crate::Context).
///
/// Every read and write takes the caller's open transaction, if any, so that
/// it sees its own uncommitted writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// All rows of a collection, in insertion order.
    async fn rows(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
    ) -> Result<Vec<Row>, StoreError>;

    /// A single row. Returns None if not found.
    async fn row(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        key: &str,
    ) -> Result<Option<Row>, StoreError>;

    /// Next value of the collection's key sequence. Never returns a value
    /// that is already used as a numeric key in the collection.
    async fn next_sequence(&self, collection: &str) -> Result<u64, StoreError>;

    /// Apply a batch atomically. Returns the resulting rows of every insert and patch.
    async fn apply(
        &self,
        tx: Option<TransactionId>,
        batch: WriteBatch,
    ) -> Result<Vec<Row>, StoreError>;

    async fn begin(&self) -> Result<TransactionId, StoreError>;

    async fn commit(&self, tx: TransactionId) -> Result<(), StoreError>;

    async fn rollback(&self, tx: TransactionId) -> Result<(), StoreError>;

    /// Discard a transaction without waiting. Called when a transaction guard
    /// is dropped without commit; must not block on I/O.
    fn start_rollback(&self, tx: TransactionId);
}
