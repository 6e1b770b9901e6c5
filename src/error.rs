use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by repositories, contexts and the registry.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A required input was unusable (e.g. an unset key that the store cannot generate).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Update called for a key with no existing row.
    #[error("no row in {collection} with key {key}")]
    NotFound { collection: String, key: String },

    /// Create called with a key that is already stored or already tracked.
    #[error("duplicate key {key} in {collection}")]
    DuplicateKey { collection: String, key: String },

    /// Selective update requested on a type without any updatable marker.
    #[error("no updatable fields declared on {collection}")]
    NoUpdatableFieldsFound { collection: String },

    /// No repository factory registered for the record type.
    #[error("no repository registered for {collection}")]
    NotRegistered { collection: String },

    /// The transaction was rolled back instead of committed.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("record serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { collection, key } => {
                RepositoryError::DuplicateKey { collection, key }
            }
            StoreError::Missing { collection, key } => RepositoryError::NotFound { collection, key },
            other => RepositoryError::Store(other),
        }
    }
}
