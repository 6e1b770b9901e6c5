//! InMemoryStore - HashMap-backed store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{Mutation, Row, Store, StoreError, TransactionId, WriteBatch};

/// Internal stored representation of a row.
#[derive(Clone)]
struct StoredRow {
    bytes: Vec<u8>,
    version: u64,
    /// Insertion order, used to keep reads stable.
    ordinal: u64,
}

/// Staged writes of one transaction. `None` marks a deleted row.
type Overlay = HashMap<(String, String), Option<StoredRow>>;

#[derive(Default)]
struct State {
    rows: HashMap<String, HashMap<String, StoredRow>>,
    sequences: HashMap<String, u64>,
    transactions: HashMap<TransactionId, Overlay>,
    next_transaction: u64,
    next_ordinal: u64,
}

impl State {
    fn overlay(&self, tx: Option<TransactionId>) -> Result<Option<&Overlay>, StoreError> {
        match tx {
            Some(tx) => self
                .transactions
                .get(&tx)
                .map(Some)
                .ok_or(StoreError::UnknownTransaction(tx)),
            None => Ok(None),
        }
    }

    fn lookup(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        key: &str,
    ) -> Result<Option<&StoredRow>, StoreError> {
        if let Some(overlay) = self.overlay(tx)? {
            if let Some(staged) = overlay.get(&(collection.to_string(), key.to_string())) {
                return Ok(staged.as_ref());
            }
        }
        Ok(self.rows.get(collection).and_then(|rows| rows.get(key)))
    }

    fn visible(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
    ) -> Result<Vec<(String, StoredRow)>, StoreError> {
        let mut merged = self.rows.get(collection).cloned().unwrap_or_default();

        if let Some(overlay) = self.overlay(tx)? {
            for ((staged_collection, key), staged) in overlay {
                if staged_collection != collection {
                    continue;
                }
                match staged {
                    Some(row) => {
                        merged.insert(key.clone(), row.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }

        let mut rows: Vec<_> = merged.into_iter().collect();
        rows.sort_by_key(|(_, row)| row.ordinal);
        Ok(rows)
    }

    fn write(&mut self, staged: Overlay) {
        for ((collection, key), row) in staged {
            match row {
                Some(row) => {
                    self.rows.entry(collection).or_default().insert(key, row);
                }
                None => {
                    if let Some(rows) = self.rows.get_mut(&collection) {
                        rows.remove(&key);
                    }
                }
            }
        }
    }

    fn max_numeric_key(&self, collection: &str) -> u64 {
        let committed = self
            .rows
            .get(collection)
            .into_iter()
            .flat_map(|rows| rows.keys());
        let staged = self
            .transactions
            .values()
            .flat_map(|overlay| overlay.iter())
            .filter(|((staged_collection, _), row)| staged_collection == collection && row.is_some())
            .map(|((_, key), _)| key);

        committed
            .chain(staged)
            .filter_map(|key| key.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }
}

fn to_row(collection: &str, key: &str, stored: &StoredRow) -> Row {
    Row {
        collection: collection.to_string(),
        key: key.to_string(),
        bytes: stored.bytes.clone(),
        version: stored.version,
    }
}

fn patch_bytes(
    bytes: &[u8],
    fields: serde_json::Map<String, Value>,
    unset: Vec<String>,
) -> Result<Vec<u8>, StoreError> {
    let mut value: Value =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Encoding(e.to_string()))?;
    let Value::Object(object) = &mut value else {
        return Err(StoreError::Encoding("stored row is not an object".into()));
    };
    for column in unset {
        object.remove(&column);
    }
    for (column, field) in fields {
        object.insert(column, field);
    }
    serde_json::to_vec(&value).map_err(|e| StoreError::Encoding(e.to_string()))
}

/// In-memory store backed by a HashMap per collection.
///
/// Transactions stage their writes in an overlay that is merged on commit
/// (last committer wins). Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open transactions.
    pub fn open_transactions(&self) -> Result<usize, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.transactions.len())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn rows(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
    ) -> Result<Vec<Row>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        Ok(state
            .visible(tx, collection)?
            .iter()
            .map(|(key, stored)| to_row(collection, key, stored))
            .collect())
    }

    async fn row(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        key: &str,
    ) -> Result<Option<Row>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        Ok(state
            .lookup(tx, collection, key)?
            .map(|stored| to_row(collection, key, stored)))
    }

    async fn next_sequence(&self, collection: &str) -> Result<u64, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("sequence"))?;

        let max_key = state.max_numeric_key(collection);
        let counter = state.sequences.entry(collection.to_string()).or_insert(0);
        *counter = (*counter).max(max_key) + 1;
        Ok(*counter)
    }

    async fn apply(
        &self,
        tx: Option<TransactionId>,
        batch: WriteBatch,
    ) -> Result<Vec<Row>, StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let state = &mut *guard;
        state.overlay(tx)?;

        let mut staged: Overlay = HashMap::new();
        let mut written = Vec::new();

        for mutation in batch {
            let collection = mutation.collection();
            let key = mutation.key().to_string();
            let slot = (collection.to_string(), key.clone());
            let current = match staged.get(&slot) {
                Some(row) => row.clone(),
                None => state.lookup(tx, collection, &key)?.cloned(),
            };

            match mutation {
                Mutation::Insert { bytes, .. } => {
                    if current.is_some() {
                        return Err(StoreError::DuplicateKey {
                            collection: collection.to_string(),
                            key,
                        });
                    }
                    state.next_ordinal += 1;
                    let row = StoredRow {
                        bytes,
                        version: 1,
                        ordinal: state.next_ordinal,
                    };
                    written.push(to_row(collection, &key, &row));
                    staged.insert(slot, Some(row));
                }
                Mutation::Patch { fields, unset, .. } => {
                    let Some(mut row) = current else {
                        return Err(StoreError::Missing {
                            collection: collection.to_string(),
                            key,
                        });
                    };
                    row.bytes = patch_bytes(&row.bytes, fields, unset)?;
                    row.version += 1;
                    written.push(to_row(collection, &key, &row));
                    staged.insert(slot, Some(row));
                }
                Mutation::Delete { .. } => {
                    if current.is_none() {
                        return Err(StoreError::Missing {
                            collection: collection.to_string(),
                            key,
                        });
                    }
                    staged.insert(slot, None);
                }
            }
        }

        match tx {
            Some(tx) => {
                let overlay = state
                    .transactions
                    .get_mut(&tx)
                    .ok_or(StoreError::UnknownTransaction(tx))?;
                overlay.extend(staged);
            }
            None => state.write(staged),
        }

        Ok(written)
    }

    async fn begin(&self) -> Result<TransactionId, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("begin"))?;

        state.next_transaction += 1;
        let tx = TransactionId(state.next_transaction);
        state.transactions.insert(tx, Overlay::new());
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionId) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        let overlay = state
            .transactions
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        state.write(overlay);
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("rollback"))?;

        state
            .transactions
            .remove(&tx)
            .map(|_| ())
            .ok_or(StoreError::UnknownTransaction(tx))
    }

    fn start_rollback(&self, tx: TransactionId) {
        if let Ok(mut state) = self.state.write() {
            state.transactions.remove(&tx);
        }
    }
}
