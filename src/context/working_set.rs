//! WorkingSet - the tracked identity map of one record type.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::RepositoryError;
use crate::record::{storage_key, Field, Record, RecordKey};
use crate::store::{Mutation, Row, WriteBatch};

/// Lifecycle state of a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Pending insert.
    Added,
    /// Matches the persisted row.
    Unchanged,
    /// Pending patch of the entry's modified fields.
    Modified,
    /// Pending delete.
    Deleted,
}

/// Stable handle of an entry; positions shift when deleted entries are dropped.
pub(crate) type EntryId = u64;

pub(crate) struct Entry<R> {
    pub id: EntryId,
    pub record: R,
    pub state: EntryState,
    /// Fields written by the pending patch.
    pub modified: Vec<&'static Field>,
    /// Snapshot taken before the first pending change, restored on reject.
    pub original: Option<R>,
}

pub(crate) struct WorkingSet<R> {
    entries: Vec<Entry<R>>,
    next_id: EntryId,
}

impl<R: Record> WorkingSet<R> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Index of the live entry that is the candidate itself or shares its key.
    pub fn position(&self, candidate: &R) -> Option<usize> {
        let key = candidate.key();
        self.entries.iter().position(|entry| {
            entry.state != EntryState::Deleted
                && (std::ptr::eq(&entry.record, candidate)
                    || (!key.is_unset() && entry.record.key() == key))
        })
    }

    pub fn position_by_key(&self, key: &R::Key) -> Option<usize> {
        if key.is_unset() {
            return None;
        }
        self.entries
            .iter()
            .position(|entry| entry.state != EntryState::Deleted && entry.record.key() == key)
    }

    /// Whether a pending delete exists for the key.
    pub fn is_deleting(&self, key: &R::Key) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.state == EntryState::Deleted && entry.record.key() == key)
    }

    pub fn entry(&self, index: usize) -> &Entry<R> {
        &self.entries[index]
    }

    pub fn find(&self, id: EntryId) -> Option<&Entry<R>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.entries
            .iter()
            .filter(|entry| entry.state != EntryState::Deleted)
            .map(|entry| &entry.record)
    }

    fn push(&mut self, record: R, state: EntryState, modified: Vec<&'static Field>) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            record,
            state,
            modified,
            original: None,
        });
        id
    }

    pub fn track_added(&mut self, record: R) -> EntryId {
        self.push(record, EntryState::Added, Vec::new())
    }

    /// Attaches a detached record as the update target for `fields`.
    pub fn attach_modified(&mut self, record: R, fields: &[&'static Field]) -> EntryId {
        self.push(record, EntryState::Modified, fields.to_vec())
    }

    /// Starts tracking a freshly loaded record, or returns the entry already tracking its key.
    pub fn track_unchanged(&mut self, record: R) -> usize {
        if let Some(index) = self.position_by_key(record.key()) {
            return index;
        }
        self.push(record, EntryState::Unchanged, Vec::new());
        self.entries.len() - 1
    }

    /// Copies `fields` from `source` into the tracked entry and marks them modified.
    pub fn merge(&mut self, index: usize, source: &R, fields: &[&'static Field]) -> EntryId {
        let entry = &mut self.entries[index];
        if entry.original.is_none() && entry.state != EntryState::Added {
            entry.original = Some(entry.record.clone());
        }

        for &field in fields {
            entry.record.copy_field(source, field.name);
            if !entry.modified.iter().any(|modified| modified.name == field.name) {
                entry.modified.push(field);
            }
        }

        if entry.state == EntryState::Unchanged {
            entry.state = EntryState::Modified;
        }
        entry.id
    }

    /// Marks the entry for deletion and returns the tracked record.
    pub fn mark_deleted(&mut self, index: usize) -> R {
        if self.entries[index].state == EntryState::Added {
            return self.entries.remove(index).record;
        }

        let entry = &mut self.entries[index];
        if let Some(original) = entry.original.take() {
            entry.record = original;
        }
        entry.modified.clear();
        entry.state = EntryState::Deleted;
        entry.record.clone()
    }

    /// Splits the modified columns into values to write and columns the
    /// record no longer serializes, such as a cleared `skip_serializing_if` field.
    fn patch_fields(
        record: &R,
        fields: &[&'static Field],
    ) -> Result<(Map<String, Value>, Vec<String>), RepositoryError> {
        let Value::Object(mut object) = serde_json::to_value(record)? else {
            return Err(RepositoryError::InvalidArgument(format!(
                "{} records must serialize to an object",
                R::COLLECTION
            )));
        };

        let mut patch = Map::new();
        let mut unset = Vec::new();
        for field in fields {
            match object.remove(field.column) {
                Some(value) => {
                    patch.insert(field.column.to_string(), value);
                }
                None => unset.push(field.column.to_string()),
            }
        }
        Ok((patch, unset))
    }
}

/// Type-erased view of a working set, used by the context to flush every
/// record type in one batch.
pub(crate) trait TrackedSet: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn collection(&self) -> &'static str;

    fn len(&self) -> usize;

    fn has_changes(&self) -> bool;

    /// Number of added entries waiting for a store-generated key.
    fn unkeyed(&self) -> usize;

    /// Storage keys that added entries bring with them. Generated keys must avoid these.
    fn caller_keys(&self) -> HashSet<String>;

    /// Assigns generated keys and appends this set's pending writes.
    fn prepare(&mut self, sequences: Vec<u64>, batch: &mut WriteBatch) -> Result<(), RepositoryError>;

    /// Refreshes entries from the rows the store wrote and marks them unchanged.
    fn accept(&mut self, rows: &[Row]) -> Result<(), RepositoryError>;

    /// Drops pending inserts and restores modified and deleted entries.
    fn reject(&mut self);
}

impl<R: Record> TrackedSet for WorkingSet<R> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn collection(&self) -> &'static str {
        R::COLLECTION
    }

    fn len(&self) -> usize {
        self.records().count()
    }

    fn has_changes(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.state != EntryState::Unchanged)
    }

    fn unkeyed(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Added && entry.record.key().is_unset())
            .count()
    }

    fn caller_keys(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Added && !entry.record.key().is_unset())
            .map(|entry| storage_key(&entry.record))
            .collect()
    }

    fn prepare(&mut self, sequences: Vec<u64>, batch: &mut WriteBatch) -> Result<(), RepositoryError> {
        let mut sequences = sequences.into_iter();

        for entry in &mut self.entries {
            match entry.state {
                EntryState::Added => {
                    if entry.record.key().is_unset() {
                        let key = sequences
                            .next()
                            .and_then(R::Key::from_sequence)
                            .ok_or_else(|| {
                                RepositoryError::InvalidArgument(format!(
                                    "{} key is unset and cannot be generated",
                                    R::COLLECTION
                                ))
                            })?;
                        entry.record.set_key(key);
                    }
                    batch.push(Mutation::Insert {
                        collection: R::COLLECTION,
                        key: storage_key(&entry.record),
                        bytes: serde_json::to_vec(&entry.record)?,
                    });
                }
                EntryState::Modified => {
                    if entry.modified.is_empty() {
                        continue;
                    }
                    let (fields, unset) = Self::patch_fields(&entry.record, &entry.modified)?;
                    batch.push(Mutation::Patch {
                        collection: R::COLLECTION,
                        key: storage_key(&entry.record),
                        fields,
                        unset,
                    });
                }
                EntryState::Deleted => {
                    batch.push(Mutation::Delete {
                        collection: R::COLLECTION,
                        key: storage_key(&entry.record),
                    });
                }
                EntryState::Unchanged => {}
            }
        }
        Ok(())
    }

    fn accept(&mut self, rows: &[Row]) -> Result<(), RepositoryError> {
        let written: HashMap<&str, &Row> = rows
            .iter()
            .filter(|row| row.collection == R::COLLECTION)
            .map(|row| (row.key.as_str(), row))
            .collect();

        self.entries
            .retain(|entry| entry.state != EntryState::Deleted);

        for entry in &mut self.entries {
            if entry.state == EntryState::Unchanged {
                continue;
            }
            if let Some(row) = written.get(storage_key(&entry.record).as_str()) {
                entry.record = serde_json::from_slice(&row.bytes)?;
            }
            entry.state = EntryState::Unchanged;
            entry.modified.clear();
            entry.original = None;
        }
        Ok(())
    }

    fn reject(&mut self) {
        // Attached detached records have no snapshot to fall back to.
        self.entries.retain(|entry| match entry.state {
            EntryState::Added => false,
            EntryState::Modified => entry.original.is_some(),
            _ => true,
        });

        for entry in &mut self.entries {
            if let Some(original) = entry.original.take() {
                entry.record = original;
            }
            entry.modified.clear();
            entry.state = EntryState::Unchanged;
        }
    }
}
