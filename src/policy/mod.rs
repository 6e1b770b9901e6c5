//! Update policy - which fields an update writes back.
//!
//! A type marked `#[record(updatable)]` is updatable as a whole. Otherwise
//! the fields marked `#[record(updatable)]` form the allow-list. Fields marked
//! `#[record(ignore_on_update)]` are never written by an update, whichever
//! rule selected them.

use serde::Deserialize;

use crate::error::RepositoryError;
use crate::record::{Field, Record};

/// How a repository writes an update back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Write every field of the incoming record except `ignore_on_update` ones.
    #[default]
    Tracked,
    /// Reload the persisted record and copy only the updatable fields onto it.
    Selective,
}

/// Fields selected by the updatable markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    All,
    Only(Vec<&'static Field>),
}

/// Update rules of one record type.
#[derive(Debug, Clone, Copy)]
pub struct UpdatePolicy {
    collection: &'static str,
    fully_updatable: bool,
    fields: &'static [Field],
}

impl UpdatePolicy {
    pub fn for_record<R: Record>() -> Self {
        Self {
            collection: R::COLLECTION,
            fully_updatable: R::FULLY_UPDATABLE,
            fields: R::FIELDS,
        }
    }

    /// Fields selected by the updatable markers, before the ignore filter.
    pub fn fields_to_apply(&self) -> Result<FieldSelection, RepositoryError> {
        if self.fully_updatable {
            return Ok(FieldSelection::All);
        }

        let marked: Vec<&'static Field> = self.fields.iter().filter(|field| field.updatable).collect();
        if marked.is_empty() {
            return Err(RepositoryError::NoUpdatableFieldsFound {
                collection: self.collection.to_string(),
            });
        }
        Ok(FieldSelection::Only(marked))
    }

    /// Fields an update writes. `selective` applies the updatable markers;
    /// otherwise every field is a candidate.
    pub fn resolve(&self, selective: bool) -> Result<Vec<&'static Field>, RepositoryError> {
        let selection = if selective {
            self.fields_to_apply()?
        } else {
            FieldSelection::All
        };

        let candidates: Vec<&'static Field> = match selection {
            FieldSelection::All => self.fields.iter().collect(),
            FieldSelection::Only(fields) => fields,
        };
        Ok(candidates
            .into_iter()
            .filter(|field| !field.ignore_on_update)
            .collect())
    }

    /// Fields written by a tracked update: everything but ignored fields.
    pub fn default_fields(&self) -> Vec<&'static Field> {
        self.fields
            .iter()
            .filter(|field| !field.ignore_on_update)
            .collect()
    }
}
