//! Records - typed entities persisted through a context.
//!
//! A record has a key, a collection name, and a static list of the fields
//! an update is allowed to write. The `Record` derive generates all of it:
//!
//! ```ignore
//! use tracked_rust::Record;
//!
//! #[derive(Clone, Serialize, Deserialize, Record)]
//! #[record(collection = "users")]
//! struct User {
//!     #[record(key)]
//!     pub email: String,
//!     pub name: String,
//!     #[record(ignore_on_update)]
//!     pub created_by: String,
//! }
//! ```

mod key;

use serde::{de::DeserializeOwned, Serialize};

pub use key::RecordKey;

/// Static description of one persisted, non-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// The Rust field name.
    pub name: &'static str,
    /// The serialized name, as written to the store.
    pub column: &'static str,
    /// Marked `#[record(updatable)]`.
    pub updatable: bool,
    /// Marked `#[record(ignore_on_update)]`.
    pub ignore_on_update: bool,
}

impl Field {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            column: name,
            updatable: false,
            ignore_on_update: false,
        }
    }

    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    pub const fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub const fn ignore_on_update(mut self) -> Self {
        self.ignore_on_update = true;
        self
    }
}

/// Trait for types that can be stored as records.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The key type. Its `Default` value means "not persisted yet".
    type Key: RecordKey;

    /// The collection name for this record type (e.g., "authors", "user_items").
    /// Maps to a table in SQL, a collection in MongoDB, a key prefix in KV stores, etc.
    const COLLECTION: &'static str;

    /// Type-level `#[record(updatable)]`: selective updates write every field.
    const FULLY_UPDATABLE: bool = false;

    /// Every persisted field except the key, in declaration order.
    const FIELDS: &'static [Field];

    fn key(&self) -> &Self::Key;

    fn set_key(&mut self, key: Self::Key);

    /// Copies the named field from `source` into `self`.
    /// Returns false if no field has that name.
    fn copy_field(&mut self, source: &Self, field: &str) -> bool;

    /// Looks up a field descriptor by Rust name.
    fn field(name: &str) -> Option<&'static Field> {
        Self::FIELDS.iter().find(|field| field.name == name)
    }
}

/// The key under which a record's row is addressed in the store.
pub(crate) fn storage_key<R: Record>(record: &R) -> String {
    record.key().storage_key()
}
