//! RecordKey - key types and their "unset" sentinel.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::{de::DeserializeOwned, Serialize};

/// A record key.
///
/// The `Default` value is the unset sentinel: a record carrying it has never
/// been persisted and never matches another record by key.
pub trait RecordKey:
    Default + Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn is_unset(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the store may generate values of this key type.
    fn is_generated() -> bool {
        false
    }

    /// Converts a store sequence value into a key. `None` for caller-assigned key types.
    fn from_sequence(_value: u64) -> Option<Self> {
        None
    }

    /// The string form used to address the row in the store.
    fn storage_key(&self) -> String {
        self.to_string()
    }
}

macro_rules! impl_sequence_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RecordKey for $ty {
                fn is_generated() -> bool {
                    true
                }

                fn from_sequence(value: u64) -> Option<Self> {
                    <$ty>::try_from(value).ok()
                }
            }
        )*
    };
}

impl_sequence_key!(i16, i32, i64, u16, u32, u64, usize);

impl RecordKey for String {}
