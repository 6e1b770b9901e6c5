mod record;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Record)] derive macro
// ============================================================================

/// Derive macro for the `Record` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Record)]
/// #[record(collection = "authors")]
/// struct Author {
///     #[record(key)]
///     pub id: i64,
///     #[record(updatable)]
///     pub name: String,
///     #[record(ignore_on_update)]
///     pub created_by: String,
///     #[serde(skip)]
///     pub books: Vec<Book>,
/// }
/// ```
///
/// Type attributes:
/// - `#[record(collection = "...")]` sets the collection name.
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[record(updatable)]` makes every field updatable by selective updates.
///
/// Field attributes:
/// - `#[record(key)]` marks the key field. If omitted, defaults to a field named `id`.
/// - `#[record(updatable)]` adds the field to the selective-update allow-list.
/// - `#[record(ignore_on_update)]` keeps the field out of every update.
///
/// Fields skipped by serde (`#[serde(skip)]`) are not persisted and are left
/// out of the field list. Serde renames are honoured for column names.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    record::expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
