//! Record types shared by the integration suites.

use serde::{Deserialize, Serialize};
use tracked_rust::Record;

/// Integer key assigned by the store; `books` is never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Record)]
#[record(collection = "authors")]
pub struct Author {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[record(ignore_on_update)]
    pub created_by: String,
    #[serde(skip)]
    pub books: Vec<Book>,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_by: "seed".to_string(),
            ..Self::default()
        }
    }

    pub fn with_id(id: i64, name: &str) -> Self {
        Self {
            id,
            ..Self::new(name)
        }
    }

    pub fn in_country(mut self, country: &str) -> Self {
        self.country = country.to_string();
        self
    }
}

/// Selective updates write `title` and `pages` only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Record)]
pub struct Book {
    pub id: i64,
    #[record(updatable)]
    pub title: String,
    #[record(updatable)]
    pub pages: u32,
    pub author_id: i64,
    #[record(ignore_on_update)]
    pub isbn: String,
}

impl Book {
    pub fn new(title: &str, author_id: i64) -> Self {
        Self {
            title: title.to_string(),
            pages: 100,
            author_id,
            isbn: format!("isbn-{}", title),
            ..Self::default()
        }
    }
}

/// Natural string key, updatable as a whole.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Record)]
#[record(collection = "profiles", updatable)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[record(key)]
    pub handle: String,
    pub display_name: String,
    pub bio: String,
    #[record(ignore_on_update)]
    pub joined_on: String,
}

impl Profile {
    pub fn new(handle: &str, display_name: &str) -> Self {
        Self {
            handle: handle.to_string(),
            display_name: display_name.to_string(),
            bio: String::new(),
            joined_on: "2024-01-01".to_string(),
        }
    }
}

/// Natural string key without update markers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Record)]
pub struct Setting {
    #[record(key)]
    pub name: String,
    pub value: String,
}

impl Setting {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// `body` is left out of the row while it is `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Record)]
pub struct Note {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Note {
    pub fn new(body: &str) -> Self {
        Self {
            id: 0,
            body: Some(body.to_string()),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}
