use serde::Deserialize;

use crate::policy::UpdateMode;

/// Per-repository behaviour, built in code or deserialized from config.
///
/// ```ignore
/// let options: RepositoryOptions = serde_json::from_str(r#"{ "update_mode": "selective" }"#)?;
/// let mut users = context.records_with::<User>(options);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepositoryOptions {
    pub update_mode: UpdateMode,
    /// Whether reads attach their results to the working set.
    pub tracking: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::Tracked,
            tracking: true,
        }
    }
}

impl RepositoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options of a repository that writes only `#[record(updatable)]` fields.
    pub fn selective() -> Self {
        Self::default().update_mode(UpdateMode::Selective)
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn tracking(mut self, enabled: bool) -> Self {
        self.tracking = enabled;
        self
    }
}

/// How a multi-record operation commits. Always chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Each step commits on its own; the first failure stops the batch and
    /// earlier steps stay written.
    Sequential,
    /// The whole batch runs in one transaction.
    Atomic,
}
