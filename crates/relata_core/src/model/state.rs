//! Public lifecycle state of a domain object inside one transaction.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Transaction-scoped object state.
///
/// Transitions:
/// - `NotLoadedYet -> Unchanged | New`
/// - `Unchanged <-> Changed`
/// - `Unchanged | Changed | New -> Deleted`
/// - `Deleted -> Unchanged` (rollback) or `Deleted -> Invalid` (commit)
/// - `New -> Invalid` (delete or rollback)
///
/// `Invalid` is terminal within the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    NotLoadedYet,
    New,
    Unchanged,
    Changed,
    Deleted,
    Invalid,
}

impl ObjectState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotLoadedYet => "not_loaded_yet",
            Self::New => "new",
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Deleted => "deleted",
            Self::Invalid => "invalid",
        }
    }

    /// Whether commit has to hand this object to the persistence layer.
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::New | Self::Changed | Self::Deleted)
    }
}

impl Display for ObjectState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
