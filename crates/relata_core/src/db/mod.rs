//! Object-store database shared by every mapped class.
//!
//! One SQLite file holds the whole store: `objects` has one row per object
//! (scalar payload plus optimistic-locking timestamp) and `object_references`
//! has one row per non-null foreign key so related-object queries stay indexed.
//! The schema version lives in `PRAGMA user_version`.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failures while opening, migrating or querying the object store.
#[derive(Debug)]
pub enum DbError {
    /// SQLite could not open or create the store file.
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    /// A schema step failed; the store keeps its previous version.
    Migration { version: u32, source: rusqlite::Error },
    /// The store was written by a newer build.
    SchemaTooNew { found: u32, supported: u32 },
    /// The connection was handed over without being migrated.
    SchemaMismatch { found: u32, expected: u32 },
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "cannot open object store at `{}`: {source}", path.display())
            }
            Self::Migration { version, source } => {
                write!(f, "object store schema step {version} failed: {source}")
            }
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "object store schema version {found} is newer than this build supports ({supported})"
            ),
            Self::SchemaMismatch { found, expected } => write!(
                f,
                "object store is at schema version {found}, expected {expected}"
            ),
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } | Self::SchemaMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
