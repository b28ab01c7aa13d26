//! Persistence provider contract and reference implementations.
//!
//! # Responsibility
//! - Define the storage boundary consumed by transactions.
//! - Isolate storage details (SQLite, in-memory) from the unit-of-work engine.
//!
//! # Invariants
//! - `save` is all-or-nothing: a concurrency violation leaves storage untouched.
//! - Every saved `New`/`Changed` record receives a fresh timestamp.
//! - Providers return semantic errors (`ConcurrencyViolation`) in addition to
//!   transport errors.

use crate::db::DbError;
use crate::mapping::{ResolvedClass, SortExpression};
use crate::model::object_id::ObjectId;
use crate::model::property_values::{PropertyValues, Timestamp};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory_provider;
pub mod sqlite_provider;

pub use memory_provider::{InMemoryPersistenceProvider, ProviderStats};
pub use sqlite_provider::SqlitePersistenceProvider;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Persistence-layer errors.
#[derive(Debug)]
pub enum ProviderError {
    Db(DbError),
    /// Persisted timestamps no longer match for these objects.
    ConcurrencyViolation(Vec<ObjectId>),
    /// A `New` record collides with an existing row.
    DuplicateObject(ObjectId),
    InvalidData(String),
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ConcurrencyViolation(ids) => write!(
                f,
                "concurrency violation for objects: {}",
                join_ids(ids)
            ),
            Self::DuplicateObject(id) => write!(f, "object already persisted: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted object data: {message}"),
        }
    }
}

impl Error for ProviderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ProviderError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ProviderError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn join_ids(ids: &[ObjectId]) -> String {
    ids.iter()
        .map(ObjectId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One persisted row as returned by a load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRecord {
    pub id: ObjectId,
    pub timestamp: Timestamp,
    pub values: PropertyValues,
}

/// Save action for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    New,
    Changed,
    Deleted,
}

/// One container handed to `save`.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistableRecord {
    pub id: ObjectId,
    pub state: PersistState,
    pub values: PropertyValues,
    /// Timestamp the object was loaded with; `None` for new objects.
    pub timestamp: Option<Timestamp>,
}

/// Query for objects whose foreign key points at `related_id`.
#[derive(Debug, Clone, Copy)]
pub struct RelatedObjectsQuery<'a> {
    /// Class declaring the foreign key and all classes derived from it.
    pub classes: &'a [String],
    /// Foreign-key property name.
    pub property: &'a str,
    pub related_id: &'a ObjectId,
    pub sort_expression: Option<&'a SortExpression>,
}

impl RelatedObjectsQuery<'_> {
    pub fn matches(&self, id: &ObjectId, values: &PropertyValues) -> bool {
        self.classes.iter().any(|class| class == id.class_id())
            && values.reference(self.property) == Some(self.related_id)
    }
}

/// Storage boundary consumed by the root transaction.
pub trait PersistenceProvider {
    /// Loads one object; `Ok(None)` when the row does not exist.
    fn load_data_container(&self, id: &ObjectId) -> ProviderResult<Option<LoadedRecord>>;

    /// Loads several objects; result order matches `ids`.
    fn load_data_containers(&self, ids: &[ObjectId]) -> ProviderResult<Vec<Option<LoadedRecord>>> {
        ids.iter().map(|id| self.load_data_container(id)).collect()
    }

    /// Loads every object referencing `query.related_id`, in persisted sort order.
    fn load_data_containers_by_related_id(
        &self,
        query: &RelatedObjectsQuery<'_>,
    ) -> ProviderResult<Vec<LoadedRecord>>;

    /// Persists one batch atomically and returns new timestamps of saved rows.
    ///
    /// # Errors
    /// - `ConcurrencyViolation` naming every record whose timestamp is stale.
    fn save(&self, records: &[PersistableRecord]) -> ProviderResult<Vec<(ObjectId, Timestamp)>>;

    /// Allocates the identity of a new object.
    fn create_new_object_id(&self, class: &ResolvedClass) -> ProviderResult<ObjectId>;
}
