//! Property value sets exchanged between data containers and providers.

use crate::model::object_id::ObjectId;
use crate::model::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Optimistic-concurrency token assigned by the persistence provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar values plus foreign-key values of one object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyValues {
    pub scalars: BTreeMap<String, Value>,
    /// Foreign keys of real (foreign-key side) relation properties.
    pub references: BTreeMap<String, Option<ObjectId>>,
}

impl PropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scalars.insert(name.into(), value.into());
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>, target: Option<ObjectId>) -> Self {
        self.references.insert(name.into(), target);
        self
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.scalars.get(name)
    }

    /// Returns the foreign key; missing entries read as `None`.
    pub fn reference(&self, name: &str) -> Option<&ObjectId> {
        self.references.get(name).and_then(Option::as_ref)
    }
}
