//! Transaction-independent object handle.
//!
//! # Invariants
//! - Identity is global: two handles with equal `ObjectId` denote the same object.
//! - A handle carries no state; every read goes through a transaction.

use crate::model::object_id::ObjectId;
use std::fmt::{Display, Formatter};

/// Handle to one mapped business object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainObject {
    id: ObjectId,
}

impl DomainObject {
    pub fn new(id: ObjectId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn class_id(&self) -> &str {
        self.id.class_id()
    }
}

impl From<ObjectId> for DomainObject {
    fn from(value: ObjectId) -> Self {
        Self::new(value)
    }
}

impl Display for DomainObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
