//! Object identity.
//!
//! # Responsibility
//! - Define the immutable `ObjectId` used as identity-map key.
//! - Provide a stable storage encoding for keys.
//!
//! # Invariants
//! - An `ObjectId` never changes after construction.
//! - Two ids are equal iff class id and key are equal.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Value-type-specific part of an object identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ObjectKey {
    Guid(Uuid),
    Int(i64),
    Text(String),
}

impl ObjectKey {
    /// Encodes the key as `kind:value` for storage columns.
    pub fn to_storage_string(&self) -> String {
        match self {
            Self::Guid(value) => format!("guid:{value}"),
            Self::Int(value) => format!("int:{value}"),
            Self::Text(value) => format!("text:{value}"),
        }
    }

    /// Parses the `kind:value` storage form.
    pub fn parse_storage_string(value: &str) -> Option<Self> {
        let (kind, raw) = value.split_once(':')?;
        match kind {
            "guid" => Uuid::parse_str(raw).ok().map(Self::Guid),
            "int" => raw.parse::<i64>().ok().map(Self::Int),
            "text" => Some(Self::Text(raw.to_string())),
            _ => None,
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

/// Immutable identity of one mapped object: (class id, key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    class_id: String,
    key: ObjectKey,
}

impl ObjectId {
    pub fn new(class_id: impl Into<String>, key: ObjectKey) -> Self {
        Self {
            class_id: class_id.into(),
            key,
        }
    }

    /// Creates an id with a freshly generated GUID key.
    pub fn new_guid(class_id: impl Into<String>) -> Self {
        Self::new(class_id, ObjectKey::Guid(Uuid::new_v4()))
    }

    pub fn with_int(class_id: impl Into<String>, key: i64) -> Self {
        Self::new(class_id, ObjectKey::Int(key))
    }

    pub fn with_text(class_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(class_id, ObjectKey::Text(key.into()))
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.class_id, self.key)
    }
}
