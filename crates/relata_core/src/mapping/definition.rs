//! Class, property and relation definitions.
//!
//! # Responsibility
//! - Describe the mapped shape of one class as plain data.
//! - Offer small builder helpers for code-first configuration.
//!
//! # Invariants
//! - Definitions are inert until validated by `MappingConfiguration::build`.

use crate::model::value::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// Scalar property definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value assigned to this property on a freshly created object.
    pub fn default_value(&self) -> Value {
        match &self.default {
            Some(value) => value.clone(),
            None if self.nullable => Value::Null,
            None => self.value_type.zero_value(),
        }
    }

    /// Whether `value` may be stored in this property.
    pub fn accepts(&self, value: &Value) -> bool {
        match value.value_type() {
            None => self.nullable,
            Some(kind) => kind == self.value_type,
        }
    }
}

/// Number of related objects on one side of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Whether a relation side holds the foreign key or is derived from the opposite side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndPointStorage {
    ForeignKey,
    Virtual,
}

/// Relation property definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationPropertyDefinition {
    pub name: String,
    pub target_class: String,
    pub cardinality: Cardinality,
    /// Property on `target_class` pointing back; `None` for unidirectional relations.
    #[serde(default)]
    pub opposite: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
    /// Explicit storage side; defaults to foreign key for one-valued, virtual for many-valued.
    #[serde(default)]
    pub storage: Option<EndPointStorage>,
    /// Persisted order of a many-valued side, e.g. `"Number desc"`.
    #[serde(default)]
    pub sort_expression: Option<String>,
    /// Exposes the collection as a read-only virtual collection.
    #[serde(default)]
    pub read_only: bool,
}

impl RelationPropertyDefinition {
    pub fn one(name: impl Into<String>, target_class: impl Into<String>) -> Self {
        Self::with_cardinality(name, target_class, Cardinality::One)
    }

    pub fn many(name: impl Into<String>, target_class: impl Into<String>) -> Self {
        Self::with_cardinality(name, target_class, Cardinality::Many)
    }

    fn with_cardinality(
        name: impl Into<String>,
        target_class: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            target_class: target_class.into(),
            cardinality,
            opposite: None,
            mandatory: false,
            storage: None,
            sort_expression: None,
            read_only: false,
        }
    }

    pub fn with_opposite(mut self, opposite: impl Into<String>) -> Self {
        self.opposite = Some(opposite.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Marks a one-valued side as the derived (non-foreign-key) side.
    pub fn virtual_side(mut self) -> Self {
        self.storage = Some(EndPointStorage::Virtual);
        self
    }

    pub fn sorted_by(mut self, expression: impl Into<String>) -> Self {
        self.sort_expression = Some(expression.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn effective_storage(&self) -> EndPointStorage {
        match (self.storage, self.cardinality) {
            (Some(storage), _) => storage,
            (None, Cardinality::One) => EndPointStorage::ForeignKey,
            (None, Cardinality::Many) => EndPointStorage::Virtual,
        }
    }

    /// Foreign-key side, always eagerly known once the owner is loaded.
    pub fn is_real(&self) -> bool {
        self.effective_storage() == EndPointStorage::ForeignKey
    }

    pub fn is_virtual(&self) -> bool {
        !self.is_real()
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn is_bidirectional(&self) -> bool {
        self.opposite.is_some()
    }
}

/// One mapped class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    #[serde(default)]
    pub base_class: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationPropertyDefinition>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_class: None,
            properties: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn extends(mut self, base_class: impl Into<String>) -> Self {
        self.base_class = Some(base_class.into());
        self
    }

    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_relation(mut self, relation: RelationPropertyDefinition) -> Self {
        self.relations.push(relation);
        self
    }
}
