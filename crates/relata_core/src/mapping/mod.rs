//! Mapping metadata consumed by the engine.
//!
//! # Responsibility
//! - Describe mapped classes, scalar properties and relation properties.
//! - Validate cross-class consistency (opposites, storage sides, inheritance).
//!
//! # Invariants
//! - A built `MappingConfiguration` is internally consistent; the engine never
//!   re-validates metadata at runtime.
//! - Every bidirectional relation has exactly one foreign-key side.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod configuration;
pub mod definition;
pub mod sort;

pub use configuration::{MappingConfiguration, ResolvedClass};
pub use definition::{
    Cardinality, ClassDefinition, EndPointStorage, PropertyDefinition, RelationPropertyDefinition,
};
pub use sort::{SortDirection, SortExpression, SortSpecification};

/// Metadata validation errors.
#[derive(Debug)]
pub enum MappingError {
    InvalidIdentifier(String),
    DuplicateClass(String),
    DuplicateProperty {
        class: String,
        property: String,
    },
    UnknownBaseClass {
        class: String,
        base_class: String,
    },
    InheritanceCycle(String),
    UnknownTargetClass {
        class: String,
        property: String,
        target_class: String,
    },
    UnknownOpposite {
        class: String,
        property: String,
        opposite: String,
    },
    OppositeMismatch {
        class: String,
        property: String,
        details: String,
    },
    UnsupportedRelation {
        class: String,
        property: String,
        details: &'static str,
    },
    InvalidSortExpression {
        class: String,
        property: String,
        expression: String,
    },
    InvalidDefault {
        class: String,
        property: String,
    },
    Json(serde_json::Error),
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(value) => write!(f, "invalid mapping identifier `{value}`"),
            Self::DuplicateClass(class) => write!(f, "class `{class}` is defined twice"),
            Self::DuplicateProperty { class, property } => {
                write!(f, "property `{property}` is defined twice on class `{class}`")
            }
            Self::UnknownBaseClass { class, base_class } => {
                write!(f, "class `{class}` extends unknown class `{base_class}`")
            }
            Self::InheritanceCycle(class) => {
                write!(f, "class `{class}` is part of an inheritance cycle")
            }
            Self::UnknownTargetClass {
                class,
                property,
                target_class,
            } => write!(
                f,
                "relation `{class}.{property}` targets unknown class `{target_class}`"
            ),
            Self::UnknownOpposite {
                class,
                property,
                opposite,
            } => write!(
                f,
                "relation `{class}.{property}` names unknown opposite `{opposite}`"
            ),
            Self::OppositeMismatch {
                class,
                property,
                details,
            } => write!(f, "relation `{class}.{property}` is inconsistent: {details}"),
            Self::UnsupportedRelation {
                class,
                property,
                details,
            } => write!(f, "relation `{class}.{property}` is not supported: {details}"),
            Self::InvalidSortExpression {
                class,
                property,
                expression,
            } => write!(
                f,
                "relation `{class}.{property}` has invalid sort expression `{expression}`"
            ),
            Self::InvalidDefault { class, property } => write!(
                f,
                "default value of `{class}.{property}` does not match its declared type"
            ),
            Self::Json(err) => write!(f, "invalid mapping json: {err}"),
        }
    }
}

impl Error for MappingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MappingError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
