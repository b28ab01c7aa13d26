//! Engine error model.
//!
//! # Responsibility
//! - Map provider and mapping failures into one engine error type.
//! - Classify errors into stable kinds so callers can tell expected signals
//!   (veto, concurrency) apart from programming errors.
//!
//! # Invariants
//! - Every operation returning `CoreError` leaves in-memory state as before the call.

use crate::mapping::MappingError;
use crate::model::object_id::ObjectId;
use crate::repo::{join_ids, ProviderError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

/// Stable error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidState,
    TypeMismatch,
    CrossTransaction,
    DuplicateInCollection,
    IndexOutOfRange,
    MandatoryRelationViolation,
    ConcurrencyViolation,
    CancelledByListener,
    ObjectsNotFound,
    NotSupported,
    ReadOnlyTransaction,
    InvalidOperation,
    DataInconsistency,
    Mapping,
    Provider,
}

/// Unit-of-work engine errors.
#[derive(Debug)]
pub enum CoreError {
    ObjectInvalid(ObjectId),
    ObjectDeleted(ObjectId),
    ObjectsNotFound(Vec<ObjectId>),
    TypeMismatch {
        owner: Option<ObjectId>,
        property: Option<String>,
        /// Object rejected by a relation or collection, when there is one.
        offending: Option<ObjectId>,
        expected: String,
        actual: String,
    },
    CrossTransaction {
        object: ObjectId,
    },
    DuplicateInCollection {
        object: ObjectId,
    },
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    MandatoryRelationNotSet {
        object: ObjectId,
        property: String,
    },
    ConcurrencyViolation(Vec<ObjectId>),
    CancelledByListener {
        reason: String,
    },
    NotSupported(String),
    ReadOnlyTransaction,
    InvalidOperation(String),
    DataInconsistency(String),
    UnknownClass(String),
    UnknownProperty {
        class: String,
        property: String,
    },
    Mapping(MappingError),
    Provider(ProviderError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectInvalid(_) | Self::ObjectDeleted(_) => ErrorKind::InvalidState,
            Self::ObjectsNotFound(_) => ErrorKind::ObjectsNotFound,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::CrossTransaction { .. } => ErrorKind::CrossTransaction,
            Self::DuplicateInCollection { .. } => ErrorKind::DuplicateInCollection,
            Self::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            Self::MandatoryRelationNotSet { .. } => ErrorKind::MandatoryRelationViolation,
            Self::ConcurrencyViolation(_) => ErrorKind::ConcurrencyViolation,
            Self::CancelledByListener { .. } => ErrorKind::CancelledByListener,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::ReadOnlyTransaction => ErrorKind::ReadOnlyTransaction,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::DataInconsistency(_) => ErrorKind::DataInconsistency,
            Self::UnknownClass(_) | Self::UnknownProperty { .. } | Self::Mapping(_) => {
                ErrorKind::Mapping
            }
            Self::Provider(_) => ErrorKind::Provider,
        }
    }

    /// Whether this error is a normal runtime signal rather than a bug.
    pub fn is_expected(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CancelledByListener | ErrorKind::ConcurrencyViolation
        )
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectInvalid(id) => write!(f, "object {id} is invalid in this transaction"),
            Self::ObjectDeleted(id) => write!(f, "object {id} is deleted"),
            Self::ObjectsNotFound(ids) => write!(f, "objects not found: {}", join_ids(ids)),
            Self::TypeMismatch {
                owner,
                property,
                offending,
                expected,
                actual,
            } => {
                write!(f, "type mismatch")?;
                if let Some(owner) = owner {
                    write!(f, " on {owner}")?;
                }
                if let Some(property) = property {
                    write!(f, ".{property}")?;
                }
                write!(f, ": expected `{expected}`, got `{actual}`")?;
                if let Some(offending) = offending {
                    write!(f, " ({offending})")?;
                }
                Ok(())
            }
            Self::CrossTransaction { object } => write!(
                f,
                "object {object} is not enlisted in this transaction hierarchy"
            ),
            Self::DuplicateInCollection { object } => {
                write!(f, "object {object} is already part of the collection")
            }
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} is out of range for length {len}")
            }
            Self::MandatoryRelationNotSet { object, property } => {
                write!(f, "mandatory relation {object}.{property} is not set")
            }
            Self::ConcurrencyViolation(ids) => {
                write!(f, "concurrency violation for objects: {}", join_ids(ids))
            }
            Self::CancelledByListener { reason } => write!(f, "operation cancelled: {reason}"),
            Self::NotSupported(message) => write!(f, "not supported: {message}"),
            Self::ReadOnlyTransaction => write!(
                f,
                "transaction is read-only while a sub-transaction is active"
            ),
            Self::InvalidOperation(message) => write!(f, "invalid operation: {message}"),
            Self::DataInconsistency(message) => write!(f, "data inconsistency: {message}"),
            Self::UnknownClass(class) => write!(f, "class `{class}` is not mapped"),
            Self::UnknownProperty { class, property } => {
                write!(f, "class `{class}` has no property `{property}`")
            }
            Self::Mapping(err) => write!(f, "{err}"),
            Self::Provider(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mapping(err) => Some(err),
            Self::Provider(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::ConcurrencyViolation(ids) => Self::ConcurrencyViolation(ids),
            other => Self::Provider(other),
        }
    }
}

impl From<MappingError> for CoreError {
    fn from(value: MappingError) -> Self {
        Self::Mapping(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreError, ErrorKind};
    use crate::model::object_id::ObjectId;
    use crate::repo::ProviderError;

    #[test]
    fn provider_conflicts_become_expected_engine_errors() {
        let id = ObjectId::with_int("Order", 1);
        let err = CoreError::from(ProviderError::ConcurrencyViolation(vec![id.clone()]));
        assert_eq!(err.kind(), ErrorKind::ConcurrencyViolation);
        assert!(err.is_expected());
        assert!(err.to_string().contains("Order|int:1"));

        let err = CoreError::from(ProviderError::InvalidData("bad".into()));
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(!err.is_expected());
    }

    #[test]
    fn type_mismatch_names_owner_and_property() {
        let err = CoreError::TypeMismatch {
            owner: Some(ObjectId::with_int("Order", 1)),
            property: Some("Customer".into()),
            offending: Some(ObjectId::with_int("Product", 2)),
            expected: "Customer".into(),
            actual: "Product".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Order|int:1.Customer"));
        assert!(message.contains("Product|int:2"));
    }
}
