//! Change notifications.
//!
//! # Responsibility
//! - Define the listener contract for transaction-level notifications.
//! - Define the payloads passed to listeners.
//!
//! # Invariants
//! - `*_changing`, `object_deleting` and `committing` may veto; a veto aborts
//!   the operation before anything is mutated.
//! - Listeners run without any store borrow held, so they may read freely.
//!   Modifications are rejected while a `*_changing` round is in progress.

use crate::model::domain_object::DomainObject;
use crate::model::value::Value;
use crate::transaction::ClientTransaction;

/// Result of a cancellable notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerDecision {
    Proceed,
    Veto(String),
}

impl ListenerDecision {
    pub fn veto(reason: impl Into<String>) -> Self {
        Self::Veto(reason.into())
    }
}

/// Scalar property change payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub object: DomainObject,
    pub property: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// What happened to one relation end point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationChangeKind {
    Set {
        old_related: Option<DomainObject>,
        new_related: Option<DomainObject>,
    },
    Add {
        item: DomainObject,
        index: usize,
    },
    Remove {
        item: DomainObject,
        index: usize,
    },
}

/// Relation change payload; `object.property` is the end point being modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationChange {
    pub object: DomainObject,
    pub property: String,
    pub kind: RelationChangeKind,
}

/// Transaction-level listener; every hook defaults to a no-op.
pub trait TransactionListener {
    fn objects_loaded(&self, _tx: &ClientTransaction, _objects: &[DomainObject]) {}

    fn new_object_registered(&self, _tx: &ClientTransaction, _object: &DomainObject) {}

    fn property_changing(
        &self,
        _tx: &ClientTransaction,
        _change: &PropertyChange,
    ) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn property_changed(&self, _tx: &ClientTransaction, _change: &PropertyChange) {}

    fn relation_changing(
        &self,
        _tx: &ClientTransaction,
        _change: &RelationChange,
    ) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn relation_changed(&self, _tx: &ClientTransaction, _change: &RelationChange) {}

    fn object_deleting(&self, _tx: &ClientTransaction, _object: &DomainObject) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn object_deleted(&self, _tx: &ClientTransaction, _object: &DomainObject) {}

    fn sub_transaction_created(&self, _tx: &ClientTransaction, _sub: &ClientTransaction) {}

    fn committing(&self, _tx: &ClientTransaction, _objects: &[DomainObject]) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn committed(&self, _tx: &ClientTransaction, _objects: &[DomainObject]) {}

    fn rolling_back(&self, _tx: &ClientTransaction, _objects: &[DomainObject]) {}

    fn rolled_back(&self, _tx: &ClientTransaction, _objects: &[DomainObject]) {}
}
