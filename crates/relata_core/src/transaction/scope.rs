//! Thread-local current-transaction stack.
//!
//! # Invariants
//! - Entering a scope pushes; dropping the guard pops that same transaction,
//!   even when guards are dropped out of order.
//! - Every scoped convenience has an explicit-transaction counterpart on
//!   `ClientTransaction`.

use super::ClientTransaction;
use crate::collection::DomainObjectCollection;
use crate::error::{CoreError, CoreResult};
use crate::model::domain_object::DomainObject;
use crate::model::state::ObjectState;
use crate::model::value::Value;
use std::cell::RefCell;

thread_local! {
    static CURRENT: RefCell<Vec<ClientTransaction>> = const { RefCell::new(Vec::new()) };
}

/// Guard returned by [`ClientTransaction::enter_scope`].
#[must_use = "the transaction leaves the scope as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ClientTransactionScope {
    transaction: ClientTransaction,
}

impl ClientTransactionScope {
    pub fn transaction(&self) -> &ClientTransaction {
        &self.transaction
    }
}

impl Drop for ClientTransactionScope {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack
                .iter()
                .rposition(|candidate| candidate.ptr_eq(&self.transaction))
            {
                stack.remove(position);
            }
        });
    }
}

impl ClientTransaction {
    /// Makes this the current transaction of the thread until the guard drops.
    pub fn enter_scope(&self) -> ClientTransactionScope {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        ClientTransactionScope {
            transaction: self.clone(),
        }
    }

    pub fn current() -> Option<ClientTransaction> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }
}

/// Current transaction of this thread.
///
/// # Errors
/// - `InvalidOperation` when no scope is active.
pub fn current_transaction() -> CoreResult<ClientTransaction> {
    ClientTransaction::current()
        .ok_or_else(|| CoreError::InvalidOperation("no current transaction".to_string()))
}

/// Conveniences resolving through the current transaction.
impl DomainObject {
    pub fn state(&self) -> CoreResult<ObjectState> {
        current_transaction()?.object_state(self)
    }

    pub fn value(&self, property: &str) -> CoreResult<Value> {
        current_transaction()?.get_value(self, property)
    }

    pub fn set_value(&self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        current_transaction()?.set_value(self, property, value)
    }

    pub fn related(&self, property: &str) -> CoreResult<Option<DomainObject>> {
        current_transaction()?.get_related(self, property)
    }

    pub fn set_related(&self, property: &str, related: Option<&DomainObject>) -> CoreResult<()> {
        current_transaction()?.set_related(self, property, related)
    }

    pub fn collection(&self, property: &str) -> CoreResult<DomainObjectCollection> {
        current_transaction()?.collection(self, property)
    }

    pub fn delete(&self) -> CoreResult<()> {
        current_transaction()?.delete(self)
    }
}
