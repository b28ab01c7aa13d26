//! Client transactions: the unit-of-work boundary.
//!
//! # Responsibility
//! - Own the identity map (data containers) and the virtual end points of one
//!   transaction, loading lazily through the persistence provider or parent.
//! - Run synchronized relation changes, scalar changes and deletions through
//!   the two-phase notification pipeline.
//! - Commit to storage (root) or into the parent (sub), and roll back.
//!
//! # Invariants
//! - A parent with a live sub-transaction rejects modifications.
//! - No store borrow is held while listeners or collection handlers run.
//! - Objects are usable only once enlisted in the transaction hierarchy.
//!
//! # See also
//! - `scope` for the thread-local current-transaction stack.

mod lifecycle;
mod loading;
mod properties;
mod relations;
mod scope;

pub use scope::{current_transaction, ClientTransactionScope};

use crate::collection::DomainObjectCollection;
use crate::error::{CoreError, CoreResult};
use crate::events::{ListenerDecision, TransactionListener};
use crate::mapping::{MappingConfiguration, PropertyDefinition, RelationPropertyDefinition, ResolvedClass};
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::relations::{RelationEndPointId, VirtualEndPoint};
use crate::repo::PersistenceProvider;
use crate::store::DataContainer;
use log::debug;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::rc::{Rc, Weak};
use uuid::Uuid;

/// Identity map and end-point store of one transaction.
#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    pub containers: BTreeMap<ObjectId, DataContainer>,
    pub end_points: BTreeMap<RelationEndPointId, VirtualEndPoint>,
    pub invalid: BTreeSet<ObjectId>,
}

impl TransactionState {
    pub fn end_point_ids_of(&self, id: &ObjectId) -> Vec<RelationEndPointId> {
        self.end_points
            .range(RelationEndPointId::first_of(id)..)
            .take_while(|(end_point, _)| &end_point.object == id)
            .map(|(end_point, _)| end_point.clone())
            .collect()
    }

    pub fn virtual_end_points_changed(&self, id: &ObjectId) -> bool {
        self.end_points
            .range(RelationEndPointId::first_of(id)..)
            .take_while(|(end_point, _)| &end_point.object == id)
            .any(|(_, end_point)| end_point.has_changed())
    }

    /// Forgets the object and marks it invalid.
    pub fn discard(&mut self, id: &ObjectId) {
        self.containers.remove(id);
        for end_point in self.end_point_ids_of(id) {
            self.end_points.remove(&end_point);
        }
        self.invalid.insert(id.clone());
    }
}

pub(crate) struct TransactionShared {
    id: Uuid,
    parent: Option<ClientTransaction>,
    mapping: Rc<MappingConfiguration>,
    provider: Rc<dyn PersistenceProvider>,
    state: RefCell<TransactionState>,
    listeners: RefCell<Vec<Rc<dyn TransactionListener>>>,
    collections: RefCell<BTreeMap<RelationEndPointId, DomainObjectCollection>>,
    /// Shared by every transaction of one hierarchy.
    enlisted: Rc<RefCell<BTreeSet<ObjectId>>>,
    active_child: RefCell<Weak<TransactionShared>>,
    discarded: Cell<bool>,
    notifying: Cell<bool>,
    pending_loaded: RefCell<Vec<DomainObject>>,
}

/// Handle to one node of a transaction hierarchy. Clones share the node.
#[derive(Clone)]
pub struct ClientTransaction {
    shared: Rc<TransactionShared>,
}

/// Non-owning transaction reference held by associated collections.
#[derive(Clone)]
pub(crate) struct WeakTransaction(Weak<TransactionShared>);

impl WeakTransaction {
    pub fn upgrade(&self) -> CoreResult<ClientTransaction> {
        self.0
            .upgrade()
            .map(|shared| ClientTransaction { shared })
            .ok_or_else(|| CoreError::InvalidOperation("transaction no longer exists".to_string()))
    }
}

impl ClientTransaction {
    /// Creates a root transaction persisting through `provider`.
    pub fn new_root(
        mapping: Rc<MappingConfiguration>,
        provider: Rc<dyn PersistenceProvider>,
    ) -> Self {
        let transaction = Self::with_parent(None, mapping, provider, Rc::default());
        debug!(
            "event=tx_create module=transaction status=ok kind=root tx_id={}",
            transaction.id()
        );
        transaction
    }

    fn with_parent(
        parent: Option<ClientTransaction>,
        mapping: Rc<MappingConfiguration>,
        provider: Rc<dyn PersistenceProvider>,
        enlisted: Rc<RefCell<BTreeSet<ObjectId>>>,
    ) -> Self {
        Self {
            shared: Rc::new(TransactionShared {
                id: Uuid::new_v4(),
                parent,
                mapping,
                provider,
                state: RefCell::new(TransactionState::default()),
                listeners: RefCell::new(Vec::new()),
                collections: RefCell::new(BTreeMap::new()),
                enlisted,
                active_child: RefCell::new(Weak::new()),
                discarded: Cell::new(false),
                notifying: Cell::new(false),
                pending_loaded: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn parent(&self) -> Option<ClientTransaction> {
        self.shared.parent.clone()
    }

    pub fn root(&self) -> ClientTransaction {
        match &self.shared.parent {
            Some(parent) => parent.root(),
            None => self.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.shared.parent.is_none()
    }

    pub fn mapping(&self) -> Rc<MappingConfiguration> {
        self.shared.mapping.clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_discarded(&self) -> bool {
        self.shared.discarded.get()
    }

    /// Whether a live sub-transaction has checked this transaction out.
    pub fn is_read_only(&self) -> bool {
        self.active_child().is_some()
    }

    pub fn add_listener(&self, listener: Rc<dyn TransactionListener>) {
        self.shared.listeners.borrow_mut().push(listener);
    }

    /// Opens a child transaction; this transaction is read-only until the
    /// child is discarded or dropped.
    ///
    /// # Errors
    /// - `InvalidOperation` when a live sub-transaction already exists.
    pub fn create_sub_transaction(&self) -> CoreResult<ClientTransaction> {
        self.ensure_usable()?;
        self.ensure_not_notifying()?;
        if self.is_read_only() {
            return Err(CoreError::InvalidOperation(
                "transaction already has an active sub-transaction".to_string(),
            ));
        }

        let sub = Self::with_parent(
            Some(self.clone()),
            self.shared.mapping.clone(),
            self.shared.provider.clone(),
            self.shared.enlisted.clone(),
        );
        *self.shared.active_child.borrow_mut() = Rc::downgrade(&sub.shared);
        debug!(
            "event=tx_create module=transaction status=ok kind=sub tx_id={} parent_id={}",
            sub.id(),
            self.id()
        );
        self.notify(|listener| listener.sub_transaction_created(self, &sub));
        Ok(sub)
    }

    /// Ends this transaction (and any live child); later use fails.
    pub fn discard(&self) {
        if self.shared.discarded.replace(true) {
            return;
        }
        if let Some(child) = self.active_child() {
            child.discard();
        }
        if let Some(parent) = &self.shared.parent {
            *parent.shared.active_child.borrow_mut() = Weak::new();
        }
        debug!(
            "event=tx_discard module=transaction status=ok tx_id={}",
            self.id()
        );
    }

    /// Standalone collection type-checked against this mapping.
    pub fn new_collection(&self, item_class: &str) -> CoreResult<DomainObjectCollection> {
        self.class_of(item_class)?;
        Ok(DomainObjectCollection::typed(
            item_class,
            Some(self.shared.mapping.clone()),
        ))
    }

    /// Makes `object` usable in this hierarchy, loading it if necessary.
    pub fn enlist(&self, object: &DomainObject) -> CoreResult<()> {
        self.ensure_usable()?;
        let result = self.ensure_loaded(object.id());
        if result.is_ok() {
            self.enlist_id(object.id());
        }
        self.flush_loaded();
        result
    }

    pub fn is_enlisted(&self, object: &DomainObject) -> bool {
        self.shared.enlisted.borrow().contains(object.id())
    }

    fn active_child(&self) -> Option<ClientTransaction> {
        self.shared
            .active_child
            .borrow()
            .upgrade()
            .map(|shared| ClientTransaction { shared })
            .filter(|child| !child.is_discarded())
    }

    pub(crate) fn downgrade(&self) -> WeakTransaction {
        WeakTransaction(Rc::downgrade(&self.shared))
    }

    pub(crate) fn state(&self) -> Ref<'_, TransactionState> {
        self.shared.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, TransactionState> {
        self.shared.state.borrow_mut()
    }

    pub(crate) fn ensure_usable(&self) -> CoreResult<()> {
        if self.is_discarded() {
            return Err(CoreError::InvalidOperation(
                "transaction has been discarded".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_not_notifying(&self) -> CoreResult<()> {
        if self.shared.notifying.get() {
            return Err(CoreError::InvalidOperation(
                "modifications are not allowed while change notifications are raised".to_string(),
            ));
        }
        Ok(())
    }

    /// Guard for every modifying operation.
    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_usable()?;
        if self.is_read_only() {
            return Err(CoreError::ReadOnlyTransaction);
        }
        self.ensure_not_notifying()
    }

    pub(crate) fn check_enlisted(&self, object: &DomainObject) -> CoreResult<()> {
        if self.is_enlisted(object) {
            return Ok(());
        }
        Err(CoreError::CrossTransaction {
            object: object.id().clone(),
        })
    }

    pub(crate) fn enlist_id(&self, id: &ObjectId) {
        if !self.shared.enlisted.borrow().contains(id) {
            self.shared.enlisted.borrow_mut().insert(id.clone());
        }
    }

    pub(crate) fn class_of(&self, class: &str) -> CoreResult<&ResolvedClass> {
        self.shared
            .mapping
            .class(class)
            .ok_or_else(|| CoreError::UnknownClass(class.to_string()))
    }

    pub(crate) fn property_of(&self, class: &str, property: &str) -> CoreResult<&PropertyDefinition> {
        self.class_of(class)?
            .property(property)
            .ok_or_else(|| CoreError::UnknownProperty {
                class: class.to_string(),
                property: property.to_string(),
            })
    }

    pub(crate) fn relation_of(
        &self,
        class: &str,
        property: &str,
    ) -> CoreResult<&RelationPropertyDefinition> {
        self.class_of(class)?
            .relation(property)
            .ok_or_else(|| CoreError::UnknownProperty {
                class: class.to_string(),
                property: property.to_string(),
            })
    }

    pub(crate) fn opposite_of(
        &self,
        class: &str,
        relation: &RelationPropertyDefinition,
    ) -> Option<&RelationPropertyDefinition> {
        self.shared.mapping.opposite(class, &relation.name)
    }

    /// Reads the container of a loaded object.
    pub(crate) fn with_container<T>(
        &self,
        id: &ObjectId,
        read: impl FnOnce(&DataContainer) -> T,
    ) -> CoreResult<T> {
        let state = self.state();
        state
            .containers
            .get(id)
            .map(read)
            .ok_or_else(|| CoreError::DataInconsistency(format!("no data container for {id}")))
    }

    /// Loaded and neither deleted nor invalid.
    pub(crate) fn ensure_alive(&self, id: &ObjectId) -> CoreResult<()> {
        self.ensure_loaded(id)?;
        if self.with_container(id, DataContainer::is_deleted)? {
            return Err(CoreError::ObjectDeleted(id.clone()));
        }
        Ok(())
    }

    /// Marks an object created here as invalid in every ancestor.
    pub(crate) fn mark_invalid_in_ancestors(&self, id: &ObjectId) {
        let mut cursor = self.shared.parent.clone();
        while let Some(ancestor) = cursor {
            ancestor.state_mut().invalid.insert(id.clone());
            cursor = ancestor.shared.parent.clone();
        }
    }

    pub(crate) fn collection_slot(&self, end_point: &RelationEndPointId) -> Option<DomainObjectCollection> {
        self.shared.collections.borrow().get(end_point).cloned()
    }

    pub(crate) fn store_collection_slot(
        &self,
        end_point: RelationEndPointId,
        collection: DomainObjectCollection,
    ) {
        self.shared
            .collections
            .borrow_mut()
            .insert(end_point, collection);
    }

    pub(crate) fn collection_slots_of(&self, id: &ObjectId) -> Vec<DomainObjectCollection> {
        self.shared
            .collections
            .borrow()
            .range(RelationEndPointId::first_of(id)..)
            .take_while(|(end_point, _)| &end_point.object == id)
            .map(|(_, collection)| collection.clone())
            .collect()
    }

    pub(crate) fn drop_collection_slots(&self, ids: &[ObjectId]) {
        if ids.is_empty() {
            return;
        }
        self.shared
            .collections
            .borrow_mut()
            .retain(|end_point, _| !ids.contains(&end_point.object));
    }

    fn listeners(&self) -> Vec<Rc<dyn TransactionListener>> {
        self.shared.listeners.borrow().clone()
    }

    pub(crate) fn notify(&self, mut hook: impl FnMut(&dyn TransactionListener)) {
        for listener in self.listeners() {
            hook(listener.as_ref());
        }
    }

    /// Asks every listener in order; the first veto wins.
    pub(crate) fn first_veto(
        &self,
        mut decide: impl FnMut(&dyn TransactionListener) -> ListenerDecision,
    ) -> CoreResult<()> {
        for listener in self.listeners() {
            if let ListenerDecision::Veto(reason) = decide(listener.as_ref()) {
                debug!(
                    "event=change_vetoed module=transaction status=cancelled tx_id={}",
                    self.id()
                );
                return Err(CoreError::CancelledByListener { reason });
            }
        }
        Ok(())
    }

    /// Runs a cancellable notification round; modifications are rejected meanwhile.
    pub(crate) fn while_notifying<T>(&self, round: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        let _guard = NotifyingGuard::enter(&self.shared.notifying);
        round()
    }
}

/// Restores the notifying flag on drop, including when a listener unwinds.
struct NotifyingGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> NotifyingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for NotifyingGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

impl PartialEq for ClientTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ClientTransaction {}

impl Debug for ClientTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransaction")
            .field("id", &self.shared.id)
            .field("root", &self.is_root())
            .field("discarded", &self.is_discarded())
            .finish()
    }
}
