//! Domain object collections.
//!
//! # Responsibility
//! - Expose ordered, duplicate-free object collections to callers.
//! - Compose collection behavior from small strategies (`data`, `decorators`,
//!   `end_point_data`) that can be swapped at runtime.
//!
//! # Invariants
//! - A collection never contains the same object twice.
//! - Standalone collections own their items; associated collections delegate
//!   to a relation end point and never cache items.
//! - `clone_collection` always yields a standalone collection.

mod data;
mod decorators;
mod end_point_data;

pub use data::{CollectionData, MutableCollectionData};
pub use decorators::{EventRaisingDecorator, ReadOnlyDecorator, TypeCheckingDecorator};
pub use end_point_data::EndPointDelegatingData;

use crate::error::{CoreError, CoreResult};
use crate::events::ListenerDecision;
use crate::mapping::MappingConfiguration;
use crate::model::domain_object::DomainObject;
use crate::relations::RelationEndPointId;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Per-collection notifications; every hook defaults to a no-op.
pub trait CollectionEventHandler {
    fn adding(&self, _item: &DomainObject, _index: usize) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn added(&self, _item: &DomainObject, _index: usize) {}

    fn removing(&self, _item: &DomainObject, _index: usize) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn removed(&self, _item: &DomainObject, _index: usize) {}

    /// The owner of an associated collection is being deleted.
    fn deleting(&self) -> ListenerDecision {
        ListenerDecision::Proceed
    }

    fn deleted(&self) {}
}

/// Ordered handler list shared by a collection and its event-raising data.
#[derive(Default)]
pub struct CollectionHandlers {
    handlers: RefCell<Vec<Rc<dyn CollectionEventHandler>>>,
}

impl CollectionHandlers {
    fn push(&self, handler: Rc<dyn CollectionEventHandler>) {
        self.handlers.borrow_mut().push(handler);
    }

    fn snapshot(&self) -> Vec<Rc<dyn CollectionEventHandler>> {
        self.handlers.borrow().clone()
    }

    fn first_veto(
        &self,
        decide: impl Fn(&dyn CollectionEventHandler) -> ListenerDecision,
    ) -> CoreResult<()> {
        for handler in self.snapshot() {
            if let ListenerDecision::Veto(reason) = decide(handler.as_ref()) {
                return Err(CoreError::CancelledByListener { reason });
            }
        }
        Ok(())
    }

    pub fn adding(&self, item: &DomainObject, index: usize) -> CoreResult<()> {
        self.first_veto(|handler| handler.adding(item, index))
    }

    pub fn added(&self, item: &DomainObject, index: usize) {
        for handler in self.snapshot() {
            handler.added(item, index);
        }
    }

    pub fn removing(&self, item: &DomainObject, index: usize) -> CoreResult<()> {
        self.first_veto(|handler| handler.removing(item, index))
    }

    pub fn removed(&self, item: &DomainObject, index: usize) {
        for handler in self.snapshot() {
            handler.removed(item, index);
        }
    }

    pub fn deleting(&self) -> CoreResult<()> {
        self.first_veto(|handler| handler.deleting())
    }

    pub fn deleted(&self) {
        for handler in self.snapshot() {
            handler.deleted();
        }
    }
}

struct CollectionShared {
    data: RefCell<Rc<dyn CollectionData>>,
    handlers: Rc<CollectionHandlers>,
    mapping: Option<Rc<MappingConfiguration>>,
}

/// Ordered collection of domain objects backed by a swappable data strategy.
///
/// Cloning the handle shares the collection; use `clone_collection` for a copy.
#[derive(Clone)]
pub struct DomainObjectCollection {
    shared: Rc<CollectionShared>,
}

impl DomainObjectCollection {
    /// Untyped standalone collection.
    pub fn new() -> Self {
        Self::standalone(None, None, Vec::new())
    }

    /// Standalone collection accepting only `item_class` (and, with a mapping,
    /// its derived classes).
    pub fn typed(item_class: impl Into<String>, mapping: Option<Rc<MappingConfiguration>>) -> Self {
        Self::standalone(Some(item_class.into()), mapping, Vec::new())
    }

    /// Standalone collection pre-filled with `items`; duplicates are dropped.
    pub fn from_items(items: impl IntoIterator<Item = DomainObject>) -> Self {
        Self::standalone(None, None, items.into_iter().collect())
    }

    fn standalone(
        item_class: Option<String>,
        mapping: Option<Rc<MappingConfiguration>>,
        items: Vec<DomainObject>,
    ) -> Self {
        let handlers = Rc::new(CollectionHandlers::default());
        let data = standalone_data(item_class, mapping.clone(), handlers.clone(), items);
        Self {
            shared: Rc::new(CollectionShared {
                data: RefCell::new(data),
                handlers,
                mapping,
            }),
        }
    }

    /// Collection delegating to `data`; used for relation properties.
    pub(crate) fn associated(
        data: Rc<dyn CollectionData>,
        mapping: Option<Rc<MappingConfiguration>>,
    ) -> Self {
        Self {
            shared: Rc::new(CollectionShared {
                data: RefCell::new(data),
                handlers: Rc::new(CollectionHandlers::default()),
                mapping,
            }),
        }
    }

    fn data(&self) -> Rc<dyn CollectionData> {
        self.shared.data.borrow().clone()
    }

    pub(crate) fn handlers(&self) -> Rc<CollectionHandlers> {
        self.shared.handlers.clone()
    }

    /// Swaps the strategy stack in place; every handle observes the change.
    pub(crate) fn replace_data(&self, data: Rc<dyn CollectionData>) {
        *self.shared.data.borrow_mut() = data;
    }

    /// Turns this collection into a standalone one holding `items`.
    pub(crate) fn make_standalone(&self, items: Vec<DomainObject>) {
        let item_class = self.required_item_class();
        self.replace_data(standalone_data(
            item_class,
            self.shared.mapping.clone(),
            self.handlers(),
            items,
        ));
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn required_item_class(&self) -> Option<String> {
        self.data().required_item_class()
    }

    pub fn associated_end_point(&self) -> Option<RelationEndPointId> {
        self.data().associated_end_point()
    }

    pub fn is_associated(&self) -> bool {
        self.associated_end_point().is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.data().is_read_only()
    }

    pub fn add_handler(&self, handler: Rc<dyn CollectionEventHandler>) {
        self.shared.handlers.push(handler);
    }

    pub fn len(&self) -> CoreResult<usize> {
        self.data().len()
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> CoreResult<Option<DomainObject>> {
        self.data().get(index)
    }

    pub fn index_of(&self, object: &DomainObject) -> CoreResult<Option<usize>> {
        self.data().index_of(object.id())
    }

    pub fn contains(&self, object: &DomainObject) -> CoreResult<bool> {
        self.data().contains(object.id())
    }

    /// Snapshot of the current items.
    pub fn items(&self) -> CoreResult<Vec<DomainObject>> {
        self.data().items()
    }

    pub fn add(&self, object: &DomainObject) -> CoreResult<()> {
        let data = self.data();
        let len = data.len()?;
        data.insert(len, object)
    }

    pub fn insert(&self, index: usize, object: &DomainObject) -> CoreResult<()> {
        self.data().insert(index, object)
    }

    pub fn remove(&self, object: &DomainObject) -> CoreResult<bool> {
        self.data().remove(object.id())
    }

    pub fn remove_at(&self, index: usize) -> CoreResult<()> {
        self.data().replace(index, None)
    }

    pub fn replace(&self, index: usize, object: Option<&DomainObject>) -> CoreResult<()> {
        self.data().replace(index, object)
    }

    pub fn clear(&self) -> CoreResult<()> {
        self.data().clear()
    }

    /// Standalone copy with the same item class and current items.
    pub fn clone_collection(&self) -> CoreResult<Self> {
        Ok(Self::standalone(
            self.required_item_class(),
            self.shared.mapping.clone(),
            self.items()?,
        ))
    }

    /// Read-only view over the current strategy stack.
    pub fn as_read_only(&self) -> Self {
        Self {
            shared: Rc::new(CollectionShared {
                data: RefCell::new(Rc::new(ReadOnlyDecorator::new(self.data()))),
                handlers: self.handlers(),
                mapping: self.shared.mapping.clone(),
            }),
        }
    }
}

impl Default for DomainObjectCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for DomainObjectCollection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainObjectCollection")
            .field("item_class", &self.required_item_class())
            .field("associated_end_point", &self.associated_end_point())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

fn standalone_data(
    item_class: Option<String>,
    mapping: Option<Rc<MappingConfiguration>>,
    handlers: Rc<CollectionHandlers>,
    items: Vec<DomainObject>,
) -> Rc<dyn CollectionData> {
    let base: Rc<dyn CollectionData> = Rc::new(MutableCollectionData::new(items));
    let raising: Rc<dyn CollectionData> = Rc::new(EventRaisingDecorator::new(base, handlers));
    match item_class {
        Some(item_class) => Rc::new(TypeCheckingDecorator::new(raising, item_class, mapping)),
        None => raising,
    }
}
