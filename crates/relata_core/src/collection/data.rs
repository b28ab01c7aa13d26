use crate::error::{CoreError, CoreResult};
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::relations::RelationEndPointId;
use std::cell::RefCell;

/// Storage strategy behind a `DomainObjectCollection`.
///
/// Implementations are either the base store or a decorator wrapping another
/// strategy. All operations may fail because associated strategies load lazily.
pub trait CollectionData {
    /// Class every item must be assignable to, when enforced.
    fn required_item_class(&self) -> Option<String>;

    /// End point this data delegates to; `None` for standalone data.
    fn associated_end_point(&self) -> Option<RelationEndPointId>;

    fn is_read_only(&self) -> bool;

    fn items(&self) -> CoreResult<Vec<DomainObject>>;

    fn len(&self) -> CoreResult<usize> {
        Ok(self.items()?.len())
    }

    fn get(&self, index: usize) -> CoreResult<Option<DomainObject>> {
        Ok(self.items()?.into_iter().nth(index))
    }

    fn index_of(&self, id: &ObjectId) -> CoreResult<Option<usize>> {
        Ok(self.items()?.iter().position(|item| item.id() == id))
    }

    fn contains(&self, id: &ObjectId) -> CoreResult<bool> {
        Ok(self.index_of(id)?.is_some())
    }

    /// Inserts at `index` (`index == len` appends).
    ///
    /// # Errors
    /// - `DuplicateInCollection` when the object is already an item.
    /// - `IndexOutOfRange` when `index > len`.
    fn insert(&self, index: usize, object: &DomainObject) -> CoreResult<()>;

    /// Removes the item; returns `false` when it was not an item.
    fn remove(&self, id: &ObjectId) -> CoreResult<bool>;

    /// Replaces the item at `index`; `None` removes it.
    fn replace(&self, index: usize, object: Option<&DomainObject>) -> CoreResult<()>;

    fn clear(&self) -> CoreResult<()>;
}

/// Ordered, unique-by-id base store.
#[derive(Debug, Default)]
pub struct MutableCollectionData {
    items: RefCell<Vec<DomainObject>>,
}

impl MutableCollectionData {
    pub fn new(items: Vec<DomainObject>) -> Self {
        let mut unique: Vec<DomainObject> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Self {
            items: RefCell::new(unique),
        }
    }
}

impl CollectionData for MutableCollectionData {
    fn required_item_class(&self) -> Option<String> {
        None
    }

    fn associated_end_point(&self) -> Option<RelationEndPointId> {
        None
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn items(&self) -> CoreResult<Vec<DomainObject>> {
        Ok(self.items.borrow().clone())
    }

    fn len(&self) -> CoreResult<usize> {
        Ok(self.items.borrow().len())
    }

    fn get(&self, index: usize) -> CoreResult<Option<DomainObject>> {
        Ok(self.items.borrow().get(index).cloned())
    }

    fn index_of(&self, id: &ObjectId) -> CoreResult<Option<usize>> {
        Ok(self.items.borrow().iter().position(|item| item.id() == id))
    }

    fn insert(&self, index: usize, object: &DomainObject) -> CoreResult<()> {
        let mut items = self.items.borrow_mut();
        if items.contains(object) {
            return Err(CoreError::DuplicateInCollection {
                object: object.id().clone(),
            });
        }
        if index > items.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: items.len(),
            });
        }
        items.insert(index, object.clone());
        Ok(())
    }

    fn remove(&self, id: &ObjectId) -> CoreResult<bool> {
        let mut items = self.items.borrow_mut();
        match items.iter().position(|item| item.id() == id) {
            Some(index) => {
                items.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn replace(&self, index: usize, object: Option<&DomainObject>) -> CoreResult<()> {
        let mut items = self.items.borrow_mut();
        if index >= items.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: items.len(),
            });
        }
        match object {
            None => {
                items.remove(index);
            }
            Some(object) => {
                let existing = items.iter().position(|item| item == object);
                match existing {
                    Some(position) if position == index => {}
                    Some(_) => {
                        return Err(CoreError::DuplicateInCollection {
                            object: object.id().clone(),
                        })
                    }
                    None => items[index] = object.clone(),
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        self.items.borrow_mut().clear();
        Ok(())
    }
}
