//! Collection data decorators.
//!
//! Each decorator adds one capability to the strategy it wraps. Standalone
//! collections are stacked as `TypeChecking(EventRaising(Mutable))`.

use super::data::CollectionData;
use super::CollectionHandlers;
use crate::error::{CoreError, CoreResult};
use crate::mapping::MappingConfiguration;
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::relations::RelationEndPointId;
use std::rc::Rc;

/// Rejects items that are not assignable to the required class.
pub struct TypeCheckingDecorator {
    inner: Rc<dyn CollectionData>,
    item_class: String,
    mapping: Option<Rc<MappingConfiguration>>,
}

impl TypeCheckingDecorator {
    /// Without a mapping the item class must match exactly.
    pub fn new(
        inner: Rc<dyn CollectionData>,
        item_class: impl Into<String>,
        mapping: Option<Rc<MappingConfiguration>>,
    ) -> Self {
        Self {
            inner,
            item_class: item_class.into(),
            mapping,
        }
    }

    fn check(&self, object: &DomainObject) -> CoreResult<()> {
        let assignable = match &self.mapping {
            Some(mapping) => mapping.is_assignable(&self.item_class, object.class_id()),
            None => object.class_id() == self.item_class,
        };
        if assignable {
            return Ok(());
        }
        Err(CoreError::TypeMismatch {
            owner: None,
            property: None,
            offending: Some(object.id().clone()),
            expected: self.item_class.clone(),
            actual: object.class_id().to_string(),
        })
    }
}

impl CollectionData for TypeCheckingDecorator {
    fn required_item_class(&self) -> Option<String> {
        Some(self.item_class.clone())
    }

    fn associated_end_point(&self) -> Option<RelationEndPointId> {
        self.inner.associated_end_point()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn items(&self) -> CoreResult<Vec<DomainObject>> {
        self.inner.items()
    }

    fn len(&self) -> CoreResult<usize> {
        self.inner.len()
    }

    fn get(&self, index: usize) -> CoreResult<Option<DomainObject>> {
        self.inner.get(index)
    }

    fn index_of(&self, id: &ObjectId) -> CoreResult<Option<usize>> {
        self.inner.index_of(id)
    }

    fn insert(&self, index: usize, object: &DomainObject) -> CoreResult<()> {
        self.check(object)?;
        self.inner.insert(index, object)
    }

    fn remove(&self, id: &ObjectId) -> CoreResult<bool> {
        self.inner.remove(id)
    }

    fn replace(&self, index: usize, object: Option<&DomainObject>) -> CoreResult<()> {
        if let Some(object) = object {
            self.check(object)?;
        }
        self.inner.replace(index, object)
    }

    fn clear(&self) -> CoreResult<()> {
        self.inner.clear()
    }
}

/// Raises cancellable adding/removing notifications around every mutation.
pub struct EventRaisingDecorator {
    inner: Rc<dyn CollectionData>,
    handlers: Rc<CollectionHandlers>,
}

impl EventRaisingDecorator {
    pub fn new(inner: Rc<dyn CollectionData>, handlers: Rc<CollectionHandlers>) -> Self {
        Self { inner, handlers }
    }

    fn ensure_insertable(&self, index: usize, object: &DomainObject) -> CoreResult<()> {
        if self.inner.contains(object.id())? {
            return Err(CoreError::DuplicateInCollection {
                object: object.id().clone(),
            });
        }
        let len = self.inner.len()?;
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    fn item_at(&self, index: usize) -> CoreResult<DomainObject> {
        match self.inner.get(index)? {
            Some(item) => Ok(item),
            None => Err(CoreError::IndexOutOfRange {
                index,
                len: self.inner.len()?,
            }),
        }
    }
}

impl CollectionData for EventRaisingDecorator {
    fn required_item_class(&self) -> Option<String> {
        self.inner.required_item_class()
    }

    fn associated_end_point(&self) -> Option<RelationEndPointId> {
        self.inner.associated_end_point()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn items(&self) -> CoreResult<Vec<DomainObject>> {
        self.inner.items()
    }

    fn len(&self) -> CoreResult<usize> {
        self.inner.len()
    }

    fn get(&self, index: usize) -> CoreResult<Option<DomainObject>> {
        self.inner.get(index)
    }

    fn index_of(&self, id: &ObjectId) -> CoreResult<Option<usize>> {
        self.inner.index_of(id)
    }

    fn insert(&self, index: usize, object: &DomainObject) -> CoreResult<()> {
        self.ensure_insertable(index, object)?;
        self.handlers.adding(object, index)?;
        self.inner.insert(index, object)?;
        self.handlers.added(object, index);
        Ok(())
    }

    fn remove(&self, id: &ObjectId) -> CoreResult<bool> {
        let Some(index) = self.inner.index_of(id)? else {
            return Ok(false);
        };
        let item = self.item_at(index)?;
        self.handlers.removing(&item, index)?;
        self.inner.remove(id)?;
        self.handlers.removed(&item, index);
        Ok(true)
    }

    fn replace(&self, index: usize, object: Option<&DomainObject>) -> CoreResult<()> {
        let current = self.item_at(index)?;
        let Some(object) = object else {
            self.handlers.removing(&current, index)?;
            self.inner.replace(index, None)?;
            self.handlers.removed(&current, index);
            return Ok(());
        };

        if &current == object {
            return Ok(());
        }
        if self.inner.contains(object.id())? {
            return Err(CoreError::DuplicateInCollection {
                object: object.id().clone(),
            });
        }
        self.handlers.removing(&current, index)?;
        self.handlers.adding(object, index)?;
        self.inner.replace(index, Some(object))?;
        self.handlers.removed(&current, index);
        self.handlers.added(object, index);
        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        let items = self.inner.items()?;
        for (index, item) in items.iter().enumerate().rev() {
            self.handlers.removing(item, index)?;
        }
        self.inner.clear()?;
        for (index, item) in items.iter().enumerate().rev() {
            self.handlers.removed(item, index);
        }
        Ok(())
    }
}

/// Rejects every mutation.
pub struct ReadOnlyDecorator {
    inner: Rc<dyn CollectionData>,
}

impl ReadOnlyDecorator {
    pub fn new(inner: Rc<dyn CollectionData>) -> Self {
        Self { inner }
    }

    fn reject<T>(operation: &str) -> CoreResult<T> {
        Err(CoreError::NotSupported(format!(
            "cannot {operation} a read-only collection"
        )))
    }
}

impl CollectionData for ReadOnlyDecorator {
    fn required_item_class(&self) -> Option<String> {
        self.inner.required_item_class()
    }

    fn associated_end_point(&self) -> Option<RelationEndPointId> {
        self.inner.associated_end_point()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn items(&self) -> CoreResult<Vec<DomainObject>> {
        self.inner.items()
    }

    fn len(&self) -> CoreResult<usize> {
        self.inner.len()
    }

    fn get(&self, index: usize) -> CoreResult<Option<DomainObject>> {
        self.inner.get(index)
    }

    fn index_of(&self, id: &ObjectId) -> CoreResult<Option<usize>> {
        self.inner.index_of(id)
    }

    fn insert(&self, _index: usize, _object: &DomainObject) -> CoreResult<()> {
        Self::reject("insert into")
    }

    fn remove(&self, _id: &ObjectId) -> CoreResult<bool> {
        Self::reject("remove from")
    }

    fn replace(&self, _index: usize, _object: Option<&DomainObject>) -> CoreResult<()> {
        Self::reject("replace an item of")
    }

    fn clear(&self) -> CoreResult<()> {
        Self::reject("clear")
    }
}
