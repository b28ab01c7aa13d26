use super::data::CollectionData;
use crate::error::CoreResult;
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::relations::RelationEndPointId;
use crate::transaction::{ClientTransaction, WeakTransaction};

/// Associated collection data: every call is routed to a collection end point
/// of the owning transaction, which keeps both relation sides in sync.
pub struct EndPointDelegatingData {
    transaction: WeakTransaction,
    end_point: RelationEndPointId,
    item_class: String,
}

impl EndPointDelegatingData {
    pub(crate) fn new(
        transaction: WeakTransaction,
        end_point: RelationEndPointId,
        item_class: impl Into<String>,
    ) -> Self {
        Self {
            transaction,
            end_point,
            item_class: item_class.into(),
        }
    }

    fn transaction(&self) -> CoreResult<ClientTransaction> {
        self.transaction.upgrade()
    }

    fn owner(&self) -> DomainObject {
        DomainObject::new(self.end_point.object.clone())
    }
}

impl CollectionData for EndPointDelegatingData {
    fn required_item_class(&self) -> Option<String> {
        Some(self.item_class.clone())
    }

    fn associated_end_point(&self) -> Option<RelationEndPointId> {
        Some(self.end_point.clone())
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn items(&self) -> CoreResult<Vec<DomainObject>> {
        self.transaction()?
            .related_objects(&self.owner(), &self.end_point.property)
    }

    fn contains(&self, id: &ObjectId) -> CoreResult<bool> {
        self.transaction()?
            .contains_related(&self.owner(), &self.end_point.property, id)
    }

    fn insert(&self, index: usize, object: &DomainObject) -> CoreResult<()> {
        self.transaction()?
            .insert_related(&self.owner(), &self.end_point.property, index, object)
    }

    fn remove(&self, id: &ObjectId) -> CoreResult<bool> {
        self.transaction()?.remove_related(
            &self.owner(),
            &self.end_point.property,
            &DomainObject::new(id.clone()),
        )
    }

    fn replace(&self, index: usize, object: Option<&DomainObject>) -> CoreResult<()> {
        self.transaction()?
            .replace_related(&self.owner(), &self.end_point.property, index, object)
    }

    fn clear(&self) -> CoreResult<()> {
        self.transaction()?
            .clear_related(&self.owner(), &self.end_point.property)
    }
}
