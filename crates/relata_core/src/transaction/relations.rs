//! Relation reads and synchronized relation changes.
//!
//! Every modification is planned as a list of end-point steps covering both
//! sides of the relation, then run as: raise `*_changing` for each step in
//! order (any veto aborts), apply all steps in one store borrow, raise
//! `*_changed` in the same order.

use super::ClientTransaction;
use crate::collection::{
    CollectionData, CollectionHandlers, DomainObjectCollection, EndPointDelegatingData,
    ReadOnlyDecorator,
};
use crate::error::{CoreError, CoreResult};
use crate::events::{RelationChange, RelationChangeKind};
use crate::mapping::RelationPropertyDefinition;
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::relations::{EndPointStep, RelationEndPoint, RelationEndPointId, VirtualEndPoint};
use log::debug;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::rc::Rc;

struct StepNotification {
    change: RelationChange,
    handlers: Option<Rc<CollectionHandlers>>,
}

impl ClientTransaction {
    /// Related object of a one-valued relation, loading the virtual side lazily.
    pub fn get_related(&self, object: &DomainObject, property: &str) -> CoreResult<Option<DomainObject>> {
        let result = self.read_related(object, property, false);
        self.flush_loaded();
        result
    }

    /// Related object as of load or last commit.
    pub fn get_original_related(
        &self,
        object: &DomainObject,
        property: &str,
    ) -> CoreResult<Option<DomainObject>> {
        let result = self.read_related(object, property, true);
        self.flush_loaded();
        result
    }

    fn read_related(
        &self,
        object: &DomainObject,
        property: &str,
        original: bool,
    ) -> CoreResult<Option<DomainObject>> {
        self.ensure_usable()?;
        self.check_enlisted(object)?;
        let relation = self.one_valued(object, property)?;
        let end_point = RelationEndPointId::new(object.id().clone(), property);
        let related = if original {
            self.read_original_one(&end_point, relation)?
        } else {
            self.read_one(&end_point, relation)?
        };
        Ok(related.map(|id| {
            self.enlist_id(&id);
            DomainObject::new(id)
        }))
    }

    /// Items of a collection relation in current order; loads once on first access.
    pub fn related_objects(&self, object: &DomainObject, property: &str) -> CoreResult<Vec<DomainObject>> {
        let result = self.related_ids(object, property);
        self.flush_loaded();
        Ok(result?
            .into_iter()
            .map(|id| {
                self.enlist_id(&id);
                DomainObject::new(id)
            })
            .collect())
    }

    /// Items of a collection relation as of load or last commit.
    pub fn original_related_objects(
        &self,
        object: &DomainObject,
        property: &str,
    ) -> CoreResult<Vec<DomainObject>> {
        self.ensure_usable()?;
        self.check_enlisted(object)?;
        self.many_valued(object, property)?;
        let end_point = RelationEndPointId::new(object.id().clone(), property);
        let loaded = self.ensure_end_point_complete(&end_point);
        self.flush_loaded();
        loaded?;
        match self.state().end_points.get(&end_point) {
            Some(VirtualEndPoint::Collection(stored)) => Ok(stored
                .original
                .iter()
                .cloned()
                .map(DomainObject::new)
                .collect()),
            _ => Err(not_materialized(&end_point)),
        }
    }

    pub(crate) fn related_ids(&self, object: &DomainObject, property: &str) -> CoreResult<Vec<ObjectId>> {
        self.ensure_usable()?;
        self.check_enlisted(object)?;
        self.many_valued(object, property)?;
        self.read_many(&RelationEndPointId::new(object.id().clone(), property))
    }

    /// Membership test on a collection relation; loads it on first access.
    pub(crate) fn contains_related(
        &self,
        object: &DomainObject,
        property: &str,
        item: &ObjectId,
    ) -> CoreResult<bool> {
        let result = self.related_ids(object, property);
        self.flush_loaded();
        Ok(result?.contains(item))
    }

    /// Associated collection of a collection relation. Repeated calls return
    /// the same instance; the end point itself is loaded on first item access.
    pub fn collection(&self, object: &DomainObject, property: &str) -> CoreResult<DomainObjectCollection> {
        self.ensure_usable()?;
        self.check_enlisted(object)?;
        let relation = self.many_valued(object, property)?;
        let loaded = self.ensure_loaded(object.id());
        self.flush_loaded();
        loaded?;

        let end_point = RelationEndPointId::new(object.id().clone(), property);
        if let Some(collection) = self.collection_slot(&end_point) {
            return Ok(collection);
        }
        let collection = DomainObjectCollection::associated(
            self.associated_data(end_point.clone(), relation),
            Some(self.mapping()),
        );
        self.store_collection_slot(end_point, collection.clone());
        Ok(collection)
    }

    fn associated_data(
        &self,
        end_point: RelationEndPointId,
        relation: &RelationPropertyDefinition,
    ) -> Rc<dyn CollectionData> {
        let data: Rc<dyn CollectionData> = Rc::new(EndPointDelegatingData::new(
            self.downgrade(),
            end_point,
            relation.target_class.clone(),
        ));
        if relation.read_only {
            return Rc::new(ReadOnlyDecorator::new(data));
        }
        data
    }

    /// Snapshot of an end point. Without lazy loading, `None` is returned for
    /// end points that are not materialized yet.
    pub fn get_end_point(
        &self,
        end_point: &RelationEndPointId,
        with_lazy_load: bool,
    ) -> CoreResult<Option<RelationEndPoint>> {
        self.ensure_usable()?;
        let owner = DomainObject::new(end_point.object.clone());
        self.check_enlisted(&owner)?;
        let relation = self.relation_of(owner.class_id(), &end_point.property)?;

        let result = if relation.is_real() {
            self.real_end_point(end_point, with_lazy_load)
        } else {
            self.virtual_end_point(end_point, with_lazy_load)
        };
        self.flush_loaded();
        result
    }

    fn real_end_point(
        &self,
        end_point: &RelationEndPointId,
        with_lazy_load: bool,
    ) -> CoreResult<Option<RelationEndPoint>> {
        if with_lazy_load {
            self.ensure_loaded(&end_point.object)?;
        }
        let state = self.state();
        Ok(state.containers.get(&end_point.object).map(|container| {
            RelationEndPoint::RealObject {
                id: end_point.clone(),
                current: container.reference(&end_point.property).cloned(),
                original: container.original_reference(&end_point.property).cloned(),
                touched: container.is_touched(&end_point.property),
            }
        }))
    }

    fn virtual_end_point(
        &self,
        end_point: &RelationEndPointId,
        with_lazy_load: bool,
    ) -> CoreResult<Option<RelationEndPoint>> {
        if with_lazy_load {
            self.ensure_end_point_complete(end_point)?;
        }
        let state = self.state();
        Ok(state
            .end_points
            .get(end_point)
            .map(|stored| stored.snapshot(end_point.clone())))
    }

    /// Sets a one-valued relation and keeps every opposite side in sync.
    ///
    /// # Errors
    /// - `TypeMismatch` when `related` is not assignable to the relation's class.
    /// - `CrossTransaction` when `related` is not enlisted here.
    /// - `CancelledByListener` when a listener vetoes; nothing is changed.
    pub fn set_related(
        &self,
        object: &DomainObject,
        property: &str,
        related: Option<&DomainObject>,
    ) -> CoreResult<()> {
        let result = self.set_related_unflushed(object, property, related);
        self.flush_loaded();
        result
    }

    fn set_related_unflushed(
        &self,
        object: &DomainObject,
        property: &str,
        related: Option<&DomainObject>,
    ) -> CoreResult<()> {
        self.prepare_owner(object)?;
        let relation = self.one_valued(object, property)?;
        if let Some(related) = related {
            self.prepare_participant(object, relation, related)?;
        }

        let end_point = RelationEndPointId::new(object.id().clone(), property);
        let old = self.read_one(&end_point, relation)?;
        let new = related.map(|related| related.id().clone());
        if old == new {
            self.touch_end_point(&end_point, relation);
            return Ok(());
        }
        let steps = self.plan_set_object(&end_point, relation, old, new)?;
        self.execute(steps)
    }

    /// Appends `item` to a collection relation.
    pub fn add_related(&self, owner: &DomainObject, property: &str, item: &DomainObject) -> CoreResult<()> {
        let len = self.related_ids(owner, property);
        self.flush_loaded();
        self.insert_related(owner, property, len?.len(), item)
    }

    /// Inserts `item` at `index`; the item leaves its previous collection.
    ///
    /// # Errors
    /// - `DuplicateInCollection` when `item` already is an item.
    /// - `IndexOutOfRange` when `index > len`.
    pub fn insert_related(
        &self,
        owner: &DomainObject,
        property: &str,
        index: usize,
        item: &DomainObject,
    ) -> CoreResult<()> {
        let result = (|| -> CoreResult<()> {
            let (relation, end_point, items) = self.prepare_collection_change(owner, property)?;
            self.prepare_participant(owner, relation, item)?;
            let steps = self.plan_insert(&end_point, relation, index, item.id(), &items)?;
            self.execute(steps)
        })();
        self.flush_loaded();
        result
    }

    /// Removes `item`; returns `false` when it was not an item.
    pub fn remove_related(&self, owner: &DomainObject, property: &str, item: &DomainObject) -> CoreResult<bool> {
        let result = (|| -> CoreResult<bool> {
            let (relation, end_point, items) = self.prepare_collection_change(owner, property)?;
            self.check_enlisted(item)?;
            let Some(index) = items.iter().position(|id| id == item.id()) else {
                return Ok(false);
            };
            let steps = self.plan_remove(&end_point, relation, index, item.id())?;
            self.execute(steps)?;
            Ok(true)
        })();
        self.flush_loaded();
        result
    }

    /// Replaces the item at `index`; `None` removes it and closes the gap.
    pub fn replace_related(
        &self,
        owner: &DomainObject,
        property: &str,
        index: usize,
        item: Option<&DomainObject>,
    ) -> CoreResult<()> {
        let result = (|| -> CoreResult<()> {
            let (relation, end_point, mut items) = self.prepare_collection_change(owner, property)?;
            if index >= items.len() {
                return Err(CoreError::IndexOutOfRange {
                    index,
                    len: items.len(),
                });
            }
            let current = items[index].clone();
            let Some(item) = item else {
                let steps = self.plan_remove(&end_point, relation, index, &current)?;
                return self.execute(steps);
            };

            self.prepare_participant(owner, relation, item)?;
            if item.id() == &current {
                self.touch_end_point(&end_point, relation);
                return Ok(());
            }
            if items.contains(item.id()) {
                return Err(CoreError::DuplicateInCollection {
                    object: item.id().clone(),
                });
            }
            let mut steps = self.plan_remove(&end_point, relation, index, &current)?;
            items.remove(index);
            steps.extend(self.plan_insert(&end_point, relation, index, item.id(), &items)?);
            self.execute(steps)
        })();
        self.flush_loaded();
        result
    }

    /// Removes every item of a collection relation.
    pub fn clear_related(&self, owner: &DomainObject, property: &str) -> CoreResult<()> {
        let result = (|| -> CoreResult<()> {
            let (relation, end_point, items) = self.prepare_collection_change(owner, property)?;
            if items.is_empty() {
                self.touch_end_point(&end_point, relation);
                return Ok(());
            }
            let mut steps = Vec::new();
            for (index, item) in items.iter().enumerate().rev() {
                steps.extend(self.plan_remove(&end_point, relation, index, item)?);
            }
            self.execute(steps)
        })();
        self.flush_loaded();
        result
    }

    /// Assigns a standalone collection to a collection relation.
    ///
    /// The relation takes over the items of `collection` and `collection`
    /// becomes the associated instance; the previously associated instance is
    /// left standalone with its last contents.
    pub fn set_collection(
        &self,
        owner: &DomainObject,
        property: &str,
        collection: &DomainObjectCollection,
    ) -> CoreResult<()> {
        let result = self.set_collection_unflushed(owner, property, collection);
        self.flush_loaded();
        result
    }

    fn set_collection_unflushed(
        &self,
        owner: &DomainObject,
        property: &str,
        collection: &DomainObjectCollection,
    ) -> CoreResult<()> {
        let (relation, end_point, old_items) = self.prepare_collection_change(owner, property)?;
        let previous = self.collection_slot(&end_point);
        if previous.as_ref().is_some_and(|previous| previous.ptr_eq(collection)) {
            self.touch_end_point(&end_point, relation);
            return Ok(());
        }
        if let Some(associated) = collection.associated_end_point() {
            return Err(CoreError::InvalidOperation(format!(
                "collection is already associated with {associated}"
            )));
        }

        let new_items = collection.items()?;
        let mut new_ids = Vec::with_capacity(new_items.len());
        for item in &new_items {
            self.prepare_participant(owner, relation, item)?;
            new_ids.push(item.id().clone());
        }

        let mut steps = Vec::new();
        let mut working = old_items.clone();
        for (index, item) in old_items.iter().enumerate().rev() {
            if !new_ids.contains(item) {
                steps.extend(self.plan_remove(&end_point, relation, index, item)?);
                working.remove(index);
            }
        }
        let mut previous_owners: BTreeMap<RelationEndPointId, Vec<ObjectId>> = BTreeMap::new();
        for (target, item) in new_ids.iter().enumerate() {
            if !working.contains(item) {
                let index = target.min(working.len());
                let mut planned = self.plan_insert(&end_point, relation, index, item, &working)?;
                self.rebase_removals(&mut planned, &mut previous_owners)?;
                steps.extend(planned);
                working.insert(index, item.clone());
            }
        }
        if working != new_ids {
            steps.push(EndPointStep::SetContents {
                end_point: end_point.clone(),
                items: new_ids,
            });
        }

        if steps.is_empty() {
            self.touch_end_point(&end_point, relation);
        } else {
            self.execute(steps)?;
        }

        if let Some(previous) = previous {
            previous.make_standalone(old_items.into_iter().map(DomainObject::new).collect());
        }
        collection.replace_data(self.associated_data(end_point.clone(), relation));
        self.store_collection_slot(end_point, collection.clone());
        Ok(())
    }

    /// Deletes an object: unlinks every relation, then marks it `Deleted`
    /// (or discards it when it is `New`).
    pub fn delete(&self, object: &DomainObject) -> CoreResult<()> {
        let result = self.delete_unflushed(object);
        self.flush_loaded();
        result
    }

    fn delete_unflushed(&self, object: &DomainObject) -> CoreResult<()> {
        self.ensure_writable()?;
        self.check_enlisted(object)?;
        self.ensure_loaded(object.id())?;
        if self.with_container(object.id(), |container| container.is_deleted())? {
            return Ok(());
        }

        let id = object.id();
        let class = self.class_of(object.class_id())?;
        let mut steps = Vec::new();
        for relation in &class.relations {
            let end_point = RelationEndPointId::new(id.clone(), relation.name.clone());
            if relation.is_many() {
                let items = self.read_many(&end_point)?;
                for (index, item) in items.iter().enumerate().rev() {
                    steps.extend(self.plan_remove(&end_point, relation, index, item)?);
                }
                continue;
            }

            let Some(related) = self.read_one(&end_point, relation)? else {
                continue;
            };
            steps.push(EndPointStep::SetObject {
                end_point,
                old: Some(related.clone()),
                new: None,
                real: relation.is_real(),
            });
            let Some(opposite) = self.opposite_of(&class.name, relation) else {
                continue;
            };
            let back = RelationEndPointId::new(related, opposite.name.clone());
            if opposite.is_many() {
                let index = self.position_in(&back, id)?;
                steps.push(EndPointStep::Remove {
                    end_point: back,
                    index,
                    object: id.clone(),
                });
            } else {
                self.read_one(&back, opposite)?;
                steps.push(EndPointStep::SetObject {
                    end_point: back,
                    old: Some(id.clone()),
                    new: None,
                    real: opposite.is_real(),
                });
            }
        }

        self.validate_steps(&steps)?;
        let notifications = self.notifications_for(&steps);
        let owned_collections = self.collection_slots_of(id);
        self.while_notifying(|| {
            self.first_veto(|listener| listener.object_deleting(self, object))?;
            for collection in &owned_collections {
                collection.handlers().deleting()?;
            }
            self.raise_changing(&notifications)
        })?;

        let was_new = {
            let mut state = self.state_mut();
            let state = &mut *state;
            for step in &steps {
                step.apply(&mut state.containers, &mut state.end_points);
            }
            let was_new = state
                .containers
                .get(id)
                .is_some_and(|container| container.is_new());
            if was_new {
                state.discard(id);
            } else if let Some(container) = state.containers.get_mut(id) {
                container.mark_deleted();
            }
            was_new
        };
        if was_new {
            self.drop_collection_slots(std::slice::from_ref(id));
        }
        debug!(
            "event=object_delete module=transaction status=ok class={} discarded={} tx_id={}",
            class.name,
            was_new,
            self.id()
        );

        self.raise_changed(&notifications);
        for collection in &owned_collections {
            collection.handlers().deleted();
        }
        self.notify(|listener| listener.object_deleted(self, object));
        Ok(())
    }

    fn one_valued(&self, object: &DomainObject, property: &str) -> CoreResult<&RelationPropertyDefinition> {
        let relation = self.relation_of(object.class_id(), property)?;
        if relation.is_many() {
            return Err(CoreError::InvalidOperation(format!(
                "`{}.{property}` is a collection relation",
                object.class_id()
            )));
        }
        Ok(relation)
    }

    fn many_valued(&self, object: &DomainObject, property: &str) -> CoreResult<&RelationPropertyDefinition> {
        let relation = self.relation_of(object.class_id(), property)?;
        if !relation.is_many() {
            return Err(CoreError::InvalidOperation(format!(
                "`{}.{property}` is a one-valued relation",
                object.class_id()
            )));
        }
        Ok(relation)
    }

    /// Common checks for the object whose end point is modified.
    fn prepare_owner(&self, owner: &DomainObject) -> CoreResult<()> {
        self.ensure_writable()?;
        self.check_enlisted(owner)?;
        self.ensure_alive(owner.id())
    }

    /// Checks an object about to be linked to `owner` through `relation`.
    fn prepare_participant(
        &self,
        owner: &DomainObject,
        relation: &RelationPropertyDefinition,
        participant: &DomainObject,
    ) -> CoreResult<()> {
        self.check_enlisted(participant)?;
        if !self
            .shared
            .mapping
            .is_assignable(&relation.target_class, participant.class_id())
        {
            return Err(CoreError::TypeMismatch {
                owner: Some(owner.id().clone()),
                property: Some(relation.name.clone()),
                offending: Some(participant.id().clone()),
                expected: relation.target_class.clone(),
                actual: participant.class_id().to_string(),
            });
        }
        self.ensure_alive(participant.id())
    }

    fn prepare_collection_change(
        &self,
        owner: &DomainObject,
        property: &str,
    ) -> CoreResult<(&RelationPropertyDefinition, RelationEndPointId, Vec<ObjectId>)> {
        self.prepare_owner(owner)?;
        let relation = self.many_valued(owner, property)?;
        if relation.read_only {
            return Err(CoreError::NotSupported(format!(
                "`{}.{property}` is a read-only collection",
                owner.class_id()
            )));
        }
        let end_point = RelationEndPointId::new(owner.id().clone(), property);
        let items = self.read_many(&end_point)?;
        Ok((relation, end_point, items))
    }

    /// Current value of a one-valued end point; materializes it when needed.
    fn read_one(
        &self,
        end_point: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
    ) -> CoreResult<Option<ObjectId>> {
        self.ensure_loaded(&end_point.object)?;
        if relation.is_real() {
            return self.with_container(&end_point.object, |container| {
                container.reference(&relation.name).cloned()
            });
        }
        self.ensure_end_point_complete(end_point)?;
        match self.state().end_points.get(end_point) {
            Some(VirtualEndPoint::Object(stored)) => Ok(stored.current.clone()),
            _ => Err(not_materialized(end_point)),
        }
    }

    fn read_original_one(
        &self,
        end_point: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
    ) -> CoreResult<Option<ObjectId>> {
        self.ensure_loaded(&end_point.object)?;
        if relation.is_real() {
            return self.with_container(&end_point.object, |container| {
                container.original_reference(&relation.name).cloned()
            });
        }
        self.ensure_end_point_complete(end_point)?;
        match self.state().end_points.get(end_point) {
            Some(VirtualEndPoint::Object(stored)) => Ok(stored.original.clone()),
            _ => Err(not_materialized(end_point)),
        }
    }

    pub(crate) fn read_many(&self, end_point: &RelationEndPointId) -> CoreResult<Vec<ObjectId>> {
        self.ensure_end_point_complete(end_point)?;
        match self.state().end_points.get(end_point) {
            Some(VirtualEndPoint::Collection(stored)) => Ok(stored.current.clone()),
            _ => Err(not_materialized(end_point)),
        }
    }

    fn position_in(&self, collection: &RelationEndPointId, item: &ObjectId) -> CoreResult<usize> {
        self.read_many(collection)?
            .iter()
            .position(|candidate| candidate == item)
            .ok_or_else(|| {
                CoreError::DataInconsistency(format!("{item} is missing from {collection}"))
            })
    }

    fn touch_end_point(&self, end_point: &RelationEndPointId, relation: &RelationPropertyDefinition) {
        let mut state = self.state_mut();
        if relation.is_real() {
            if let Some(container) = state.containers.get_mut(&end_point.object) {
                container.touch(&relation.name);
            }
        } else if let Some(stored) = state.end_points.get_mut(end_point) {
            stored.touch();
        }
    }

    /// Steps for pointing a one-valued end point from `old` to `new`, in the
    /// order subject, old related, new related, new related's previous partner.
    fn plan_set_object(
        &self,
        end_point: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
    ) -> CoreResult<Vec<EndPointStep>> {
        let owner = end_point.object.clone();
        let mut steps = vec![EndPointStep::SetObject {
            end_point: end_point.clone(),
            old: old.clone(),
            new: new.clone(),
            real: relation.is_real(),
        }];
        let Some(opposite) = self.opposite_of(owner.class_id(), relation) else {
            return Ok(steps);
        };

        if opposite.is_many() {
            if let Some(old_owner) = old {
                let collection = RelationEndPointId::new(old_owner, opposite.name.clone());
                let index = self.position_in(&collection, &owner)?;
                steps.push(EndPointStep::Remove {
                    end_point: collection,
                    index,
                    object: owner.clone(),
                });
            }
            if let Some(new_owner) = new {
                let collection = RelationEndPointId::new(new_owner, opposite.name.clone());
                let index = self.read_many(&collection)?.len();
                steps.push(EndPointStep::Insert {
                    end_point: collection,
                    index,
                    object: owner,
                });
            }
            return Ok(steps);
        }

        if let Some(old_related) = old {
            let back = RelationEndPointId::new(old_related, opposite.name.clone());
            self.read_one(&back, opposite)?;
            steps.push(EndPointStep::SetObject {
                end_point: back,
                old: Some(owner.clone()),
                new: None,
                real: opposite.is_real(),
            });
        }
        if let Some(new_related) = new {
            let back = RelationEndPointId::new(new_related.clone(), opposite.name.clone());
            let previous_partner = self.read_one(&back, opposite)?;
            steps.push(EndPointStep::SetObject {
                end_point: back,
                old: previous_partner.clone(),
                new: Some(owner),
                real: opposite.is_real(),
            });
            if let Some(previous_partner) = previous_partner {
                let abandoned = RelationEndPointId::new(previous_partner, relation.name.clone());
                self.read_one(&abandoned, relation)?;
                steps.push(EndPointStep::SetObject {
                    end_point: abandoned,
                    old: Some(new_related),
                    new: None,
                    real: relation.is_real(),
                });
            }
        }
        Ok(steps)
    }

    /// Steps for inserting `item` into `collection` whose current items are `items`.
    fn plan_insert(
        &self,
        collection: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
        index: usize,
        item: &ObjectId,
        items: &[ObjectId],
    ) -> CoreResult<Vec<EndPointStep>> {
        if items.contains(item) {
            return Err(CoreError::DuplicateInCollection {
                object: item.clone(),
            });
        }
        if index > items.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: items.len(),
            });
        }
        let opposite = self.collection_opposite(collection, relation)?;
        let foreign_key = RelationEndPointId::new(item.clone(), opposite.name.clone());
        let previous_owner = self.read_one(&foreign_key, opposite)?;

        let mut steps = vec![EndPointStep::SetObject {
            end_point: foreign_key,
            old: previous_owner.clone(),
            new: Some(collection.object.clone()),
            real: true,
        }];
        if let Some(previous_owner) = previous_owner {
            let previous = RelationEndPointId::new(previous_owner, relation.name.clone());
            let previous_index = self.position_in(&previous, item)?;
            steps.push(EndPointStep::Remove {
                end_point: previous,
                index: previous_index,
                object: item.clone(),
            });
        }
        steps.push(EndPointStep::Insert {
            end_point: collection.clone(),
            index,
            object: item.clone(),
        });
        Ok(steps)
    }

    /// Moves several items out of one previous owner: each removal position is
    /// taken from that owner's contents after the earlier removals.
    fn rebase_removals(
        &self,
        steps: &mut [EndPointStep],
        previous_owners: &mut BTreeMap<RelationEndPointId, Vec<ObjectId>>,
    ) -> CoreResult<()> {
        for step in steps {
            let EndPointStep::Remove {
                end_point,
                index,
                object,
            } = step
            else {
                continue;
            };
            let items = match previous_owners.entry(end_point.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => slot.insert(self.read_many(end_point)?),
            };
            if let Some(position) = items.iter().position(|id| *id == *object) {
                *index = position;
                items.remove(position);
            }
        }
        Ok(())
    }

    /// Steps for removing the item at `index` of `collection`.
    fn plan_remove(
        &self,
        collection: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
        index: usize,
        item: &ObjectId,
    ) -> CoreResult<Vec<EndPointStep>> {
        let opposite = self.collection_opposite(collection, relation)?;
        let foreign_key = RelationEndPointId::new(item.clone(), opposite.name.clone());
        let owner = self.read_one(&foreign_key, opposite)?;
        Ok(vec![
            EndPointStep::SetObject {
                end_point: foreign_key,
                old: owner,
                new: None,
                real: true,
            },
            EndPointStep::Remove {
                end_point: collection.clone(),
                index,
                object: item.clone(),
            },
        ])
    }

    fn collection_opposite(
        &self,
        collection: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
    ) -> CoreResult<&RelationPropertyDefinition> {
        self.opposite_of(collection.object.class_id(), relation)
            .ok_or_else(|| {
                CoreError::DataInconsistency(format!("{collection} has no foreign-key side"))
            })
    }

    fn validate_steps(&self, steps: &[EndPointStep]) -> CoreResult<()> {
        let state = self.state();
        EndPointStep::validate(steps, &state.containers, &state.end_points)
    }

    fn notifications_for(&self, steps: &[EndPointStep]) -> Vec<StepNotification> {
        steps
            .iter()
            .filter_map(|step| {
                let change = step.change()?;
                let handlers = match step {
                    EndPointStep::Insert { end_point, .. } | EndPointStep::Remove { end_point, .. } => {
                        self.collection_slot(end_point)
                            .map(|collection| collection.handlers())
                    }
                    _ => None,
                };
                Some(StepNotification { change, handlers })
            })
            .collect()
    }

    fn raise_changing(&self, notifications: &[StepNotification]) -> CoreResult<()> {
        for notification in notifications {
            self.first_veto(|listener| listener.relation_changing(self, &notification.change))?;
            let Some(handlers) = &notification.handlers else {
                continue;
            };
            match &notification.change.kind {
                RelationChangeKind::Add { item, index } => handlers.adding(item, *index)?,
                RelationChangeKind::Remove { item, index } => {
                    handlers.removing(item, *index)?
                }
                RelationChangeKind::Set { .. } => {}
            }
        }
        Ok(())
    }

    fn raise_changed(&self, notifications: &[StepNotification]) {
        for notification in notifications {
            self.notify(|listener| listener.relation_changed(self, &notification.change));
            let Some(handlers) = &notification.handlers else {
                continue;
            };
            match &notification.change.kind {
                RelationChangeKind::Add { item, index } => handlers.added(item, *index),
                RelationChangeKind::Remove { item, index } => {
                    handlers.removed(item, *index)
                }
                RelationChangeKind::Set { .. } => {}
            }
        }
    }

    /// Runs a planned change through both notification phases.
    fn execute(&self, steps: Vec<EndPointStep>) -> CoreResult<()> {
        self.validate_steps(&steps)?;
        let notifications = self.notifications_for(&steps);
        self.while_notifying(|| self.raise_changing(&notifications))?;
        {
            let mut state = self.state_mut();
            let state = &mut *state;
            for step in &steps {
                step.apply(&mut state.containers, &mut state.end_points);
            }
        }
        self.raise_changed(&notifications);
        Ok(())
    }
}

fn not_materialized(end_point: &RelationEndPointId) -> CoreError {
    CoreError::DataInconsistency(format!("end point {end_point} is not materialized"))
}
