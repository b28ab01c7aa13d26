//! Identity map lookups and lazy loading.

use super::ClientTransaction;
use crate::error::{CoreError, CoreResult};
use crate::mapping::{RelationPropertyDefinition, SortExpression};
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::model::property_values::{PropertyValues, Timestamp};
use crate::model::state::ObjectState;
use crate::relations::{
    RelationEndPointId, VirtualCollectionEndPoint, VirtualEndPoint, VirtualObjectEndPoint,
};
use crate::repo::RelatedObjectsQuery;
use crate::store::DataContainer;
use log::{debug, warn};
use std::collections::btree_map::Entry;
use std::time::Instant;

impl ClientTransaction {
    /// Returns the object, loading it on first access.
    ///
    /// # Errors
    /// - `ObjectsNotFound` when storage has no such row.
    /// - `ObjectInvalid` when the object was discarded or deleted in a parent.
    pub fn get_object(&self, id: &ObjectId) -> CoreResult<DomainObject> {
        self.ensure_usable()?;
        let result = self.ensure_loaded(id);
        self.flush_loaded();
        result?;
        self.enlist_id(id);
        Ok(DomainObject::new(id.clone()))
    }

    /// Batch variant of `get_object`: one provider round trip for every absent
    /// id; all missing ids are reported together and nothing is registered.
    pub fn get_objects(&self, ids: &[ObjectId]) -> CoreResult<Vec<DomainObject>> {
        self.ensure_usable()?;
        let result = self.load_objects(ids);
        self.flush_loaded();
        result?;
        Ok(ids
            .iter()
            .map(|id| {
                self.enlist_id(id);
                DomainObject::new(id.clone())
            })
            .collect())
    }

    /// Like `get_object`, but a missing row yields `None`.
    pub fn try_get_object(&self, id: &ObjectId) -> CoreResult<Option<DomainObject>> {
        match self.get_object(id) {
            Ok(object) => Ok(Some(object)),
            Err(CoreError::ObjectsNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Public state of `object` in this transaction; never loads.
    pub fn object_state(&self, object: &DomainObject) -> CoreResult<ObjectState> {
        self.check_enlisted(object)?;
        Ok(self.state_of(object.id()))
    }

    pub(crate) fn state_of(&self, id: &ObjectId) -> ObjectState {
        {
            let state = self.state();
            if state.invalid.contains(id) {
                return ObjectState::Invalid;
            }
            if let Some(container) = state.containers.get(id) {
                let container_state = container.state();
                if container_state == ObjectState::Unchanged
                    && state.virtual_end_points_changed(id)
                {
                    return ObjectState::Changed;
                }
                return container_state;
            }
        }
        match &self.shared.parent {
            Some(parent)
                if matches!(
                    parent.state_of(id),
                    ObjectState::Deleted | ObjectState::Invalid
                ) =>
            {
                ObjectState::Invalid
            }
            _ => ObjectState::NotLoadedYet,
        }
    }

    /// Makes sure a container for `id` exists in this transaction.
    pub(crate) fn ensure_loaded(&self, id: &ObjectId) -> CoreResult<()> {
        {
            let state = self.state();
            if state.invalid.contains(id) {
                return Err(CoreError::ObjectInvalid(id.clone()));
            }
            if state.containers.contains_key(id) {
                return Ok(());
            }
        }
        self.class_of(id.class_id())?;

        let Some(parent) = self.shared.parent.clone() else {
            let started_at = Instant::now();
            let record = self.shared.provider.load_data_container(id)?;
            let Some(record) = record else {
                return Err(CoreError::ObjectsNotFound(vec![id.clone()]));
            };
            debug!(
                "event=object_load module=transaction status=ok class={} duration_ms={}",
                id.class_id(),
                started_at.elapsed().as_millis()
            );
            return self.register_loaded(id.clone(), record.values, Some(record.timestamp));
        };

        parent.ensure_loaded(id)?;
        let copied = parent.with_container(id, |container| {
            (!container.is_deleted()).then(|| (container.current().clone(), container.timestamp()))
        })?;
        match copied {
            Some((values, timestamp)) => self.register_loaded(id.clone(), values, timestamp),
            None => {
                self.state_mut().invalid.insert(id.clone());
                Err(CoreError::ObjectInvalid(id.clone()))
            }
        }
    }

    fn load_objects(&self, ids: &[ObjectId]) -> CoreResult<()> {
        let mut absent: Vec<ObjectId> = Vec::new();
        {
            let state = self.state();
            for id in ids {
                if state.invalid.contains(id) {
                    return Err(CoreError::ObjectInvalid(id.clone()));
                }
                if !state.containers.contains_key(id) && !absent.contains(id) {
                    absent.push(id.clone());
                }
            }
        }
        if absent.is_empty() {
            return Ok(());
        }
        for id in &absent {
            self.class_of(id.class_id())?;
        }

        if let Some(parent) = self.shared.parent.clone() {
            parent.load_objects(&absent)?;
            for id in &absent {
                self.ensure_loaded(id)?;
            }
            return Ok(());
        }

        let started_at = Instant::now();
        let records = self.shared.provider.load_data_containers(&absent)?;
        let missing: Vec<ObjectId> = absent
            .iter()
            .zip(&records)
            .filter(|(_, record)| record.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::ObjectsNotFound(missing));
        }
        for (id, record) in absent.into_iter().zip(records) {
            if let Some(record) = record {
                self.register_loaded(id, record.values, Some(record.timestamp))?;
            }
        }
        debug!(
            "event=object_batch_load module=transaction status=ok count={} duration_ms={}",
            ids.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Registers a loaded container and performs incidental end-point discovery.
    fn register_loaded(
        &self,
        id: ObjectId,
        values: PropertyValues,
        timestamp: Option<Timestamp>,
    ) -> CoreResult<()> {
        let class = self.class_of(id.class_id())?;
        let values = DataContainer::normalize(class, values);

        let mut discovered = Vec::new();
        for relation in class.relations.iter().filter(|relation| relation.is_real()) {
            let Some(target) = values.reference(&relation.name) else {
                continue;
            };
            let Some(opposite) = self.opposite_of(&class.name, relation) else {
                continue;
            };
            discovered.push((
                RelationEndPointId::new(target.clone(), opposite.name.clone()),
                opposite.is_many(),
            ));
        }

        {
            let mut state = self.state_mut();
            for (end_point, many) in discovered {
                match state.end_points.entry(end_point) {
                    Entry::Vacant(slot) => {
                        let incidental = if many {
                            VirtualEndPoint::Collection(VirtualCollectionEndPoint::incomplete(vec![
                                id.clone(),
                            ]))
                        } else {
                            VirtualEndPoint::Object(VirtualObjectEndPoint::loaded(Some(id.clone())))
                        };
                        slot.insert(incidental);
                    }
                    Entry::Occupied(mut slot) => {
                        if let VirtualEndPoint::Collection(collection) = slot.get_mut() {
                            if !collection.complete && !collection.current.contains(&id) {
                                collection.current.push(id.clone());
                                collection.original.push(id.clone());
                            }
                        }
                    }
                }
            }
            state
                .containers
                .insert(id.clone(), DataContainer::existing(id.clone(), values, timestamp));
        }

        self.enlist_id(&id);
        self.shared
            .pending_loaded
            .borrow_mut()
            .push(DomainObject::new(id));
        Ok(())
    }

    /// Loads the full contents of a virtual end point, once.
    pub(crate) fn ensure_end_point_complete(&self, end_point: &RelationEndPointId) -> CoreResult<()> {
        let complete = self
            .state()
            .end_points
            .get(end_point)
            .is_some_and(VirtualEndPoint::is_complete);
        if complete {
            return Ok(());
        }

        let relation = self.relation_of(end_point.object.class_id(), &end_point.property)?;
        if relation.is_real() {
            return Err(CoreError::InvalidOperation(format!(
                "{end_point} is a foreign-key end point"
            )));
        }
        self.ensure_loaded(&end_point.object)?;

        let Some(parent) = self.shared.parent.clone() else {
            return self.load_virtual_end_point(end_point, relation);
        };
        parent.ensure_end_point_complete(end_point)?;
        let copied = parent.state().end_points.get(end_point).cloned();
        let fresh = match copied {
            Some(VirtualEndPoint::Object(stored)) => {
                VirtualEndPoint::Object(VirtualObjectEndPoint::loaded(stored.current))
            }
            Some(VirtualEndPoint::Collection(stored)) => {
                VirtualEndPoint::Collection(VirtualCollectionEndPoint::complete(stored.current))
            }
            None => {
                return Err(CoreError::DataInconsistency(format!(
                    "parent transaction has no end point {end_point}"
                )))
            }
        };
        self.state_mut().end_points.insert(end_point.clone(), fresh);
        Ok(())
    }

    fn load_virtual_end_point(
        &self,
        end_point: &RelationEndPointId,
        relation: &RelationPropertyDefinition,
    ) -> CoreResult<()> {
        let opposite = self
            .opposite_of(end_point.object.class_id(), relation)
            .ok_or_else(|| {
                CoreError::DataInconsistency(format!("{end_point} has no foreign-key side"))
            })?;
        let classes = self.shared.mapping.derived_classes(&relation.target_class);
        let sort_expression = relation
            .sort_expression
            .as_deref()
            .and_then(SortExpression::parse);
        let query = RelatedObjectsQuery {
            classes: &classes,
            property: &opposite.name,
            related_id: &end_point.object,
            sort_expression: sort_expression.as_ref(),
        };

        let started_at = Instant::now();
        let records = self.shared.provider.load_data_containers_by_related_id(&query)?;
        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            let (known, invalid) = {
                let state = self.state();
                (
                    state.containers.contains_key(&record.id),
                    state.invalid.contains(&record.id),
                )
            };
            if invalid {
                continue;
            }
            if !known {
                self.register_loaded(record.id.clone(), record.values, Some(record.timestamp))?;
            }
            candidates.push(record.id);
        }

        let mut state = self.state_mut();
        let mut items: Vec<ObjectId> = candidates
            .into_iter()
            .filter(|id| {
                state
                    .containers
                    .get(id)
                    .is_some_and(|container| container.reference(&opposite.name) == Some(&end_point.object))
            })
            .collect();
        if let Some(VirtualEndPoint::Collection(incidental)) = state.end_points.get(end_point) {
            for id in &incidental.current {
                if !items.contains(id) {
                    items.push(id.clone());
                }
            }
        }

        let loaded = if relation.is_many() {
            VirtualEndPoint::Collection(VirtualCollectionEndPoint::complete(items))
        } else {
            if items.len() > 1 {
                warn!(
                    "event=end_point_load module=transaction status=error property={} matches={}",
                    relation.name,
                    items.len()
                );
                return Err(CoreError::DataInconsistency(format!(
                    "{end_point} resolves to {} objects",
                    items.len()
                )));
            }
            VirtualEndPoint::Object(VirtualObjectEndPoint::loaded(items.into_iter().next()))
        };
        state.end_points.insert(end_point.clone(), loaded);
        debug!(
            "event=end_point_load module=transaction status=ok property={} duration_ms={}",
            relation.name,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Raises `objects_loaded` for everything registered since the last flush.
    pub(crate) fn flush_loaded(&self) {
        if let Some(parent) = &self.shared.parent {
            parent.flush_loaded();
        }
        let loaded = std::mem::take(&mut *self.shared.pending_loaded.borrow_mut());
        if loaded.is_empty() {
            return;
        }
        self.notify(|listener| listener.objects_loaded(self, &loaded));
    }
}
