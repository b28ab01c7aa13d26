//! Scalar properties, touch flags and object creation.

use super::ClientTransaction;
use crate::error::{CoreError, CoreResult};
use crate::events::PropertyChange;
use crate::model::domain_object::DomainObject;
use crate::model::value::Value;
use crate::relations::{
    RelationEndPointId, VirtualCollectionEndPoint, VirtualEndPoint, VirtualObjectEndPoint,
};
use crate::store::DataContainer;
use log::debug;

impl ClientTransaction {
    /// Current value of a scalar property; deleted objects remain readable.
    pub fn get_value(&self, object: &DomainObject, property: &str) -> CoreResult<Value> {
        self.read_scalar(object, property, false)
    }

    /// Value the property had when loaded or last committed.
    pub fn get_original_value(&self, object: &DomainObject, property: &str) -> CoreResult<Value> {
        self.read_scalar(object, property, true)
    }

    fn read_scalar(&self, object: &DomainObject, property: &str, original: bool) -> CoreResult<Value> {
        self.ensure_usable()?;
        self.check_enlisted(object)?;
        let definition = self.property_of(object.class_id(), property)?;
        let loaded = self.ensure_loaded(object.id());
        self.flush_loaded();
        loaded?;

        let value = self.with_container(object.id(), |container| {
            let value = if original {
                container.original_value(property)
            } else {
                container.value(property)
            };
            value.cloned()
        })?;
        Ok(value.unwrap_or_else(|| definition.default_value()))
    }

    /// Sets a scalar property through the `property_changing`/`property_changed` pair.
    ///
    /// Writing the current value only marks the property touched.
    ///
    /// # Errors
    /// - `TypeMismatch` when the value does not fit the declared type or nullability.
    /// - `ObjectDeleted`/`ObjectInvalid` for unusable objects.
    /// - `CancelledByListener` when a listener vetoes; nothing is changed.
    pub fn set_value(
        &self,
        object: &DomainObject,
        property: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let value = value.into();
        self.ensure_writable()?;
        self.check_enlisted(object)?;
        let definition = self.property_of(object.class_id(), property)?;
        let alive = self.ensure_alive(object.id());
        self.flush_loaded();
        alive?;

        if !definition.accepts(&value) {
            return Err(CoreError::TypeMismatch {
                owner: Some(object.id().clone()),
                property: Some(property.to_string()),
                offending: None,
                expected: definition.value_type.as_str().to_string(),
                actual: value.type_name().to_string(),
            });
        }

        let old_value = self
            .with_container(object.id(), |container| container.value(property).cloned())?
            .unwrap_or(Value::Null);
        if old_value == value {
            self.touch_container(object, property);
            return Ok(());
        }

        let change = PropertyChange {
            object: object.clone(),
            property: property.to_string(),
            old_value,
            new_value: value,
        };
        self.while_notifying(|| self.first_veto(|listener| listener.property_changing(self, &change)))?;
        if let Some(container) = self.state_mut().containers.get_mut(object.id()) {
            container.set_value(property, change.new_value.clone());
        }
        self.notify(|listener| listener.property_changed(self, &change));
        Ok(())
    }

    /// Marks a scalar property touched without changing its value or state.
    pub fn touch_value(&self, object: &DomainObject, property: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        self.check_enlisted(object)?;
        self.property_of(object.class_id(), property)?;
        let alive = self.ensure_alive(object.id());
        self.flush_loaded();
        alive?;
        self.touch_container(object, property);
        Ok(())
    }

    /// Marks a relation property touched without changing its contents or state.
    pub fn touch_relation(&self, object: &DomainObject, property: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        self.check_enlisted(object)?;
        let relation = self.relation_of(object.class_id(), property)?;
        let alive = self.ensure_alive(object.id());
        let result = alive.and_then(|()| {
            if relation.is_real() {
                self.touch_container(object, property);
                return Ok(());
            }
            let end_point = RelationEndPointId::new(object.id().clone(), property);
            self.ensure_end_point_complete(&end_point)?;
            if let Some(stored) = self.state_mut().end_points.get_mut(&end_point) {
                stored.touch();
            }
            Ok(())
        });
        self.flush_loaded();
        result
    }

    /// Whether the property (scalar or relation) was written since load or commit.
    pub fn is_touched(&self, object: &DomainObject, property: &str) -> CoreResult<bool> {
        self.ensure_usable()?;
        self.check_enlisted(object)?;
        let class = self.class_of(object.class_id())?;
        if class.property(property).is_none() && class.relation(property).is_none() {
            return Err(CoreError::UnknownProperty {
                class: class.name.clone(),
                property: property.to_string(),
            });
        }

        let state = self.state();
        if state
            .containers
            .get(object.id())
            .is_some_and(|container| container.is_touched(property))
        {
            return Ok(true);
        }
        let end_point = RelationEndPointId::new(object.id().clone(), property);
        Ok(state
            .end_points
            .get(&end_point)
            .is_some_and(VirtualEndPoint::is_touched))
    }

    /// Creates a `New` object with default values and empty, complete virtual end points.
    pub fn new_object(&self, class: &str) -> CoreResult<DomainObject> {
        self.ensure_writable()?;
        let resolved = self.class_of(class)?;
        let id = self.shared.provider.create_new_object_id(resolved)?;
        if self.state().containers.contains_key(&id) {
            return Err(CoreError::DataInconsistency(format!(
                "provider returned existing id {id}"
            )));
        }

        {
            let mut state = self.state_mut();
            for relation in resolved.relations.iter().filter(|relation| relation.is_virtual()) {
                let empty = if relation.is_many() {
                    VirtualEndPoint::Collection(VirtualCollectionEndPoint::complete(Vec::new()))
                } else {
                    VirtualEndPoint::Object(VirtualObjectEndPoint::loaded(None))
                };
                state
                    .end_points
                    .insert(RelationEndPointId::new(id.clone(), relation.name.clone()), empty);
            }
            state.containers.insert(
                id.clone(),
                DataContainer::new_object(id.clone(), DataContainer::default_values(resolved)),
            );
        }
        self.enlist_id(&id);
        self.mark_invalid_in_ancestors(&id);
        debug!(
            "event=object_create module=transaction status=ok class={} tx_id={}",
            class,
            self.id()
        );

        let object = DomainObject::new(id);
        self.notify(|listener| listener.new_object_registered(self, &object));
        Ok(object)
    }

    fn touch_container(&self, object: &DomainObject, property: &str) {
        if let Some(container) = self.state_mut().containers.get_mut(object.id()) {
            container.touch(property);
        }
    }
}
