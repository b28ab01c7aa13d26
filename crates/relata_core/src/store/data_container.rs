use crate::mapping::ResolvedClass;
use crate::model::object_id::ObjectId;
use crate::model::property_values::{PropertyValues, Timestamp};
use crate::model::state::ObjectState;
use crate::model::value::Value;
use std::collections::BTreeSet;

/// Persistence lifecycle of a container, independent of value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLifecycle {
    New,
    Existing,
    Deleted,
}

/// Current and original values of one object inside one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DataContainer {
    id: ObjectId,
    current: PropertyValues,
    original: PropertyValues,
    timestamp: Option<Timestamp>,
    lifecycle: ContainerLifecycle,
    touched: BTreeSet<String>,
}

impl DataContainer {
    /// Container for a row read from storage (or copied from a parent transaction).
    pub fn existing(id: ObjectId, values: PropertyValues, timestamp: Option<Timestamp>) -> Self {
        Self {
            id,
            original: values.clone(),
            current: values,
            timestamp,
            lifecycle: ContainerLifecycle::Existing,
            touched: BTreeSet::new(),
        }
    }

    /// Container for a freshly created object.
    pub fn new_object(id: ObjectId, values: PropertyValues) -> Self {
        Self {
            id,
            original: values.clone(),
            current: values,
            timestamp: None,
            lifecycle: ContainerLifecycle::New,
            touched: BTreeSet::new(),
        }
    }

    /// Values a new instance of `class` starts with.
    pub fn default_values(class: &ResolvedClass) -> PropertyValues {
        let mut values = PropertyValues::new();
        for property in &class.properties {
            values
                .scalars
                .insert(property.name.clone(), property.default_value());
        }
        for relation in class.relations.iter().filter(|relation| relation.is_real()) {
            values.references.insert(relation.name.clone(), None);
        }
        values
    }

    /// Fills properties missing from a stored row so comparisons are total.
    pub fn normalize(class: &ResolvedClass, mut values: PropertyValues) -> PropertyValues {
        for property in &class.properties {
            values
                .scalars
                .entry(property.name.clone())
                .or_insert_with(|| property.default_value());
        }
        for relation in class.relations.iter().filter(|relation| relation.is_real()) {
            values.references.entry(relation.name.clone()).or_insert(None);
        }
        values
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn lifecycle(&self) -> ContainerLifecycle {
        self.lifecycle
    }

    pub fn is_new(&self) -> bool {
        self.lifecycle == ContainerLifecycle::New
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle == ContainerLifecycle::Deleted
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn current(&self) -> &PropertyValues {
        &self.current
    }

    pub fn original(&self) -> &PropertyValues {
        &self.original
    }

    pub fn has_changed(&self) -> bool {
        self.current != self.original
    }

    /// State derived from this container alone.
    pub fn state(&self) -> ObjectState {
        match self.lifecycle {
            ContainerLifecycle::New => ObjectState::New,
            ContainerLifecycle::Deleted => ObjectState::Deleted,
            ContainerLifecycle::Existing if self.has_changed() => ObjectState::Changed,
            ContainerLifecycle::Existing => ObjectState::Unchanged,
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.current.scalar(name)
    }

    pub fn original_value(&self, name: &str) -> Option<&Value> {
        self.original.scalar(name)
    }

    pub fn set_value(&mut self, name: &str, value: Value) {
        self.current.scalars.insert(name.to_string(), value);
        self.touch(name);
    }

    pub fn reference(&self, name: &str) -> Option<&ObjectId> {
        self.current.reference(name)
    }

    pub fn original_reference(&self, name: &str) -> Option<&ObjectId> {
        self.original.reference(name)
    }

    pub fn set_reference(&mut self, name: &str, target: Option<ObjectId>) {
        self.current.references.insert(name.to_string(), target);
        self.touch(name);
    }

    pub fn touch(&mut self, name: &str) {
        self.touched.insert(name.to_string());
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.contains(name)
    }

    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    /// `Existing/New -> Deleted`; callers discard `New` containers instead.
    pub fn mark_deleted(&mut self) {
        self.lifecycle = ContainerLifecycle::Deleted;
    }

    /// Copies every differing value of `other` into this container, marking
    /// those properties touched, and merges the touched flags of `other`.
    pub fn merge_from(&mut self, other: &DataContainer) {
        for (name, value) in &other.current.scalars {
            if self.current.scalars.get(name) != Some(value) {
                self.set_value(name, value.clone());
            }
        }
        for (name, target) in &other.current.references {
            if self.current.references.get(name) != Some(target) {
                self.set_reference(name, target.clone());
            }
        }
        self.touched.extend(other.touched.iter().cloned());
    }

    /// Accepts current values as the new baseline.
    pub fn commit(&mut self, timestamp: Option<Timestamp>) {
        self.original = self.current.clone();
        if timestamp.is_some() {
            self.timestamp = timestamp;
        }
        if self.lifecycle == ContainerLifecycle::New {
            self.lifecycle = ContainerLifecycle::Existing;
        }
        self.touched.clear();
    }

    /// Restores the baseline values of an existing container.
    pub fn rollback(&mut self) {
        self.current = self.original.clone();
        if self.lifecycle == ContainerLifecycle::Deleted {
            self.lifecycle = ContainerLifecycle::Existing;
        }
        self.touched.clear();
    }
}
