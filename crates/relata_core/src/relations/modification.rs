use super::end_point::{RelationEndPointId, VirtualEndPoint};
use crate::error::{CoreError, CoreResult};
use crate::events::{RelationChange, RelationChangeKind};
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::store::DataContainer;
use std::collections::BTreeMap;

/// One elementary end-point modification of a synchronized relation change.
///
/// Steps of one change are applied in order inside a single store borrow;
/// positions are relative to the state left by the previous step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EndPointStep {
    SetObject {
        end_point: RelationEndPointId,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
        /// Foreign-key side stored in the owner's data container.
        real: bool,
    },
    Insert {
        end_point: RelationEndPointId,
        index: usize,
        object: ObjectId,
    },
    Remove {
        end_point: RelationEndPointId,
        index: usize,
        object: ObjectId,
    },
    /// Reorders a collection to its final contents; raises no notification.
    SetContents {
        end_point: RelationEndPointId,
        items: Vec<ObjectId>,
    },
}

impl EndPointStep {
    pub fn end_point(&self) -> &RelationEndPointId {
        match self {
            Self::SetObject { end_point, .. }
            | Self::Insert { end_point, .. }
            | Self::Remove { end_point, .. }
            | Self::SetContents { end_point, .. } => end_point,
        }
    }

    /// Notification describing this step, if it raises one.
    pub fn change(&self) -> Option<RelationChange> {
        let end_point = self.end_point();
        let kind = match self {
            Self::SetObject { old, new, .. } => RelationChangeKind::Set {
                old_related: old.clone().map(DomainObject::new),
                new_related: new.clone().map(DomainObject::new),
            },
            Self::Insert { index, object, .. } => RelationChangeKind::Add {
                item: DomainObject::new(object.clone()),
                index: *index,
            },
            Self::Remove { index, object, .. } => RelationChangeKind::Remove {
                item: DomainObject::new(object.clone()),
                index: *index,
            },
            Self::SetContents { .. } => return None,
        };
        Some(RelationChange {
            object: DomainObject::new(end_point.object.clone()),
            property: end_point.property.clone(),
            kind,
        })
    }

    /// Checks that every target of `steps` is materialized.
    pub fn validate(
        steps: &[EndPointStep],
        containers: &BTreeMap<ObjectId, DataContainer>,
        end_points: &BTreeMap<RelationEndPointId, VirtualEndPoint>,
    ) -> CoreResult<()> {
        for step in steps {
            let present = match step {
                Self::SetObject {
                    end_point,
                    real: true,
                    ..
                } => containers.contains_key(&end_point.object),
                Self::SetObject { end_point, .. } => {
                    matches!(end_points.get(end_point), Some(VirtualEndPoint::Object(_)))
                }
                Self::Insert { end_point, .. }
                | Self::Remove { end_point, .. }
                | Self::SetContents { end_point, .. } => matches!(
                    end_points.get(end_point),
                    Some(VirtualEndPoint::Collection(collection)) if collection.complete
                ),
            };
            if !present {
                return Err(CoreError::DataInconsistency(format!(
                    "end point {} is not materialized",
                    step.end_point()
                )));
            }
        }
        Ok(())
    }

    /// Applies one validated step.
    pub fn apply(
        &self,
        containers: &mut BTreeMap<ObjectId, DataContainer>,
        end_points: &mut BTreeMap<RelationEndPointId, VirtualEndPoint>,
    ) {
        match self {
            Self::SetObject {
                end_point,
                new,
                real: true,
                ..
            } => {
                if let Some(container) = containers.get_mut(&end_point.object) {
                    container.set_reference(&end_point.property, new.clone());
                }
            }
            Self::SetObject { end_point, new, .. } => {
                if let Some(VirtualEndPoint::Object(stored)) = end_points.get_mut(end_point) {
                    stored.current = new.clone();
                    stored.touched = true;
                }
            }
            Self::Insert {
                end_point,
                index,
                object,
            } => {
                if let Some(VirtualEndPoint::Collection(stored)) = end_points.get_mut(end_point) {
                    let index = (*index).min(stored.current.len());
                    stored.current.insert(index, object.clone());
                    stored.touched = true;
                }
            }
            Self::Remove {
                end_point, object, ..
            } => {
                if let Some(VirtualEndPoint::Collection(stored)) = end_points.get_mut(end_point) {
                    stored.current.retain(|item| item != object);
                    stored.touched = true;
                }
            }
            Self::SetContents { end_point, items } => {
                if let Some(VirtualEndPoint::Collection(stored)) = end_points.get_mut(end_point) {
                    stored.current = items.clone();
                    stored.touched = true;
                }
            }
        }
    }
}
