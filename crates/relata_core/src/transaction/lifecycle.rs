//! Commit and rollback.

use super::{ClientTransaction, TransactionState};
use crate::error::{CoreError, CoreResult};
use crate::model::domain_object::DomainObject;
use crate::model::object_id::ObjectId;
use crate::model::property_values::Timestamp;
use crate::relations::{RelationEndPointId, VirtualEndPoint};
use crate::repo::{PersistState, PersistableRecord};
use crate::store::DataContainer;
use log::{info, warn};
use std::collections::BTreeMap;
use std::time::Instant;

impl ClientTransaction {
    /// Objects that are `New`, `Changed` or `Deleted` here.
    pub fn changed_objects(&self) -> Vec<DomainObject> {
        let state = self.state();
        state
            .containers
            .values()
            .filter(|container| {
                container.state().is_dirty() || state.virtual_end_points_changed(container.id())
            })
            .map(|container| DomainObject::new(container.id().clone()))
            .collect()
    }

    /// Root: saves every dirty object in one provider batch.
    /// Sub: propagates every change into the parent's in-memory store.
    ///
    /// # Errors
    /// - `CancelledByListener` when a `committing` listener vetoes.
    /// - `MandatoryRelationNotSet` (root only); nothing is saved.
    /// - `ConcurrencyViolation` naming every stale object; in-memory state is kept.
    pub fn commit(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let started_at = Instant::now();
        let objects = self.changed_objects();
        let vetoed = self.while_notifying(|| {
            self.first_veto(|listener| listener.committing(self, &objects))
        });
        self.flush_loaded();
        vetoed?;

        let result = match self.parent() {
            None => self.commit_to_provider(),
            Some(parent) => {
                self.commit_to_parent(&parent);
                Ok(())
            }
        };
        if let Err(err) = &result {
            warn!(
                "event=tx_commit module=transaction status=error kind={} objects={} error_kind={:?} tx_id={}",
                self.kind_label(),
                objects.len(),
                err.kind(),
                self.id()
            );
            return result;
        }

        info!(
            "event=tx_commit module=transaction status=ok kind={} objects={} duration_ms={} tx_id={}",
            self.kind_label(),
            objects.len(),
            started_at.elapsed().as_millis(),
            self.id()
        );
        self.notify(|listener| listener.committed(self, &objects));
        Ok(())
    }

    /// Restores every container and end point to its baseline and discards
    /// new objects. Storage is not contacted.
    pub fn rollback(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let started_at = Instant::now();
        let objects = self.changed_objects();
        self.notify(|listener| listener.rolling_back(self, &objects));

        let discarded = {
            let mut state = self.state_mut();
            let state = &mut *state;
            let discarded: Vec<ObjectId> = state
                .containers
                .values()
                .filter(|container| container.is_new())
                .map(|container| container.id().clone())
                .collect();
            for id in &discarded {
                state.discard(id);
            }
            for container in state.containers.values_mut() {
                container.rollback();
            }
            for end_point in state.end_points.values_mut() {
                end_point.rollback();
            }
            discarded
        };
        self.drop_collection_slots(&discarded);

        info!(
            "event=tx_rollback module=transaction status=ok kind={} objects={} duration_ms={} tx_id={}",
            self.kind_label(),
            objects.len(),
            started_at.elapsed().as_millis(),
            self.id()
        );
        self.notify(|listener| listener.rolled_back(self, &objects));
        Ok(())
    }

    fn kind_label(&self) -> &'static str {
        if self.is_root() {
            "root"
        } else {
            "sub"
        }
    }

    fn commit_to_provider(&self) -> CoreResult<()> {
        self.check_mandatory_relations()?;
        let records = self.persistable_records();
        if records.is_empty() {
            self.accept_changes(&[]);
            return Ok(());
        }
        let saved = self.shared.provider.save(&records)?;
        self.accept_changes(&saved);
        Ok(())
    }

    fn check_mandatory_relations(&self) -> CoreResult<()> {
        let state = self.state();
        for container in state.containers.values() {
            let id = container.id();
            if container.is_deleted()
                || !(container.state().is_dirty() || state.virtual_end_points_changed(id))
            {
                continue;
            }
            let class = self.class_of(id.class_id())?;
            for relation in class.relations.iter().filter(|relation| relation.mandatory) {
                let satisfied = if relation.is_real() {
                    container.reference(&relation.name).is_some()
                } else {
                    let end_point = RelationEndPointId::new(id.clone(), relation.name.clone());
                    match state.end_points.get(&end_point) {
                        Some(VirtualEndPoint::Object(stored)) => stored.current.is_some(),
                        Some(VirtualEndPoint::Collection(stored)) => {
                            !stored.complete || !stored.current.is_empty()
                        }
                        None => true,
                    }
                };
                if !satisfied {
                    return Err(CoreError::MandatoryRelationNotSet {
                        object: id.clone(),
                        property: relation.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Objects whose only change is a virtual end point are saved unchanged
    /// so their timestamp is checked and advanced.
    fn persistable_records(&self) -> Vec<PersistableRecord> {
        let state = self.state();
        state
            .containers
            .values()
            .filter_map(|container| {
                let persist_state = if container.is_deleted() {
                    PersistState::Deleted
                } else if container.is_new() {
                    PersistState::New
                } else if container.has_changed() || state.virtual_end_points_changed(container.id()) {
                    PersistState::Changed
                } else {
                    return None;
                };
                Some(PersistableRecord {
                    id: container.id().clone(),
                    state: persist_state,
                    values: container.current().clone(),
                    timestamp: container.timestamp(),
                })
            })
            .collect()
    }

    /// Makes current values the new baseline; deleted objects become invalid.
    fn accept_changes(&self, saved: &[(ObjectId, Timestamp)]) {
        let timestamps: BTreeMap<&ObjectId, Timestamp> =
            saved.iter().map(|(id, timestamp)| (id, *timestamp)).collect();
        let deleted = {
            let mut state = self.state_mut();
            let state = &mut *state;
            let deleted: Vec<ObjectId> = state
                .containers
                .values()
                .filter(|container| container.is_deleted())
                .map(|container| container.id().clone())
                .collect();
            for id in &deleted {
                state.discard(id);
            }
            for container in state.containers.values_mut() {
                let timestamp = timestamps.get(container.id()).copied();
                container.commit(timestamp);
            }
            for end_point in state.end_points.values_mut() {
                end_point.commit();
            }
            deleted
        };
        self.drop_collection_slots(&deleted);
    }

    fn commit_to_parent(&self, parent: &ClientTransaction) {
        let dropped = {
            let sub = self.state();
            let mut target = parent.state_mut();
            let dropped = propagate_containers(&sub, &mut target);
            propagate_end_points(&sub, &mut target);
            dropped
        };
        parent.drop_collection_slots(&dropped);
        self.accept_changes(&[]);
    }
}

/// Returns objects that vanished from the parent (new there, deleted here).
fn propagate_containers(sub: &TransactionState, target: &mut TransactionState) -> Vec<ObjectId> {
    let mut dropped = Vec::new();
    for container in sub.containers.values() {
        let id = container.id();
        if container.is_new() {
            target.invalid.remove(id);
            target.containers.insert(
                id.clone(),
                DataContainer::new_object(id.clone(), container.current().clone()),
            );
            continue;
        }

        let Some(existing) = target.containers.get_mut(id) else {
            continue;
        };
        if container.is_deleted() {
            if existing.is_new() {
                target.discard(id);
                dropped.push(id.clone());
            } else {
                existing.merge_from(container);
                existing.mark_deleted();
            }
        } else if container.has_changed() || !container.touched().is_empty() {
            existing.merge_from(container);
        }
    }
    dropped
}

fn propagate_end_points(sub: &TransactionState, target: &mut TransactionState) {
    for (end_point, stored) in &sub.end_points {
        if target.invalid.contains(&end_point.object) {
            continue;
        }
        let owner_is_new = sub
            .containers
            .get(&end_point.object)
            .is_some_and(DataContainer::is_new);
        if owner_is_new {
            target.end_points.insert(end_point.clone(), stored.clone());
            continue;
        }
        if !(stored.has_changed() || stored.is_touched()) {
            continue;
        }
        match target.end_points.get_mut(end_point) {
            Some(existing) => existing.merge_from(stored),
            None => {
                target.end_points.insert(end_point.clone(), stored.clone());
            }
        }
    }
}
