//! In-memory persistence provider.
//!
//! # Responsibility
//! - Provide a deterministic storage backend for tests and embedding.
//! - Count provider round trips so lazy-loading behavior is observable.
//!
//! # Invariants
//! - Timestamps start at 1 and increase by one on every save of a row.
//! - A failed save leaves every stored row untouched.

use super::{
    LoadedRecord, PersistState, PersistableRecord, PersistenceProvider, ProviderError,
    ProviderResult, RelatedObjectsQuery,
};
use crate::mapping::ResolvedClass;
use crate::model::object_id::ObjectId;
use crate::model::property_values::{PropertyValues, Timestamp};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct StoredRow {
    timestamp: Timestamp,
    values: PropertyValues,
}

/// Round-trip counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub single_loads: usize,
    pub batch_loads: usize,
    pub related_loads: usize,
    pub saves: usize,
}

/// Storage backed by an ordered map.
#[derive(Debug, Default)]
pub struct InMemoryPersistenceProvider {
    rows: RefCell<BTreeMap<ObjectId, StoredRow>>,
    stats: Cell<ProviderStats>,
}

impl InMemoryPersistenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a row directly, bypassing concurrency checks.
    pub fn seed(&self, id: ObjectId, values: PropertyValues) -> Timestamp {
        let mut rows = self.rows.borrow_mut();
        let timestamp = rows
            .get(&id)
            .map_or(Timestamp(1), |row| Timestamp(row.timestamp.0 + 1));
        rows.insert(id, StoredRow { timestamp, values });
        timestamp
    }

    /// Returns the stored values of one row.
    pub fn stored(&self, id: &ObjectId) -> Option<(Timestamp, PropertyValues)> {
        self.rows
            .borrow()
            .get(id)
            .map(|row| (row.timestamp, row.values.clone()))
    }

    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats.get()
    }

    pub fn reset_stats(&self) {
        self.stats.set(ProviderStats::default());
    }

    fn bump(&self, update: impl FnOnce(&mut ProviderStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn record_for(&self, id: &ObjectId) -> Option<LoadedRecord> {
        self.rows.borrow().get(id).map(|row| LoadedRecord {
            id: id.clone(),
            timestamp: row.timestamp,
            values: row.values.clone(),
        })
    }
}

impl PersistenceProvider for InMemoryPersistenceProvider {
    fn load_data_container(&self, id: &ObjectId) -> ProviderResult<Option<LoadedRecord>> {
        self.bump(|stats| stats.single_loads += 1);
        Ok(self.record_for(id))
    }

    fn load_data_containers(&self, ids: &[ObjectId]) -> ProviderResult<Vec<Option<LoadedRecord>>> {
        self.bump(|stats| stats.batch_loads += 1);
        Ok(ids.iter().map(|id| self.record_for(id)).collect())
    }

    fn load_data_containers_by_related_id(
        &self,
        query: &RelatedObjectsQuery<'_>,
    ) -> ProviderResult<Vec<LoadedRecord>> {
        self.bump(|stats| stats.related_loads += 1);
        let mut records: Vec<LoadedRecord> = self
            .rows
            .borrow()
            .iter()
            .filter(|(id, row)| query.matches(id, &row.values))
            .map(|(id, row)| LoadedRecord {
                id: id.clone(),
                timestamp: row.timestamp,
                values: row.values.clone(),
            })
            .collect();

        if let Some(sort) = query.sort_expression {
            records.sort_by(|left, right| sort.compare(&left.values.scalars, &right.values.scalars));
        }
        Ok(records)
    }

    fn save(&self, records: &[PersistableRecord]) -> ProviderResult<Vec<(ObjectId, Timestamp)>> {
        self.bump(|stats| stats.saves += 1);
        let mut rows = self.rows.borrow_mut();

        let mut violations = Vec::new();
        for record in records {
            match record.state {
                PersistState::New => {
                    if rows.contains_key(&record.id) {
                        return Err(ProviderError::DuplicateObject(record.id.clone()));
                    }
                }
                PersistState::Changed | PersistState::Deleted => {
                    let current = rows.get(&record.id).map(|row| row.timestamp);
                    if current.is_none() || current != record.timestamp {
                        violations.push(record.id.clone());
                    }
                }
            }
        }
        if !violations.is_empty() {
            debug!(
                "event=provider_save module=repo status=conflict provider=memory conflicts={}",
                violations.len()
            );
            return Err(ProviderError::ConcurrencyViolation(violations));
        }

        let mut saved = Vec::new();
        for record in records {
            match record.state {
                PersistState::Deleted => {
                    rows.remove(&record.id);
                }
                PersistState::New | PersistState::Changed => {
                    let timestamp = record
                        .timestamp
                        .map_or(Timestamp(1), |previous| Timestamp(previous.0 + 1));
                    rows.insert(
                        record.id.clone(),
                        StoredRow {
                            timestamp,
                            values: record.values.clone(),
                        },
                    );
                    saved.push((record.id.clone(), timestamp));
                }
            }
        }
        Ok(saved)
    }

    fn create_new_object_id(&self, class: &ResolvedClass) -> ProviderResult<ObjectId> {
        Ok(ObjectId::new_guid(class.name.as_str()))
    }
}
