//! SQLite-backed persistence provider over a generic object schema.
//!
//! # Responsibility
//! - Store scalar values as a JSON payload per object row.
//! - Store foreign keys in `object_references` so related-object lookups are indexed.
//!
//! # Invariants
//! - Every save runs in one SQLite transaction; conflicts roll back everything.
//! - Null foreign keys are represented by the absence of a reference row.

use super::{
    join_ids, LoadedRecord, PersistState, PersistableRecord, PersistenceProvider, ProviderError,
    ProviderResult, RelatedObjectsQuery,
};
use crate::db::migrations::ensure_current;
use crate::db::{open_db, open_db_in_memory};
use crate::mapping::ResolvedClass;
use crate::model::object_id::{ObjectId, ObjectKey};
use crate::model::property_values::{PropertyValues, Timestamp};
use crate::model::value::Value;
use log::{debug, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// Provider owning one migrated SQLite connection.
pub struct SqlitePersistenceProvider {
    conn: Connection,
}

impl SqlitePersistenceProvider {
    /// Wraps a connection returned by `open_db`/`open_db_in_memory`.
    ///
    /// # Errors
    /// - `Db(SchemaMismatch)` when the connection is not at the latest schema version.
    pub fn try_new(conn: Connection) -> ProviderResult<Self> {
        ensure_current(&conn)?;
        Ok(Self { conn })
    }

    pub fn open(path: impl AsRef<Path>) -> ProviderResult<Self> {
        Self::try_new(open_db(path)?)
    }

    pub fn open_in_memory() -> ProviderResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn load_references(&self, id: &ObjectId) -> ProviderResult<BTreeMap<String, Option<ObjectId>>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT property, related_class_id, related_key
             FROM object_references
             WHERE class_id = ?1 AND object_key = ?2;",
        )?;
        let mut rows = stmt.query(params![id.class_id(), id.key().to_storage_string()])?;

        let mut references = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let property: String = row.get(0)?;
            let related_class: String = row.get(1)?;
            let related_key: String = row.get(2)?;
            references.insert(property, Some(parse_object_id(related_class, &related_key)?));
        }
        Ok(references)
    }

    fn build_record(&self, id: ObjectId, timestamp: i64, payload: &str) -> ProviderResult<LoadedRecord> {
        let scalars: BTreeMap<String, Value> = serde_json::from_str(payload).map_err(|err| {
            ProviderError::InvalidData(format!("invalid payload for {id}: {err}"))
        })?;
        let references = self.load_references(&id)?;
        Ok(LoadedRecord {
            timestamp: to_timestamp(timestamp)?,
            values: PropertyValues {
                scalars,
                references,
            },
            id,
        })
    }

    fn current_timestamp(&self, id: &ObjectId) -> ProviderResult<Option<Timestamp>> {
        let timestamp = self
            .conn
            .query_row(
                "SELECT timestamp FROM objects WHERE class_id = ?1 AND object_key = ?2;",
                params![id.class_id(), id.key().to_storage_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        timestamp.map(to_timestamp).transpose()
    }

    fn write_references(&self, id: &ObjectId, values: &PropertyValues) -> ProviderResult<()> {
        let key = id.key().to_storage_string();
        self.conn.execute(
            "DELETE FROM object_references WHERE class_id = ?1 AND object_key = ?2;",
            params![id.class_id(), key],
        )?;
        for (property, target) in &values.references {
            let Some(target) = target else {
                continue;
            };
            self.conn.execute(
                "INSERT INTO object_references (
                    class_id,
                    object_key,
                    property,
                    related_class_id,
                    related_key
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    id.class_id(),
                    key,
                    property,
                    target.class_id(),
                    target.key().to_storage_string()
                ],
            )?;
        }
        Ok(())
    }
}

impl PersistenceProvider for SqlitePersistenceProvider {
    fn load_data_container(&self, id: &ObjectId) -> ProviderResult<Option<LoadedRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT timestamp, payload FROM objects WHERE class_id = ?1 AND object_key = ?2;",
                params![id.class_id(), id.key().to_storage_string()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((timestamp, payload)) => Ok(Some(self.build_record(id.clone(), timestamp, &payload)?)),
            None => Ok(None),
        }
    }

    fn load_data_containers(&self, ids: &[ObjectId]) -> ProviderResult<Vec<Option<LoadedRecord>>> {
        let mut by_class: BTreeMap<&str, Vec<&ObjectId>> = BTreeMap::new();
        for id in ids {
            by_class.entry(id.class_id()).or_default().push(id);
        }

        let mut found: BTreeMap<ObjectId, LoadedRecord> = BTreeMap::new();
        for (class_id, class_ids) in by_class {
            let placeholders = vec!["?"; class_ids.len()].join(", ");
            let sql = format!(
                "SELECT object_key, timestamp, payload FROM objects
                 WHERE class_id = ? AND object_key IN ({placeholders});"
            );
            let mut bind_values = vec![SqlValue::Text(class_id.to_string())];
            bind_values.extend(
                class_ids
                    .iter()
                    .map(|id| SqlValue::Text(id.key().to_storage_string())),
            );

            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let id = parse_object_id(class_id.to_string(), &key)?;
                let record = self.build_record(id.clone(), row.get(1)?, &row.get::<_, String>(2)?)?;
                found.insert(id, record);
            }
        }

        Ok(ids.iter().map(|id| found.remove(id)).collect())
    }

    fn load_data_containers_by_related_id(
        &self,
        query: &RelatedObjectsQuery<'_>,
    ) -> ProviderResult<Vec<LoadedRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT o.class_id, o.object_key, o.timestamp, o.payload
             FROM object_references r
             JOIN objects o ON o.class_id = r.class_id AND o.object_key = r.object_key
             WHERE r.related_class_id = ?1 AND r.related_key = ?2 AND r.property = ?3
             ORDER BY o.class_id ASC, o.object_key ASC;",
        )?;
        let mut rows = stmt.query(params![
            query.related_id.class_id(),
            query.related_id.key().to_storage_string(),
            query.property
        ])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let class_id: String = row.get(0)?;
            if !query.classes.iter().any(|class| class == &class_id) {
                continue;
            }
            let key: String = row.get(1)?;
            let id = parse_object_id(class_id, &key)?;
            records.push(self.build_record(id, row.get(2)?, &row.get::<_, String>(3)?)?);
        }

        if let Some(sort) = query.sort_expression {
            records.sort_by(|left, right| sort.compare(&left.values.scalars, &right.values.scalars));
        }
        debug!(
            "event=provider_load_related module=repo status=ok provider=sqlite property={} rows={}",
            query.property,
            records.len()
        );
        Ok(records)
    }

    fn save(&self, records: &[PersistableRecord]) -> ProviderResult<Vec<(ObjectId, Timestamp)>> {
        let tx = self.conn.unchecked_transaction()?;

        let mut violations = Vec::new();
        for record in records {
            let current = self.current_timestamp(&record.id)?;
            match record.state {
                PersistState::New if current.is_some() => {
                    return Err(ProviderError::DuplicateObject(record.id.clone()));
                }
                PersistState::New => {}
                PersistState::Changed | PersistState::Deleted => {
                    if current.is_none() || current != record.timestamp {
                        violations.push(record.id.clone());
                    }
                }
            }
        }
        if !violations.is_empty() {
            info!(
                "event=provider_save module=repo status=conflict provider=sqlite conflicts={}",
                join_ids(&violations)
            );
            return Err(ProviderError::ConcurrencyViolation(violations));
        }

        let mut saved = Vec::new();
        for record in records {
            let key = record.id.key().to_storage_string();
            match record.state {
                PersistState::Deleted => {
                    self.conn.execute(
                        "DELETE FROM objects WHERE class_id = ?1 AND object_key = ?2;",
                        params![record.id.class_id(), key],
                    )?;
                }
                PersistState::New | PersistState::Changed => {
                    let timestamp = record
                        .timestamp
                        .map_or(Timestamp(1), |previous| Timestamp(previous.0 + 1));
                    let payload = serde_json::to_string(&record.values.scalars).map_err(|err| {
                        ProviderError::InvalidData(format!("cannot encode {}: {err}", record.id))
                    })?;
                    let stored_timestamp = i64::try_from(timestamp.0).map_err(|_| {
                        ProviderError::InvalidData(format!("timestamp overflow for {}", record.id))
                    })?;
                    self.conn.execute(
                        "INSERT INTO objects (class_id, object_key, timestamp, payload)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT (class_id, object_key)
                         DO UPDATE SET timestamp = excluded.timestamp, payload = excluded.payload;",
                        params![record.id.class_id(), key, stored_timestamp, payload],
                    )?;
                    self.write_references(&record.id, &record.values)?;
                    saved.push((record.id.clone(), timestamp));
                }
            }
        }

        tx.commit()?;
        Ok(saved)
    }

    fn create_new_object_id(&self, class: &ResolvedClass) -> ProviderResult<ObjectId> {
        Ok(ObjectId::new_guid(class.name.as_str()))
    }
}

fn parse_object_id(class_id: String, key: &str) -> ProviderResult<ObjectId> {
    let key = ObjectKey::parse_storage_string(key).ok_or_else(|| {
        ProviderError::InvalidData(format!("invalid object key `{key}` for class `{class_id}`"))
    })?;
    Ok(ObjectId::new(class_id, key))
}

fn to_timestamp(value: i64) -> ProviderResult<Timestamp> {
    u64::try_from(value)
        .map(Timestamp)
        .map_err(|_| ProviderError::InvalidData(format!("negative timestamp `{value}`")))
}
