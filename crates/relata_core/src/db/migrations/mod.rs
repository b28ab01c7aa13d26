//! Ordered schema steps for the object store.
//!
//! Step `n` moves a store from `user_version = n - 1` to `n`. Pending steps run
//! inside one SQLite transaction, so a failing step leaves the version untouched.

use crate::db::{DbError, DbResult};
use log::debug;
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    script: &'static str,
}

const STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    script: include_str!("0001_object_store.sql"),
}];

/// Newest schema version this build can read and write.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Runs every pending step and returns how many were applied.
pub fn migrate_to_latest(conn: &mut Connection) -> DbResult<usize> {
    let found = schema_version(conn)?;
    let supported = latest_version();
    if found > supported {
        return Err(DbError::SchemaTooNew { found, supported });
    }

    let pending: Vec<&SchemaStep> = STEPS.iter().filter(|step| step.version > found).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.script)
            .and_then(|()| tx.pragma_update(None, "user_version", step.version))
            .map_err(|source| DbError::Migration {
                version: step.version,
                source,
            })?;
        debug!("event=schema_step module=db status=ok version={}", step.version);
    }
    tx.commit()?;
    Ok(pending.len())
}

/// Rejects connections that are not exactly at [`latest_version`].
pub fn ensure_current(conn: &Connection) -> DbResult<()> {
    let found = schema_version(conn)?;
    let expected = latest_version();
    if found != expected {
        return Err(DbError::SchemaMismatch { found, expected });
    }
    Ok(())
}
