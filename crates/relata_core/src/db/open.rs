//! Connection setup for object-store files.

use super::migrations::{latest_version, migrate_to_latest};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_LOCATION: &str = ":memory:";

/// Opens the store at `path`, creating the file when absent, and brings its
/// schema up to [`latest_version`].
///
/// # Errors
/// - `Open` when SQLite cannot open or create the file.
/// - `SchemaTooNew` when the file was written by a newer build.
/// - `Migration` when a pending schema step fails.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    logged(&path.display().to_string(), || {
        Connection::open(path).map_err(|source| DbError::Open {
            path: path.to_path_buf(),
            source,
        })
    })
}

/// Private in-memory store; gone when the connection drops.
pub fn open_db_in_memory() -> DbResult<Connection> {
    logged(MEMORY_LOCATION, || {
        Connection::open_in_memory().map_err(|source| DbError::Open {
            path: PathBuf::from(MEMORY_LOCATION),
            source,
        })
    })
}

fn logged(location: &str, connect: impl FnOnce() -> DbResult<Connection>) -> DbResult<Connection> {
    let started_at = Instant::now();
    let result = connect().and_then(|mut conn| {
        let applied = configure(&mut conn)?;
        Ok((conn, applied))
    });

    match result {
        Ok((conn, applied)) => {
            info!(
                "event=store_open module=db status=ok location={location} schema_version={} applied_steps={applied} duration_ms={}",
                latest_version(),
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=store_open module=db status=error location={location} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn configure(conn: &mut Connection) -> DbResult<usize> {
    // Reference rows cascade with their owning object row.
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    migrate_to_latest(conn)
}
