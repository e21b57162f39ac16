//! Forward-only schema migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each step runs in its
//! own transaction together with the version bump, so an interrupted upgrade
//! leaves the database at the previous version.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Migration steps, keyed by the version each one produces.
const STEPS: &[(u32, &str)] = &[(1, schema::SCHEMA_V1)];

/// Counters every database starts with.
const COUNTERS: [&str; 2] = ["batches_applied", "events_applied"];

/// Schema version of an open database.
pub fn version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// # Errors
///
/// [`DbError::Migration`] if the database was written by a newer release.
pub fn run(conn: &Connection) -> Result<()> {
    let found = version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database is at v{found}, this build supports up to v{SCHEMA_VERSION}"
        )));
    }

    for &(target, sql) in STEPS.iter().filter(|(v, _)| *v > found) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        if target == 1 {
            for key in COUNTERS {
                tx.execute(
                    "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, '0')",
                    [key],
                )?;
            }
        }
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        tracing::info!(from = found, to = target, "schema migrated");
    }
    Ok(())
}
