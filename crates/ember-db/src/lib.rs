//! # ember-db
//!
//! SQLite persistence for the ember reward engine.
//!
//! ## Schema
//!
//! - WAL mode
//! - Engine records stored as JSON documents keyed by `(kind, key)`
//! - Ingest cursor and bookkeeping in `settings`
//! - Schema version stored in `PRAGMA user_version`

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

pub use queries::cursor::Cursor;
pub use store::SqliteStore;

use rusqlite::Connection;
use std::path::Path;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the database at `path`, migrated to [`SCHEMA_VERSION`].
pub fn open(path: &Path) -> Result<Connection> {
    prepare(Connection::open(path)?)
}

/// Private in-memory database, used by tests.
pub fn open_memory() -> Result<Connection> {
    prepare(Connection::open_in_memory()?)
}

/// WAL journal, a busy timeout for a concurrent reader, then migrations.
fn prepare(conn: Connection) -> Result<Connection> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "database opened");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    migrations::run(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_is_migrated() {
        let conn = open_memory().expect("open in-memory db");
        assert_eq!(migrations::version(&conn).expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn test_open_file_uses_wal() {
        let path = std::env::temp_dir().join(format!("ember-db-wal-{}.db", std::process::id()));
        let conn = open(&path).expect("open file db");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("journal_mode");
        assert_eq!(mode.to_lowercase(), "wal");
        drop(conn);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
