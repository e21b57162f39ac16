//! [`ember_engine::Store`] over SQLite.
//!
//! Each engine batch is applied in one transaction. A staged ingest cursor
//! is written in the same transaction, so an event's records and the marker
//! saying it was applied become durable together.

use std::path::Path;

use ember_engine::{Store, StoreError, Write};
use rusqlite::Connection;

use crate::queries::cursor::{self, Cursor};
use crate::queries::{entities, settings};
use crate::{DbError, Result};

pub struct SqliteStore {
    conn: Connection,
    staged_cursor: Option<Cursor>,
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            staged_cursor: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(crate::open(path)?))
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self::new(crate::open_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Last applied ingest position.
    pub fn cursor(&self) -> Result<Option<Cursor>> {
        cursor::get(&self.conn)
    }

    /// Write `position` together with the next applied batch.
    pub fn stage_cursor(&mut self, position: Cursor) {
        self.staged_cursor = Some(position);
    }

    /// Write the staged cursor on its own, for events that produced no batch.
    pub fn flush_cursor(&mut self) -> Result<()> {
        let Some(position) = self.staged_cursor.take() else {
            return Ok(());
        };
        let tx = self.conn.transaction()?;
        cursor::set(&tx, position)?;
        settings::increment(&tx, "events_applied", 1)?;
        tx.commit()?;
        Ok(())
    }

    /// Drop a staged cursor whose event failed.
    pub fn discard_cursor(&mut self) {
        self.staged_cursor = None;
    }

    fn apply_batch(&mut self, writes: &[Write]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for write in writes {
            entities::put(&tx, write.kind, &write.key, &write.body)?;
        }
        settings::increment(&tx, "batches_applied", 1)?;
        if let Some(position) = self.staged_cursor {
            cursor::set(&tx, position)?;
            settings::increment(&tx, "events_applied", 1)?;
        }
        tx.commit()?;
        self.staged_cursor = None;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn fetch(&self, kind: &str, key: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(entities::get(&self.conn, kind, key)?)
    }

    fn scan(&self, kind: &str) -> std::result::Result<Vec<(String, String)>, StoreError> {
        Ok(entities::scan(&self.conn, kind)?)
    }

    fn apply(&mut self, writes: Vec<Write>) -> std::result::Result<(), StoreError> {
        let count = writes.len();
        self.apply_batch(&writes)
            .map_err(|e| StoreError::Apply(e.to_string()))?;
        tracing::trace!(writes = count, "batch persisted");
        Ok(())
    }
}
