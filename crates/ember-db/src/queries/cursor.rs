//! Ingest cursor: chain position of the last applied event.

use rusqlite::Connection;

use crate::queries::settings;
use crate::{DbError, Result};

const KEY: &str = "ingest_cursor";

/// `(block, log_index)` of an applied event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub block: u64,
    pub log_index: u64,
}

/// The last applied position, if any event was applied.
pub fn get(conn: &Connection) -> Result<Option<Cursor>> {
    let Some(raw) = settings::get(conn, KEY)? else {
        return Ok(None);
    };
    let (block, log_index) = raw
        .split_once(':')
        .ok_or_else(|| DbError::Serialization(format!("cursor '{raw}'")))?;
    let parse = |s: &str| {
        s.parse::<u64>()
            .map_err(|e| DbError::Serialization(format!("cursor '{raw}': {e}")))
    };
    Ok(Some(Cursor {
        block: parse(block)?,
        log_index: parse(log_index)?,
    }))
}

/// Record `cursor` as the last applied position.
pub fn set(conn: &Connection, cursor: Cursor) -> Result<()> {
    settings::set(conn, KEY, &format!("{}:{}", cursor.block, cursor.log_index))
}
