//! Engine record queries.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Load one document.
pub fn get(conn: &Connection, kind: &str, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT body FROM entities WHERE kind = ?1 AND key = ?2",
            [kind, key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert or replace one document.
pub fn put(conn: &Connection, kind: &str, key: &str, body: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO entities (kind, key, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (kind, key) DO UPDATE SET body = excluded.body",
        [kind, key, body],
    )?;
    Ok(())
}

/// Every document of a kind as `(key, body)`, ordered by key.
pub fn scan(conn: &Connection, kind: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, body FROM entities WHERE kind = ?1 ORDER BY key")?;
    let rows = stmt.query_map([kind], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Number of documents of a kind.
pub fn count(conn: &Connection, kind: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE kind = ?1",
        [kind],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
