//! Key/value bookkeeping: counters and the ingest cursor.

use rusqlite::{Connection, OptionalExtension};

use crate::{DbError, Result};

/// Value stored under `key`, if any.
pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

/// Store `value` under `key`, replacing any previous value.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Counter stored under `key`, or `default` when unset.
pub fn get_u64(conn: &Connection, key: &str, default: u64) -> Result<u64> {
    match get(conn, key)? {
        Some(raw) => raw
            .parse()
            .map_err(|e| DbError::Serialization(format!("setting '{key}' = '{raw}': {e}"))),
        None => Ok(default),
    }
}

/// Add `by` to a counter and return the new value.
pub fn increment(conn: &Connection, key: &str, by: u64) -> Result<u64> {
    let next = get_u64(conn, key, 0)?.saturating_add(by);
    set(conn, key, &next.to_string())?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let conn = crate::open_memory().expect("open");
        assert_eq!(get(&conn, "events_applied").expect("get"), Some("0".to_string()));
        assert_eq!(get(&conn, "nonexistent").expect("get"), None);
    }

    #[test]
    fn test_get_u64_and_increment() {
        let conn = crate::open_memory().expect("open");
        assert_eq!(get_u64(&conn, "missing", 7).expect("get"), 7);
        assert_eq!(increment(&conn, "events_applied", 2).expect("inc"), 2);
        assert_eq!(increment(&conn, "events_applied", 3).expect("inc"), 5);

        set(&conn, "bad", "x").expect("set");
        assert!(matches!(get_u64(&conn, "bad", 0), Err(DbError::Serialization(_))));
    }
}
