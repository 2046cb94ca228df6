use rusqlite::Connection;

use crate::error::StoreError;

pub(crate) const RECORDS_TABLE: &str = "records";

pub fn apply(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY,
            parent_id INTEGER,
            kind TEXT NOT NULL CHECK (kind IN ('group', 'entry')),
            title TEXT NOT NULL,
            subtitle TEXT NOT NULL DEFAULT '',
            position INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (parent_id) REFERENCES records(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS records_parent ON records(parent_id, position);
        "#,
    )?;
    Ok(())
}

pub fn is_applied(conn: &Connection) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [RECORDS_TABLE],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
