//! The schema-version ledger.
//!
//! The highest fully applied migration version is kept in SQLite's
//! `user_version` header field. Writes to it are transactional, so setting it
//! as the last statement of a step's transaction commits the step and the
//! ledger together.

use rusqlite::Connection;

/// Reads the current schema version.
pub fn current(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Records `version` as the highest applied migration.
pub fn advance(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}
