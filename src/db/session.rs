//! Exclusive schema-mutation session.
//!
//! All DDL during a migration run goes through one connection, held by
//! mutable borrow for the whole run so nothing else can touch it.

use std::ops::Deref;

use rusqlite::Connection;
use tracing::{debug, warn};

/// A connection reserved for schema changes.
///
/// Dropping the session rolls back any transaction left open and restores
/// foreign-key enforcement, whichever way the run ended.
pub struct SchemaSession<'c> {
    conn: &'c mut Connection,
}

impl<'c> SchemaSession<'c> {
    /// Takes exclusive use of `conn` for schema work.
    pub fn acquire(conn: &'c mut Connection) -> rusqlite::Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }
}

impl Deref for SchemaSession<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for SchemaSession<'_> {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            warn!("schema session released with an open transaction; rolling back");
            if let Err(e) = self.conn.execute_batch("ROLLBACK;") {
                warn!(error = %e, "rollback on session release failed");
            }
        }
        if let Err(e) = self.conn.pragma_update(None, "foreign_keys", true) {
            warn!(error = %e, "failed to re-enable foreign keys on session release");
        }
    }
}

/// Suspends foreign-key enforcement until dropped.
///
/// SQLite ignores `PRAGMA foreign_keys` inside a transaction, so the pause
/// must be engaged before the transaction it protects begins.
pub struct ForeignKeyPause<'c> {
    conn: &'c Connection,
}

impl<'c> ForeignKeyPause<'c> {
    pub fn engage(conn: &'c Connection) -> rusqlite::Result<Self> {
        if !conn.is_autocommit() {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some("foreign-key pause must start outside a transaction".to_string()),
            ));
        }
        conn.pragma_update(None, "foreign_keys", false)?;
        debug!("foreign keys paused");
        Ok(Self { conn })
    }
}

impl Drop for ForeignKeyPause<'_> {
    fn drop(&mut self) {
        match self.conn.pragma_update(None, "foreign_keys", true) {
            Ok(()) => debug!("foreign keys resumed"),
            Err(e) => warn!(error = %e, "failed to resume foreign keys"),
        }
    }
}

/// Reads whether foreign-key enforcement is on.
pub fn foreign_keys_enabled(conn: &Connection) -> rusqlite::Result<bool> {
    conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))
}
