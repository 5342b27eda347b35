pub mod bootstrap;
pub mod ledger;
pub mod migration;
pub mod pool;
pub mod probe;
pub mod rebuild;
pub mod session;
mod steps;
pub mod text_index;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::Config;
use migration::{MigrationContext, MigrationReport};
use pool::ReadPool;
use session::SchemaSession;

/// Store handle: one serialized writer plus, for file databases, a pool of
/// read-only connections.
///
/// Opening runs every pending migration and reconciles the full-text index
/// before any reader exists, so readers only ever see a complete schema.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Option<ReadPool>,
    path: Option<PathBuf>,
    migration: MigrationReport,
}

impl Database {
    /// Opens an in-memory SQLite database.
    ///
    /// Reads go through the writer; there is no reader pool.
    pub fn in_memory() -> Result<Self> {
        Self::open_with_config(&Config::default())
    }

    /// Opens a file-based SQLite database at the given path.
    ///
    /// Creates the database file and its parent directory if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(&Config::default().with_db_path(path.as_ref()))
    }

    /// Opens the store described by `config`.
    ///
    /// # Errors
    ///
    /// Migration failures surface as [`MigrationError`](crate::error::MigrationError)
    /// (reachable through `downcast_ref`); the store must not be used after one.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        let mut conn = match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("creating database directory {}", parent.display())
                    })?;
                }
                Connection::open(path)
                    .with_context(|| format!("opening database {}", path.display()))?
            }
            None => Connection::open_in_memory()?,
        };
        apply_writer_pragmas(&conn, config.db_path.is_some())?;

        let ctx = MigrationContext {
            admin_password: config.admin_password.clone(),
        };
        let report = {
            let session = SchemaSession::acquire(&mut conn)?;
            migration::run(&session, &ctx)?
        };

        // Triggers are reinstalled on every open, not only by the first step.
        let tx = conn.transaction()?;
        let index = text_index::install(&tx)?;
        tx.commit()?;
        debug!(?index, "text index reconciled");

        let readers = match &config.db_path {
            Some(path) => Some(ReadPool::open(path, config.read_connections)?),
            None => None,
        };

        info!(
            path = ?config.db_path,
            schema_version = report.to_version,
            readers = readers.as_ref().map_or(0, ReadPool::size),
            "database ready"
        );

        Ok(Self {
            writer: Mutex::new(conn),
            readers,
            path: config.db_path.clone(),
            migration: report,
        })
    }

    /// Runs `f` with exclusive use of the writer connection.
    pub fn with_writer<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("write lock poisoned"))?;
        f(&mut guard)
    }

    /// Runs `f` on a read connection.
    ///
    /// Falls back to the writer for in-memory stores.
    pub fn with_reader<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        match &self.readers {
            Some(pool) => pool.with_conn(f),
            None => self.with_writer(|conn| f(conn)),
        }
    }

    /// Current schema version as recorded in the ledger.
    pub fn schema_version(&self) -> Result<u32> {
        self.with_writer(|conn| Ok(ledger::current(conn)?))
    }

    /// What the migration run at open time did.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// Database file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of pooled read connections.
    pub fn reader_count(&self) -> usize {
        self.readers.as_ref().map_or(0, ReadPool::size)
    }
}

fn apply_writer_pragmas(conn: &Connection, file_backed: bool) -> Result<()> {
    conn.busy_timeout(pool::READ_BUSY_TIMEOUT)?;
    if file_backed {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

#[cfg(test)]
#[path = "db/tests.rs"]
mod tests;
