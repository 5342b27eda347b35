//! Round-robin pool of read-only connections.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use rusqlite::{Connection, OpenFlags};

use crate::config::MAX_READ_CONNECTIONS;

/// How long a reader waits on a locked database before giving up.
pub const READ_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only connections to a file database, handed out in turn.
pub struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    /// Opens `size` read-only connections, clamped to `1..=MAX_READ_CONNECTIONS`.
    ///
    /// The schema must already be migrated: readers cannot create anything.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        let size = size.clamp(1, MAX_READ_CONNECTIONS);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI,
            )?;
            conn.busy_timeout(READ_BUSY_TIMEOUT)?;
            conn.pragma_update(None, "query_only", true)?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    /// Runs `f` on the next reader.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let guard = self.connections[idx]
            .lock()
            .map_err(|_| anyhow!("read pool lock poisoned"))?;
        f(&guard)
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }
}
