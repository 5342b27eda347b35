//! Runtime configuration read from the environment.
//!
//! Variables may also come from a `.env` file in the working directory.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

/// Default number of read-only worker connections.
pub const DEFAULT_READ_CONNECTIONS: usize = 4;

/// Upper bound on read-only worker connections.
pub const MAX_READ_CONNECTIONS: usize = 8;

const ENV_DB_PATH: &str = "MEMOSTORE_DB_PATH";
const ENV_ADMIN_PASSWORD: &str = "MEMOSTORE_ADMIN_PASSWORD";
const ENV_READ_CONNECTIONS: &str = "MEMOSTORE_READ_CONNECTIONS";

/// Settings consumed when opening a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Database file location. `None` opens an in-memory store.
    pub db_path: Option<PathBuf>,
    /// Operator-supplied administrator password; always overrides the stored one
    /// during bootstrap.
    pub admin_password: Option<String>,
    /// Number of read-only worker connections for file-backed stores.
    pub read_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            admin_password: None,
            read_connections: DEFAULT_READ_CONNECTIONS,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no database path is configured and the platform
    /// data directory cannot be determined.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = match lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path.trim()),
            None => default_database_path()?,
        };

        let admin_password = lookup(ENV_ADMIN_PASSWORD)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let read_connections = match lookup(ENV_READ_CONNECTIONS) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    warn!(
                        value = %raw,
                        default = DEFAULT_READ_CONNECTIONS,
                        "ignoring unparseable {ENV_READ_CONNECTIONS}"
                    );
                    DEFAULT_READ_CONNECTIONS
                }
            },
            None => DEFAULT_READ_CONNECTIONS,
        };

        Ok(Self {
            db_path: Some(db_path),
            admin_password,
            read_connections: read_connections.clamp(1, MAX_READ_CONNECTIONS),
        })
    }

    /// Returns a copy pointing at the given database file.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Returns a copy with an administrator password override.
    pub fn with_admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(password.into());
        self
    }
}

/// Gets the cross-platform database path.
///
/// Returns the path as `{data_dir}/memostore/notes.db` where `data_dir` is:
/// - Linux: `~/.local/share`
/// - macOS: `~/Library/Application Support`
/// - Windows: `C:\Users\<user>\AppData\Roaming`
pub fn default_database_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Failed to determine data directory"))?;

    Ok(data_dir.join("memostore").join("notes.db"))
}
