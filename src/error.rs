//! Error types for schema migration and filter parsing.
//!
//! Service operations use `anyhow::Result`; the types here cover the two
//! places where callers need to tell failures apart.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure while bringing the schema up to date.
///
/// Every variant is fatal: a store that reports one must not serve traffic.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The migration registry itself is malformed.
    #[error("invalid migration registry: {0}")]
    InvalidRegistry(&'static str),

    /// A step's body failed; its transaction was rolled back.
    #[error("migration v{version} ({description}) failed: {source}")]
    StepFailed {
        version: u32,
        description: &'static str,
        #[source]
        source: BoxError,
    },

    /// A step ran but its promised end state is not present.
    #[error("migration v{version} post-condition failed: {detail}")]
    PostCondition { version: u32, detail: String },

    /// The database was written by a newer build.
    #[error("database schema v{found} is newer than the latest known v{latest}")]
    UnsupportedVersion { found: u32, latest: u32 },

    /// Reading the schema version or managing the session failed.
    #[error("schema session error: {0}")]
    Session(#[from] rusqlite::Error),
}

impl MigrationError {
    /// Returns the version of the step that failed, when one did.
    pub fn version(&self) -> Option<u32> {
        match self {
            Self::StepFailed { version, .. } | Self::PostCondition { version, .. } => {
                Some(*version)
            }
            _ => None,
        }
    }

    pub(crate) fn step(version: u32, description: &'static str, source: anyhow::Error) -> Self {
        Self::StepFailed {
            version,
            description,
            source: source.into(),
        }
    }
}

/// A filter value that could not be parsed and was therefore ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("invalid date for `{field}`: {value:?}")]
    InvalidDate { field: &'static str, value: String },

    #[error("invalid boolean for `{field}`: {value:?}")]
    InvalidBool { field: &'static str, value: String },

    #[error("invalid integer for `{field}`: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

impl FilterError {
    /// Name of the filter that was dropped.
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidDate { field, .. }
            | Self::InvalidBool { field, .. }
            | Self::InvalidNumber { field, .. } => field,
        }
    }
}
