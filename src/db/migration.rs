//! Ordered, versioned schema migrations.
//!
//! The ledger is `PRAGMA user_version`. Each step runs in its own
//! transaction and advances the ledger as its last statement, so a step is
//! either fully applied and recorded or not applied at all.

use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, info};

use super::ledger;
use super::probe::{
    column_exists, foreign_key_target, has_column_unique_constraint, index_exists, table_exists,
    trigger_exists,
};
use super::rebuild::foreign_key_violations;
use super::session::{ForeignKeyPause, SchemaSession};
use super::steps;
use super::text_index::{INDEX_TABLE, TRIGGER_NAMES};
use crate::error::MigrationError;

/// Inputs a step may need beyond the connection.
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    /// Operator-supplied administrator password, if any.
    pub admin_password: Option<String>,
}

/// A piece of schema a step promises to leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Table(&'static str),
    Column(&'static str, &'static str),
    Index(&'static str),
    Trigger(&'static str),
    /// The column carries no column-level UNIQUE constraint.
    NotUnique(&'static str, &'static str),
    /// The column references no other table.
    Unreferenced(&'static str, &'static str),
}

impl Expect {
    fn holds(self, conn: &Connection) -> rusqlite::Result<bool> {
        match self {
            Self::Table(t) => table_exists(conn, t),
            Self::Column(t, c) => column_exists(conn, t, c),
            Self::Index(i) => index_exists(conn, i),
            Self::Trigger(t) => trigger_exists(conn, t),
            Self::NotUnique(t, c) => has_column_unique_constraint(conn, t, c).map(|u| !u),
            Self::Unreferenced(t, c) => foreign_key_target(conn, t, c).map(|p| p.is_none()),
        }
    }

    fn describe(self) -> String {
        match self {
            Self::Table(t) => format!("table `{t}` missing"),
            Self::Column(t, c) => format!("column `{t}.{c}` missing"),
            Self::Index(i) => format!("index `{i}` missing"),
            Self::Trigger(t) => format!("trigger `{t}` missing"),
            Self::NotUnique(t, c) => format!("column `{t}.{c}` is still globally unique"),
            Self::Unreferenced(t, c) => format!("column `{t}.{c}` still has a foreign key"),
        }
    }
}

/// Step body signature.
pub type StepFn = fn(&Connection, &MigrationContext) -> anyhow::Result<()>;

/// One numbered schema change.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: StepFn,
    /// Run with foreign-key enforcement paused; `PRAGMA foreign_key_check`
    /// must come back clean before the step commits.
    pub pauses_foreign_keys: bool,
    pub expects: &'static [Expect],
}

impl Migration {
    pub const fn new(
        version: u32,
        description: &'static str,
        apply: StepFn,
        expects: &'static [Expect],
    ) -> Self {
        Self {
            version,
            description,
            apply,
            pauses_foreign_keys: false,
            expects,
        }
    }

    pub const fn pausing_foreign_keys(mut self) -> Self {
        self.pauses_foreign_keys = true;
        self
    }
}

/// Registry of all migrations in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "Base schema: notes, tags, note_tags, users, full-text index",
        steps::base_schema,
        &[
            Expect::Table("notes"),
            Expect::Table("tags"),
            Expect::Table("note_tags"),
            Expect::Table("users"),
            Expect::Table(INDEX_TABLE),
            Expect::Trigger(TRIGGER_NAMES[0]),
            Expect::Trigger(TRIGGER_NAMES[1]),
            Expect::Trigger(TRIGGER_NAMES[2]),
        ],
    ),
    Migration::new(
        2,
        "Add pinned, kind and owner_id to notes",
        steps::note_columns,
        &[
            Expect::Column("notes", "pinned"),
            Expect::Column("notes", "kind"),
            Expect::Column("notes", "owner_id"),
            Expect::Index("idx_notes_owner"),
        ],
    ),
    Migration::new(
        3,
        "Attachments: resources and note_resources",
        steps::resources,
        &[
            Expect::Table("resources"),
            Expect::Table("note_resources"),
            Expect::Index("idx_note_resources_resource"),
        ],
    ),
    Migration::new(
        4,
        "Add is_admin to users",
        steps::user_admin_flag,
        &[Expect::Column("users", "is_admin")],
    ),
    Migration::new(
        5,
        "Add must_change_password to users and bootstrap the administrator",
        steps::admin_bootstrap,
        &[Expect::Column("users", "must_change_password")],
    ),
    Migration::new(
        6,
        "Add owner_id to tags and backfill owner-less rows",
        steps::owner_isolation,
        &[
            Expect::Column("tags", "owner_id"),
            Expect::Index("idx_tags_owner_name"),
        ],
    ),
    Migration::new(
        7,
        "Scope tag name uniqueness to the owner",
        steps::tags_unique_per_owner,
        &[
            Expect::NotUnique("tags", "name"),
            Expect::Index("idx_tags_owner_name"),
        ],
    )
    .pausing_foreign_keys(),
    Migration::new(
        8,
        "Notebooks and note_notebooks",
        steps::notebooks,
        &[Expect::Table("notebooks"), Expect::Table("note_notebooks")],
    ),
    Migration::new(
        9,
        "Add location, latitude and longitude to notes",
        steps::note_location,
        &[
            Expect::Column("notes", "location"),
            Expect::Column("notes", "latitude"),
            Expect::Column("notes", "longitude"),
        ],
    ),
    Migration::new(
        10,
        "Detach owner columns from users",
        steps::detach_owners,
        &[
            Expect::Unreferenced("notes", "owner_id"),
            Expect::Unreferenced("resources", "owner_id"),
            Expect::Unreferenced("tags", "owner_id"),
            Expect::Index("idx_notes_owner"),
            Expect::Index("idx_tags_owner_name"),
            Expect::Trigger(TRIGGER_NAMES[0]),
            Expect::Trigger(TRIGGER_NAMES[1]),
            Expect::Trigger(TRIGGER_NAMES[2]),
        ],
    )
    .pausing_foreign_keys(),
];

/// Highest version in a registry, or 0 when it is empty.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |m| m.version)
}

/// Checks that versions start at 1 and increase by exactly one.
pub fn validate_registry(migrations: &[Migration]) -> Result<(), MigrationError> {
    for (expected, migration) in (1u32..).zip(migrations) {
        if migration.version != expected {
            return Err(MigrationError::InvalidRegistry(
                "versions must be contiguous and start at 1",
            ));
        }
    }
    Ok(())
}

/// What a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Brings the schema to the latest version.
pub fn run(
    session: &SchemaSession<'_>,
    ctx: &MigrationContext,
) -> Result<MigrationReport, MigrationError> {
    run_registry(session, MIGRATIONS, ctx)
}

/// Applies every step of `migrations` newer than the ledger, in order.
///
/// Stops at the first failure; earlier steps stay committed and the ledger
/// names the last one that succeeded.
pub(crate) fn run_registry(
    conn: &Connection,
    migrations: &[Migration],
    ctx: &MigrationContext,
) -> Result<MigrationReport, MigrationError> {
    validate_registry(migrations)?;

    let current = ledger::current(conn)?;
    let latest = latest_version(migrations);
    if current > latest {
        return Err(MigrationError::UnsupportedVersion {
            found: current,
            latest,
        });
    }

    let mut report = MigrationReport {
        from_version: current,
        to_version: current,
        applied: Vec::new(),
    };

    for migration in migrations {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied");
            continue;
        }
        apply_step(conn, migration, ctx)?;
        report.to_version = migration.version;
        report.applied.push(migration.version);
    }

    if report.is_noop() {
        debug!(version = current, "schema up to date");
    } else {
        info!(
            from = report.from_version,
            to = report.to_version,
            applied = report.applied.len(),
            "schema migrated"
        );
    }
    Ok(report)
}

fn apply_step(
    conn: &Connection,
    migration: &Migration,
    ctx: &MigrationContext,
) -> Result<(), MigrationError> {
    let started = Instant::now();
    let version = migration.version;

    let _pause = if migration.pauses_foreign_keys {
        Some(ForeignKeyPause::engage(conn)?)
    } else {
        None
    };
    let tx = conn.unchecked_transaction()?;

    (migration.apply)(&tx, ctx)
        .map_err(|e| MigrationError::step(version, migration.description, e))?;

    for expect in migration.expects {
        if !expect.holds(&tx)? {
            return Err(MigrationError::PostCondition {
                version,
                detail: expect.describe(),
            });
        }
    }

    if migration.pauses_foreign_keys {
        let violations = foreign_key_violations(&tx)?;
        if let Some((table, rowid, parent)) = violations.first() {
            return Err(MigrationError::PostCondition {
                version,
                detail: format!(
                    "{} foreign-key violation(s), first in `{table}` row {rowid} -> `{parent}`",
                    violations.len()
                ),
            });
        }
    }

    ledger::advance(&tx, version)?;
    tx.commit()?;

    info!(
        version,
        description = migration.description,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "applied migration"
    );
    Ok(())
}
