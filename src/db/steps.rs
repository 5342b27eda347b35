//! Bodies of the numbered migration steps.
//!
//! Each body runs inside the transaction opened for it by the runner and
//! must be a no-op when its target state already exists: tables and indexes
//! use `IF NOT EXISTS`, columns are probed before being added, and data
//! backfills only touch rows that still need them.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::bootstrap;
use super::migration::MigrationContext;
use super::probe::{add_column_if_missing, foreign_key_target, has_column_unique_constraint};
use super::rebuild::TableRebuild;
use super::text_index;

/// v1: notes, tags, note_tags, users, and the full-text index.
pub(super) fn base_schema(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
            updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))
        );

        -- Global name uniqueness as first shipped; scoped per owner by v7.
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            color TEXT,
            created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))
        );

        CREATE TABLE IF NOT EXISTS note_tags (
            note_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (note_id, tag_id),
            FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            email TEXT,
            created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))
        );

        CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at);
        CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags(tag_id);
        "#,
    )?;

    text_index::install(conn)?;
    Ok(())
}

/// v2: pin flag, content kind, and nullable owner on notes.
pub(super) fn note_columns(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    add_column_if_missing(conn, "notes", "pinned", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "notes", "kind", "TEXT NOT NULL DEFAULT 'markdown'")?;
    // NULL marks a note from before owners existed. Never a reference to
    // users: a deleted user's notes must not become NULL-owner rows.
    add_column_if_missing(conn, "notes", "owner_id", "INTEGER")?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id);
         CREATE INDEX IF NOT EXISTS idx_notes_pinned_created ON notes(pinned, created_at);",
    )?;
    Ok(())
}

/// v3: attachments and their note links.
pub(super) fn resources(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER,
            filename TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            mime_type TEXT,
            size INTEGER,
            sha256 TEXT,
            created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))
        );

        CREATE TABLE IF NOT EXISTS note_resources (
            note_id INTEGER NOT NULL,
            resource_id INTEGER NOT NULL,
            PRIMARY KEY (note_id, resource_id),
            FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
            FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_resources_owner ON resources(owner_id);
        CREATE INDEX IF NOT EXISTS idx_note_resources_resource ON note_resources(resource_id);
        "#,
    )?;
    Ok(())
}

/// v4: administrator flag on users.
pub(super) fn user_admin_flag(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    add_column_if_missing(conn, "users", "is_admin", "INTEGER NOT NULL DEFAULT 0")?;
    Ok(())
}

/// v5: forced password rotation flag, then administrator bootstrap.
pub(super) fn admin_bootstrap(conn: &Connection, ctx: &MigrationContext) -> Result<()> {
    add_column_if_missing(
        conn,
        "users",
        "must_change_password",
        "INTEGER NOT NULL DEFAULT 0",
    )?;
    let outcome = bootstrap::apply(conn, ctx.admin_password.as_deref())?;
    debug!(?outcome, "administrator bootstrap");
    Ok(())
}

/// v6: owner on tags, and a one-time backfill of owner-less rows.
///
/// Rows without an owner are handed to the primary owner (the first
/// administrator, else the first user). With no users yet the rows keep a
/// NULL owner and remain visible to everyone.
pub(super) fn owner_isolation(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    add_column_if_missing(conn, "tags", "owner_id", "INTEGER")?;
    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_owner_name ON tags(owner_id, name);",
    )?;

    let primary: Option<i64> = conn
        .query_row(
            "SELECT id FROM users ORDER BY is_admin DESC, id ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match primary {
        Some(owner) => {
            let notes = conn.execute(
                "UPDATE notes SET owner_id = ?1 WHERE owner_id IS NULL",
                [owner],
            )?;
            let tags = conn.execute(
                "UPDATE tags SET owner_id = ?1 WHERE owner_id IS NULL",
                [owner],
            )?;
            info!(owner, notes, tags, "assigned owner-less rows to primary owner");
        }
        None => {
            let orphans: i64 =
                conn.query_row("SELECT COUNT(*) FROM notes WHERE owner_id IS NULL", [], |row| {
                    row.get(0)
                })?;
            if orphans > 0 {
                warn!(
                    notes = orphans,
                    "no users exist; owner-less notes stay visible to every owner"
                );
            }
        }
    }
    Ok(())
}

/// Target shape of `tags` once name uniqueness is scoped per owner.
pub(super) const TAGS_PER_OWNER: TableRebuild<'static> = TableRebuild {
    table: "tags",
    definition: "id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER,
        name TEXT NOT NULL,
        color TEXT,
        created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))",
    columns: &["id", "owner_id", "name", "color", "created_at"],
    indexes: &["CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_owner_name ON tags(owner_id, name);"],
};

/// v7: drop the column-level UNIQUE on `tags.name` by rebuilding the table.
///
/// Runs with foreign keys paused so `note_tags` rows survive the drop.
pub(super) fn tags_unique_per_owner(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    if !has_column_unique_constraint(conn, "tags", "name")? {
        debug!("tags.name already free of global uniqueness; skipping rebuild");
        return Ok(());
    }
    let rows = TAGS_PER_OWNER.execute(conn)?;
    info!(rows, "rebuilt tags with per-owner name uniqueness");
    Ok(())
}

/// v8: notebooks and note membership.
pub(super) fn notebooks(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS notebooks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            color TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
            updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
            FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS note_notebooks (
            note_id INTEGER NOT NULL,
            notebook_id INTEGER NOT NULL,
            PRIMARY KEY (note_id, notebook_id),
            FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
            FOREIGN KEY (notebook_id) REFERENCES notebooks(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_notebooks_owner ON notebooks(owner_id);
        CREATE INDEX IF NOT EXISTS idx_note_notebooks_notebook ON note_notebooks(notebook_id);
        "#,
    )?;
    Ok(())
}

/// v9: where a note was written.
pub(super) fn note_location(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    add_column_if_missing(conn, "notes", "location", "TEXT")?;
    add_column_if_missing(conn, "notes", "latitude", "REAL")?;
    add_column_if_missing(conn, "notes", "longitude", "REAL")?;
    Ok(())
}

/// Target shape of `notes` with an unconstrained owner column.
pub(super) const NOTES_DETACHED: TableRebuild<'static> = TableRebuild {
    table: "notes",
    definition: "id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
        updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
        pinned INTEGER NOT NULL DEFAULT 0,
        kind TEXT NOT NULL DEFAULT 'markdown',
        owner_id INTEGER,
        location TEXT,
        latitude REAL,
        longitude REAL",
    columns: &[
        "id",
        "title",
        "body",
        "created_at",
        "updated_at",
        "pinned",
        "kind",
        "owner_id",
        "location",
        "latitude",
        "longitude",
    ],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at);",
        "CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id);",
        "CREATE INDEX IF NOT EXISTS idx_notes_pinned_created ON notes(pinned, created_at);",
    ],
};

/// Target shape of `resources` with an unconstrained owner column.
pub(super) const RESOURCES_DETACHED: TableRebuild<'static> = TableRebuild {
    table: "resources",
    definition: "id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER,
        filename TEXT NOT NULL,
        storage_path TEXT NOT NULL,
        mime_type TEXT,
        size INTEGER,
        sha256 TEXT,
        created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))",
    columns: &[
        "id",
        "owner_id",
        "filename",
        "storage_path",
        "mime_type",
        "size",
        "sha256",
        "created_at",
    ],
    indexes: &["CREATE INDEX IF NOT EXISTS idx_resources_owner ON resources(owner_id);"],
};

/// v10: drop the `ON DELETE SET NULL` reference from every owner column.
///
/// Stores migrated before this step nulled a deleted user's notes, tags and
/// attachments, which made them visible to every other owner. Each affected
/// table is rebuilt with a plain owner column; ids and links are kept.
/// Rebuilding `notes` drops its index triggers, so they are reinstalled.
pub(super) fn detach_owners(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    for rebuild in [NOTES_DETACHED, RESOURCES_DETACHED, TAGS_PER_OWNER] {
        if foreign_key_target(conn, rebuild.table, "owner_id")?.is_none() {
            debug!(table = rebuild.table, "owner column already detached");
            continue;
        }
        let rows = rebuild.execute(conn)?;
        info!(table = rebuild.table, rows, "rebuilt with a detached owner column");
    }
    text_index::install(conn)?;
    Ok(())
}
