//! Full-text index over note bodies, kept in step with `notes` by triggers.
//!
//! Consistency contract: for every row in `notes` there is exactly one row
//! in `notes_fts` whose rowid equals the note id and whose `body` equals the
//! note body (NULL stored as the empty string); for every deleted note there
//! is none. Triggers enforce this for every write path, including ones that
//! bypass [`NoteService`](crate::NoteService). [`audit`] checks it directly.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use super::probe::{quote_ident, table_exists};
use crate::NoteId;

/// Name of the FTS5 virtual table.
pub const INDEX_TABLE: &str = "notes_fts";

/// Trigger names currently installed.
pub const TRIGGER_NAMES: [&str; 3] = ["notes_fts_insert", "notes_fts_delete", "notes_fts_update"];

/// Trigger names used by earlier releases; removed on install.
const LEGACY_TRIGGER_NAMES: [&str; 3] = ["notes_ai", "notes_ad", "notes_au"];

const CREATE_INDEX_TABLE: &str =
    "CREATE VIRTUAL TABLE notes_fts USING fts5(body, tokenize = 'unicode61');";

/// Canonical trigger bodies. Updates delete then re-insert; FTS5 rows are
/// never edited in place.
const TRIGGERS: [&str; 3] = [
    "CREATE TRIGGER notes_fts_insert AFTER INSERT ON notes BEGIN
        INSERT INTO notes_fts (rowid, body) VALUES (new.id, COALESCE(new.body, ''));
    END;",
    "CREATE TRIGGER notes_fts_delete AFTER DELETE ON notes BEGIN
        DELETE FROM notes_fts WHERE rowid = old.id;
    END;",
    "CREATE TRIGGER notes_fts_update AFTER UPDATE ON notes BEGIN
        DELETE FROM notes_fts WHERE rowid = old.id;
        INSERT INTO notes_fts (rowid, body) VALUES (new.id, COALESCE(new.body, ''));
    END;",
];

/// What [`install`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub table_created: bool,
    pub triggers_dropped: usize,
    pub entries_backfilled: usize,
    pub orphans_removed: usize,
}

/// Creates the index table if missing, reinstalls the triggers from their
/// canonical definitions, then backfills.
///
/// Safe to run any number of times. Should run inside a transaction so the
/// window between dropping and recreating the triggers is never visible.
pub fn install(conn: &Connection) -> rusqlite::Result<InstallReport> {
    let mut report = InstallReport::default();

    // FTS5 table creation goes through a probe rather than IF NOT EXISTS so
    // the report can say whether this run created it.
    if !table_exists(conn, INDEX_TABLE)? {
        conn.execute_batch(CREATE_INDEX_TABLE)?;
        report.table_created = true;
    }

    report.triggers_dropped = drop_triggers(conn)?;
    for trigger in TRIGGERS {
        conn.execute_batch(trigger)?;
    }

    let backfill = backfill(conn)?;
    report.entries_backfilled = backfill.0;
    report.orphans_removed = backfill.1;

    debug!(
        table_created = report.table_created,
        triggers_dropped = report.triggers_dropped,
        backfilled = report.entries_backfilled,
        orphans_removed = report.orphans_removed,
        "text index installed"
    );
    Ok(report)
}

/// Drops every current or legacy index trigger, wherever it lives.
///
/// Names are looked up in both the main and temp schema catalogs and dropped
/// schema-qualified; unqualified drops follow as a fallback.
fn drop_triggers(conn: &Connection) -> rusqlite::Result<usize> {
    let known: Vec<&str> = TRIGGER_NAMES
        .iter()
        .chain(LEGACY_TRIGGER_NAMES.iter())
        .copied()
        .collect();

    let mut dropped = 0;
    for (schema, catalog) in [("main", "sqlite_master"), ("temp", "sqlite_temp_master")] {
        let mut stmt =
            conn.prepare(&format!("SELECT name FROM {catalog} WHERE type = 'trigger'"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for name in names.into_iter().filter(|n| known.contains(&n.as_str())) {
            conn.execute_batch(&format!(
                "DROP TRIGGER IF EXISTS {schema}.{};",
                quote_ident(&name)
            ))?;
            dropped += 1;
        }
    }

    for name in &known {
        conn.execute_batch(&format!("DROP TRIGGER IF EXISTS {};", quote_ident(name)))?;
    }
    Ok(dropped)
}

/// Inserts entries for notes that lack one and removes entries whose note is
/// gone. Returns `(inserted, removed)`.
pub fn backfill(conn: &Connection) -> rusqlite::Result<(usize, usize)> {
    let inserted = conn.execute(
        "INSERT INTO notes_fts (rowid, body)
         SELECT n.id, COALESCE(n.body, '') FROM notes n
         WHERE NOT EXISTS (SELECT 1 FROM notes_fts f WHERE f.rowid = n.id)",
        [],
    )?;
    let removed = conn.execute(
        "DELETE FROM notes_fts WHERE rowid NOT IN (SELECT id FROM notes)",
        [],
    )?;
    Ok((inserted, removed))
}

/// Reads the indexed body for a note, if it has an entry.
pub fn entry(conn: &Connection, id: NoteId) -> rusqlite::Result<Option<String>> {
    use rusqlite::OptionalExtension;

    conn.query_row(
        "SELECT body FROM notes_fts WHERE rowid = ?1",
        [id],
        |row| row.get(0),
    )
    .optional()
}

/// Counts index entries for a note; anything other than 0 or 1 is a defect.
pub fn entry_count(conn: &Connection, id: NoteId) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notes_fts WHERE rowid = ?1",
        [id],
        |row| row.get(0),
    )
}

/// Result of checking the index against `notes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexAudit {
    pub documents: i64,
    pub entries: i64,
    /// Notes with no entry.
    pub missing: Vec<NoteId>,
    /// Entries with no note.
    pub orphaned: Vec<i64>,
    /// Notes whose entry holds a different body.
    pub stale: Vec<NoteId>,
}

impl IndexAudit {
    /// Whether the one-entry-per-live-note contract holds.
    pub fn is_consistent(&self) -> bool {
        self.documents == self.entries
            && self.missing.is_empty()
            && self.orphaned.is_empty()
            && self.stale.is_empty()
    }
}

/// Compares the index with `notes` row by row.
pub fn audit(conn: &Connection) -> rusqlite::Result<IndexAudit> {
    let documents = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
    let entries = conn.query_row("SELECT COUNT(*) FROM notes_fts", [], |row| row.get(0))?;

    let missing = collect_ids(
        conn,
        "SELECT n.id FROM notes n
         WHERE NOT EXISTS (SELECT 1 FROM notes_fts f WHERE f.rowid = n.id)
         ORDER BY n.id",
    )?
    .into_iter()
    .map(NoteId::new)
    .collect();

    let orphaned = collect_ids(
        conn,
        "SELECT f.rowid FROM notes_fts f
         WHERE NOT EXISTS (SELECT 1 FROM notes n WHERE n.id = f.rowid)
         ORDER BY f.rowid",
    )?;

    let stale = collect_ids(
        conn,
        "SELECT n.id FROM notes n JOIN notes_fts f ON f.rowid = n.id
         WHERE f.body IS NOT COALESCE(n.body, '')
         ORDER BY n.id",
    )?
    .into_iter()
    .map(NoteId::new)
    .collect();

    Ok(IndexAudit {
        documents,
        entries,
        missing,
        orphaned,
        stale,
    })
}

fn collect_ids(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Converts free text into an FTS5 expression that matches every term.
///
/// Each term becomes a quoted string, so punctuation in user input is
/// searched for literally instead of parsed as FTS5 syntax. Control
/// characters separate terms like whitespace does; FTS5 rejects a NUL inside
/// a quoted string. Returns `None` when the input has no terms.
pub fn match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
