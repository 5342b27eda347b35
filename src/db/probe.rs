//! Live schema inspection used to keep migration steps idempotent.

use rusqlite::Connection;
use tracing::debug;

/// Quotes an identifier for interpolation into DDL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Checks whether a table (ordinary or virtual) exists in the main schema.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
}

/// Checks whether a named index exists.
pub fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
        [index],
        |row| row.get(0),
    )
}

/// Checks whether a named trigger exists.
pub fn trigger_exists(conn: &Connection, trigger: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'trigger' AND name = ?1)",
        [trigger],
        |row| row.get(0),
    )
}

/// Lists the column names of a table in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Checks whether a table has a column with the given name.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c == column))
}

/// Adds a column unless the live schema already has it.
///
/// Returns `true` if the column was added.
pub fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> rusqlite::Result<bool> {
    if column_exists(conn, table, column)? {
        return Ok(false);
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {definition};",
        quote_ident(table),
        quote_ident(column)
    ))?;
    debug!(table, column, "added column");
    Ok(true)
}

/// Returns `true` if any column-level UNIQUE constraint exists on `column`.
///
/// SQLite backs such constraints with `sqlite_autoindex_*` indexes whose
/// origin is `u`; those cannot be dropped without rebuilding the table.
pub fn has_column_unique_constraint(
    conn: &Connection,
    table: &str,
    column: &str,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
    let constraint_indexes = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, String>(3)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (index, origin) in constraint_indexes {
        if origin != "u" {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))?;
        let indexed: Vec<Option<String>> = info
            .query_map([], |row| row.get(2))?
            .collect::<rusqlite::Result<_>>()?;
        if indexed.len() == 1 && indexed[0].as_deref() == Some(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns the parent table `column` references through a foreign key, if any.
pub fn foreign_key_target(
    conn: &Connection,
    table: &str,
    column: &str,
) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let from: String = row.get(3)?;
        if from == column {
            return row.get(2).map(Some);
        }
    }
    Ok(None)
}
