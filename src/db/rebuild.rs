//! Shadow-and-swap table rebuild.
//!
//! SQLite cannot drop or change most constraints in place. The general
//! recipe is: create a shadow table with the desired shape, copy every row
//! (keeping ids so foreign keys stay valid), drop the original, rename the
//! shadow into its place, and recreate dependent indexes. The
//! `AUTOINCREMENT` high-water mark of the original is carried over so ids
//! of deleted rows are never handed out again.
//!
//! The rebuild must run inside an explicit transaction opened after
//! foreign-key enforcement has been paused (see
//! [`ForeignKeyPause`](super::session::ForeignKeyPause)); the caller checks
//! `PRAGMA foreign_key_check` before committing.

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::probe::{quote_ident, table_exists};

/// Description of the target shape for a table rebuild.
#[derive(Debug, Clone, Copy)]
pub struct TableRebuild<'a> {
    /// Table being rebuilt.
    pub table: &'a str,
    /// Column definitions and table constraints for the new shape, without
    /// the surrounding `CREATE TABLE name ( ... )`.
    pub definition: &'a str,
    /// Columns copied from the original table, in order. Every one must
    /// exist in both shapes.
    pub columns: &'a [&'a str],
    /// Index statements to run after the swap. They should use
    /// `IF NOT EXISTS`.
    pub indexes: &'a [&'a str],
}

impl TableRebuild<'_> {
    /// Name of the temporary shadow table.
    pub fn shadow_name(&self) -> String {
        format!("{}__shadow", self.table)
    }

    /// Performs the rebuild on a connection that is inside a transaction.
    ///
    /// Returns the number of rows carried over.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open, if the table is missing, if any SQL
    /// statement fails, or if the copied row count differs from the source.
    pub fn execute(&self, conn: &Connection) -> Result<usize> {
        if conn.is_autocommit() {
            bail!("rebuild of `{}` must run inside a transaction", self.table);
        }
        if !table_exists(conn, self.table)? {
            bail!("cannot rebuild missing table `{}`", self.table);
        }

        let table = quote_ident(self.table);
        let shadow = quote_ident(&self.shadow_name());
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        // A shadow left behind by an earlier failed attempt would have been
        // rolled back with its transaction, but a hand-made one is possible.
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {shadow};"))?;
        conn.execute_batch(&format!("CREATE TABLE {shadow} ({});", self.definition))
            .with_context(|| format!("creating shadow for `{}`", self.table))?;

        let copied = conn
            .execute(
                &format!("INSERT INTO {shadow} ({columns}) SELECT {columns} FROM {table};"),
                [],
            )
            .with_context(|| format!("copying rows of `{}`", self.table))?;

        let original: usize =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        if copied != original {
            bail!(
                "rebuild of `{}` copied {copied} of {original} rows",
                self.table
            );
        }

        let high_water = sequence_high_water(conn, self.table)?;
        conn.execute_batch(&format!("DROP TABLE {table};"))?;
        conn.execute_batch(&format!("ALTER TABLE {shadow} RENAME TO {table};"))?;
        if let Some(seq) = high_water {
            restore_sequence(conn, self.table, seq)?;
        }
        for index in self.indexes {
            conn.execute_batch(index)
                .with_context(|| format!("recreating index on `{}`", self.table))?;
        }

        debug!(table = self.table, rows = copied, "table rebuilt");
        Ok(copied)
    }
}

/// Last id handed out for `table` by `AUTOINCREMENT`, if it has one.
fn sequence_high_water(conn: &Connection, table: &str) -> rusqlite::Result<Option<i64>> {
    if !table_exists(conn, "sqlite_sequence")? {
        return Ok(None);
    }
    conn.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = ?1",
        [table],
        |row| row.get(0),
    )
    .optional()
}

fn restore_sequence(conn: &Connection, table: &str, seq: i64) -> rusqlite::Result<()> {
    let updated = conn.execute(
        "UPDATE sqlite_sequence SET seq = MAX(seq, ?2) WHERE name = ?1",
        params![table, seq],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, seq],
        )?;
    }
    Ok(())
}

/// Lists foreign-key violations as `(table, rowid, parent)` triples.
pub fn foreign_key_violations(conn: &Connection) -> rusqlite::Result<Vec<(String, i64, String)>> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                row.get::<_, String>(2)?,
            ))
        })?
        .collect();
    rows
}
