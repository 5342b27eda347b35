use super::*;
use crate::error::MigrationError;
use migration::{Expect, MIGRATIONS, Migration, latest_version, run_registry, validate_registry};
use probe::{column_exists, has_column_unique_constraint, index_exists, table_exists, trigger_exists};
use tempfile::tempdir;

fn names(conn: &Connection, kind: &str) -> Vec<String> {
    conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
        .unwrap()
        .query_map([kind], |row| row.get(0))
        .unwrap()
        .filter_map(|r| r.ok())
        .collect()
}

fn schema_snapshot(conn: &Connection) -> Vec<(String, Option<String>)> {
    conn.prepare("SELECT name, sql FROM sqlite_master ORDER BY type, name")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .filter_map(|r| r.ok())
        .collect()
}

/// Shape of a store written by a build that predates the ledger.
fn legacy_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE notes (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             title TEXT NOT NULL DEFAULT '',
             body TEXT NOT NULL DEFAULT '',
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE TABLE tags (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL UNIQUE,
             color TEXT,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE note_tags (
             note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
             tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
             PRIMARY KEY (note_id, tag_id)
         );
         CREATE TABLE users (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             username TEXT NOT NULL UNIQUE,
             password TEXT NOT NULL,
             email TEXT,
             created_at INTEGER NOT NULL
         );
         CREATE VIRTUAL TABLE notes_fts USING fts5(body, tokenize = 'unicode61');
         CREATE TRIGGER notes_ai AFTER INSERT ON notes BEGIN
             INSERT INTO notes_fts (rowid, body) VALUES (new.id, new.body);
         END;
         INSERT INTO users (username, password, created_at) VALUES ('alice', 'x', 1);
         INSERT INTO notes (title, body, created_at, updated_at)
             VALUES ('one', 'first body', 10, 10), ('two', 'second body', 20, 20);
         INSERT INTO tags (name, created_at) VALUES ('work', 1), ('home', 1);
         INSERT INTO note_tags (note_id, tag_id) VALUES (1, 1), (2, 1), (2, 2);",
    )
    .unwrap();
}

#[test]
fn in_memory_reaches_latest_version() {
    let db = Database::in_memory().unwrap();
    assert_eq!(db.schema_version().unwrap(), latest_version(MIGRATIONS));
    assert_eq!(db.migration_report().from_version, 0);
    assert_eq!(
        db.migration_report().applied,
        (1..=latest_version(MIGRATIONS)).collect::<Vec<_>>()
    );
    assert_eq!(db.reader_count(), 0);
    assert!(db.path().is_none());
}

#[test]
fn schema_objects_exist() {
    let db = Database::in_memory().unwrap();
    db.with_writer(|conn| {
        let tables = names(conn, "table");
        for table in [
            "notes",
            "tags",
            "note_tags",
            "users",
            "resources",
            "note_resources",
            "notebooks",
            "note_notebooks",
            "notes_fts",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }

        let indexes = names(conn, "index");
        for index in [
            "idx_notes_created",
            "idx_notes_owner",
            "idx_note_tags_tag",
            "idx_note_resources_resource",
            "idx_tags_owner_name",
        ] {
            assert!(indexes.contains(&index.to_string()), "missing index {index}");
        }

        assert_eq!(
            names(conn, "trigger"),
            vec!["notes_fts_delete", "notes_fts_insert", "notes_fts_update"]
        );

        for (table, column) in [
            ("notes", "pinned"),
            ("notes", "kind"),
            ("notes", "owner_id"),
            ("notes", "location"),
            ("notes", "latitude"),
            ("notes", "longitude"),
            ("tags", "owner_id"),
            ("users", "is_admin"),
            ("users", "must_change_password"),
        ] {
            assert!(column_exists(conn, table, column)?, "missing {table}.{column}");
        }
        assert!(!has_column_unique_constraint(conn, "tags", "name")?);
        Ok(())
    })
    .unwrap();
}

#[test]
fn foreign_keys_enabled() {
    let db = Database::in_memory().unwrap();
    let fk: i32 = db
        .with_writer(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
        .unwrap();
    assert_eq!(fk, 1);
}

#[test]
fn open_creates_file_and_parent_directory() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("notes.db");
    let db = Database::open(&db_path).unwrap();
    assert!(db_path.exists());
    assert_eq!(db.path(), Some(db_path.as_path()));
    assert_eq!(db.reader_count(), crate::config::DEFAULT_READ_CONNECTIONS);
}

#[test]
fn reopen_is_a_noop_and_leaves_schema_identical() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("notes.db");

    let before = {
        let db = Database::open(&db_path).unwrap();
        db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO notes (title, body, created_at, updated_at) VALUES ('t', 'b', 1, 1)",
                [],
            )?;
            Ok(schema_snapshot(conn))
        })
        .unwrap()
    };

    let db = Database::open(&db_path).unwrap();
    assert!(db.migration_report().is_noop());
    let (after, count, entries) = db
        .with_writer(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?;
            let entries = text_index::entry_count(conn, crate::NoteId::new(1))?;
            Ok((schema_snapshot(conn), count, entries))
        })
        .unwrap();
    assert_eq!(before, after);
    assert_eq!(count, 1);
    assert_eq!(entries, 1);
}

#[test]
fn legacy_store_is_upgraded_in_place() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");
    legacy_store(&db_path);

    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.schema_version().unwrap(), latest_version(MIGRATIONS));

    db.with_writer(|conn| {
        // Old trigger gone, canonical ones in place.
        assert!(!trigger_exists(conn, "notes_ai")?);
        assert!(trigger_exists(conn, "notes_fts_insert")?);

        // Rows and links survived the tags rebuild with their ids.
        let links: Vec<(i64, i64)> = conn
            .prepare("SELECT note_id, tag_id FROM note_tags ORDER BY note_id, tag_id")?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        assert_eq!(links, vec![(1, 1), (2, 1), (2, 2)]);
        assert!(!has_column_unique_constraint(conn, "tags", "name")?);

        // Owner-less rows were handed to the first user.
        let unowned: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM notes WHERE owner_id IS NULL)
                  + (SELECT COUNT(*) FROM tags WHERE owner_id IS NULL)",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(unowned, 0);

        // Both existing notes are indexed exactly once.
        let audit = text_index::audit(conn)?;
        assert!(audit.is_consistent(), "{audit:?}");
        assert_eq!(audit.entries, 2);
        Ok(())
    })
    .unwrap();
}

#[test]
fn legacy_triggers_are_dropped_on_every_open() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("notes.db");
    drop(Database::open(&db_path).unwrap());

    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER notes_au AFTER UPDATE ON notes BEGIN
                 INSERT INTO notes_fts (rowid, body) VALUES (new.id, new.body);
             END;",
        )
        .unwrap();
    }

    let db = Database::open(&db_path).unwrap();
    db.with_writer(|conn| {
        assert!(!trigger_exists(conn, "notes_au")?);
        conn.execute(
            "INSERT INTO notes (title, body, created_at, updated_at) VALUES ('t', 'old', 1, 1)",
            [],
        )?;
        conn.execute("UPDATE notes SET body = 'new' WHERE id = 1", [])?;
        assert_eq!(text_index::entry_count(conn, crate::NoteId::new(1))?, 1);
        assert_eq!(
            text_index::entry(conn, crate::NoteId::new(1))?.as_deref(),
            Some("new")
        );
        Ok(())
    })
    .unwrap();
}

#[test]
fn newer_schema_is_refused() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("future.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        ledger::advance(&conn, 99).unwrap();
    }

    let err = Database::open(&db_path).err().unwrap();
    match err.downcast_ref::<MigrationError>() {
        Some(MigrationError::UnsupportedVersion { found, latest }) => {
            assert_eq!(*found, 99);
            assert_eq!(*latest, latest_version(MIGRATIONS));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn readers_cannot_write() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("notes.db")).unwrap();
    let result = db.with_reader(|conn| {
        conn.execute(
            "INSERT INTO notes (title, body, created_at, updated_at) VALUES ('t', 'b', 1, 1)",
            [],
        )?;
        Ok(())
    });
    assert!(result.is_err());
}

#[test]
fn readers_see_committed_writes() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("notes.db")).unwrap();
    db.with_writer(|conn| {
        conn.execute(
            "INSERT INTO notes (title, body, created_at, updated_at) VALUES ('t', 'b', 1, 1)",
            [],
        )?;
        Ok(())
    })
    .unwrap();

    for _ in 0..db.reader_count() {
        let count: i64 = db
            .with_reader(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }
}

#[test]
fn bootstrap_override_is_applied_at_open() {
    let config = Config::default().with_admin_password("Override123!");
    let db = Database::open_with_config(&config).unwrap();
    let (hash, must_change): (String, bool) = db
        .with_writer(|conn| {
            Ok(conn.query_row(
                "SELECT password, must_change_password FROM users WHERE username = 'admin'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .unwrap();
    assert!(crate::password::verify_password("Override123!", &hash));
    assert!(must_change);
}

// Registry-level behavior, exercised against bare connections.

fn ok_step(conn: &Connection, _: &MigrationContext) -> anyhow::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS first (id INTEGER PRIMARY KEY);")?;
    Ok(())
}

fn failing_step(conn: &Connection, _: &MigrationContext) -> anyhow::Result<()> {
    conn.execute_batch("CREATE TABLE second (id INTEGER PRIMARY KEY);")?;
    anyhow::bail!("boom")
}

fn lazy_step(_: &Connection, _: &MigrationContext) -> anyhow::Result<()> {
    Ok(())
}

#[test]
fn failed_step_rolls_back_and_keeps_earlier_ledger() {
    let conn = Connection::open_in_memory().unwrap();
    let registry = [
        Migration::new(1, "first", ok_step, &[Expect::Table("first")]),
        Migration::new(2, "second", failing_step, &[]),
    ];

    let err = run_registry(&conn, &registry, &MigrationContext::default()).unwrap_err();
    assert!(matches!(err, MigrationError::StepFailed { version: 2, .. }));
    assert_eq!(err.version(), Some(2));
    assert_eq!(ledger::current(&conn).unwrap(), 1);
    assert!(table_exists(&conn, "first").unwrap());
    assert!(!table_exists(&conn, "second").unwrap());

    // A later run starts where the failed one stopped.
    let retry = [registry[0]];
    let report = run_registry(&conn, &retry, &MigrationContext::default()).unwrap();
    assert!(report.is_noop());
}

#[test]
fn missing_postcondition_is_fatal() {
    let conn = Connection::open_in_memory().unwrap();
    let registry = [Migration::new(1, "lazy", lazy_step, &[Expect::Table("never_created")])];

    let err = run_registry(&conn, &registry, &MigrationContext::default()).unwrap_err();
    match err {
        MigrationError::PostCondition { version, detail } => {
            assert_eq!(version, 1);
            assert!(detail.contains("never_created"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ledger::current(&conn).unwrap(), 0);
}

#[test]
fn registry_must_be_contiguous() {
    assert!(validate_registry(MIGRATIONS).is_ok());
    let gap = [
        Migration::new(1, "a", lazy_step, &[]),
        Migration::new(3, "c", lazy_step, &[]),
    ];
    assert!(matches!(
        validate_registry(&gap),
        Err(MigrationError::InvalidRegistry(_))
    ));
    let zero = [Migration::new(0, "z", lazy_step, &[])];
    assert!(validate_registry(&zero).is_err());
}

#[test]
fn only_table_rebuilds_pause_foreign_keys() {
    let pausing: Vec<u32> = MIGRATIONS
        .iter()
        .filter(|m| m.pauses_foreign_keys)
        .map(|m| m.version)
        .collect();
    assert_eq!(pausing, vec![7, 10]);
}

/// A v9 store written while owner columns still referenced `users` with
/// `ON DELETE SET NULL`.
fn store_with_owner_references() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", true).unwrap();
    run_registry(&conn, &MIGRATIONS[..9], &MigrationContext::default()).unwrap();
    {
        let _pause = session::ForeignKeyPause::engage(&conn).unwrap();
        let tx = conn.unchecked_transaction().unwrap();
        for shape in [steps::NOTES_DETACHED, steps::RESOURCES_DETACHED, steps::TAGS_PER_OWNER] {
            let definition = shape.definition.replace(
                "owner_id INTEGER,",
                "owner_id INTEGER REFERENCES users(id) ON DELETE SET NULL,",
            );
            rebuild::TableRebuild {
                definition: &definition,
                ..shape
            }
            .execute(&tx)
            .unwrap();
        }
        text_index::install(&tx).unwrap();
        tx.commit().unwrap();
    }
    conn
}

#[test]
fn owner_references_from_older_builds_are_detached() {
    let conn = store_with_owner_references();
    assert_eq!(
        probe::foreign_key_target(&conn, "notes", "owner_id").unwrap().as_deref(),
        Some("users")
    );

    conn.execute_batch(
        "INSERT INTO users (id, username, password) VALUES (50, 'alice', 'x');
         INSERT INTO notes (id, owner_id, title, body) VALUES (7, 50, 'private', 'secret plans');
         INSERT INTO tags (id, owner_id, name) VALUES (3, 50, 'mine');
         INSERT INTO note_tags (note_id, tag_id) VALUES (7, 3);
         INSERT INTO resources (id, owner_id, filename, storage_path) VALUES (4, 50, 'a.png', '/a.png');
         INSERT INTO note_resources (note_id, resource_id) VALUES (7, 4);",
    )
    .unwrap();

    let report = run_registry(&conn, MIGRATIONS, &MigrationContext::default()).unwrap();
    assert_eq!(report.applied, vec![10]);

    for table in ["notes", "resources", "tags"] {
        assert_eq!(probe::foreign_key_target(&conn, table, "owner_id").unwrap(), None);
    }
    assert!(index_exists(&conn, "idx_notes_pinned_created").unwrap());
    assert!(index_exists(&conn, "idx_resources_owner").unwrap());
    assert!(trigger_exists(&conn, "notes_fts_update").unwrap());
    assert!(session::foreign_keys_enabled(&conn).unwrap());

    // Deleting the owner leaves their rows owned, not shared.
    conn.execute("DELETE FROM users WHERE id = 50", []).unwrap();
    let owners: (Option<i64>, Option<i64>, Option<i64>) = conn
        .query_row(
            "SELECT (SELECT owner_id FROM notes WHERE id = 7),
                    (SELECT owner_id FROM tags WHERE id = 3),
                    (SELECT owner_id FROM resources WHERE id = 4)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(owners, (Some(50), Some(50), Some(50)));

    // Links and the index entry survived the rebuild.
    let links: i64 = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM note_tags WHERE note_id = 7)
                  + (SELECT COUNT(*) FROM note_resources WHERE note_id = 7)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(links, 2);
    assert_eq!(
        text_index::entry(&conn, crate::NoteId::new(7)).unwrap().as_deref(),
        Some("secret plans")
    );
    conn.execute("UPDATE notes SET body = 'revised' WHERE id = 7", [])
        .unwrap();
    assert!(text_index::audit(&conn).unwrap().is_consistent());
}

#[test]
fn every_step_is_idempotent_when_rerun() {
    let db = Database::in_memory().unwrap();
    db.with_writer(|conn| {
        let before = schema_snapshot(conn);
        let ctx = MigrationContext::default();
        for migration in MIGRATIONS {
            let tx = conn.transaction()?;
            (migration.apply)(&tx, &ctx)?;
            tx.commit()?;
        }
        assert_eq!(schema_snapshot(conn), before);
        assert!(index_exists(conn, "idx_tags_owner_name")?);
        Ok(())
    })
    .unwrap();
}
