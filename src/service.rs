use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use time::OffsetDateTime;
use tracing::debug;

use crate::assembler::{
    NOTEBOOK_COLUMNS, NoteRow, RESOURCE_COLUMNS, ResultAssembler, TAG_COLUMNS, notebook_from_row,
    resource_from_row, tag_from_row,
};
use crate::db::text_index::{self, IndexAudit};
use crate::models::{
    MAX_TAG_NAME_CHARS, NewNote, NewNotebook, NewResource, Note, NoteId, Notebook,
    NotebookChanges, NotebookId, Resource, ResourceId, Tag, TagId, TagWithCount, UserId,
    normalize_storage_path, tag_color,
};
use crate::query::{NOTE_COLUMNS, NoteQuery, QueryPlan, compose};
use crate::Database;

/// Attachments listed per page when the caller gives no limit.
pub const DEFAULT_RESOURCE_PAGE: i64 = 20;

/// Hard cap on attachments per page.
pub const MAX_RESOURCE_PAGE: i64 = 100;

/// Visibility rule shared by every owner-scoped statement. `?owner` is bound
/// to the caller's owner id or NULL for unscoped access.
macro_rules! visible_to {
    ($alias:literal, $param:literal) => {
        concat!(
            "(", $param, " IS NULL OR ", $alias, ".owner_id = ", $param,
            " OR ", $alias, ".owner_id IS NULL)"
        )
    };
}

/// Service layer providing note, tag, notebook and attachment operations.
///
/// Every method that takes an `owner` applies the same visibility rule: a row
/// is visible to its owner, rows with no owner (written before per-owner
/// isolation) are visible to everyone, and `None` means unscoped operator
/// access. Writes run on the serialized writer, each in one transaction
/// together with their association rows; the text index follows through
/// triggers inside that same transaction.
///
/// # Examples
///
/// ```
/// use memostore::{Database, NewNote, NoteQuery, NoteService};
///
/// # fn main() -> anyhow::Result<()> {
/// let service = NoteService::new(Database::in_memory()?);
///
/// let note = service.create_note(None, NewNote::new("Groceries", "milk and eggs").tags(["home"]))?;
/// let found = service.list_notes(&NoteQuery::new().text("milk"))?;
///
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0].id, note.id);
/// assert_eq!(found[0].tags[0].name, "home");
/// # Ok(())
/// # }
/// ```
pub struct NoteService {
    db: Database,
}

impl NoteService {
    /// Creates a new NoteService with the given database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns a reference to the underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // Notes

    /// Creates a note with its tags, attachment links and notebook memberships.
    ///
    /// Title and body are trimmed; an empty kind becomes `markdown`. Tags are
    /// resolved against the owner's own tags and created when missing.
    /// Attachment and notebook ids that are non-positive, unknown, or not
    /// visible to the owner are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if title and body are both empty, or on storage failure.
    pub fn create_note(&self, owner: Option<UserId>, note: NewNote) -> Result<Note> {
        let (title, body, kind) = note.normalized()?;
        let tags = note.normalized_tags();
        let location = note.location.as_ref();
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO notes (owner_id, title, body, pinned, kind, location, latitude, longitude, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    owner,
                    title,
                    body,
                    note.pinned,
                    kind,
                    location.and_then(|l| l.name.as_deref()),
                    location.and_then(|l| l.latitude),
                    location.and_then(|l| l.longitude),
                    now,
                ],
            )
            .context("Failed to insert note")?;
            let id = NoteId::new(tx.last_insert_rowid());

            link_tags(&tx, owner, id, &tags)?;
            link_resources(&tx, owner, id, &note.resource_ids)?;
            link_notebooks(&tx, owner, id, &note.notebook_ids)?;
            let created = load_note(&tx, owner, id)?.context("Inserted note vanished")?;
            tx.commit()?;

            debug!(note_id = %id, tags = tags.len(), "note created");
            Ok(created)
        })
    }

    /// Replaces a note's content, tags, attachment links and notebook
    /// memberships.
    ///
    /// Only links visible to `owner` are replaced; on a shared note, other
    /// owners' links stay. Returns `None` when the note does not exist or is
    /// not visible to `owner`. The owner of the note itself never changes.
    pub fn update_note(&self, owner: Option<UserId>, id: NoteId, note: NewNote) -> Result<Option<Note>> {
        let (title, body, kind) = note.normalized()?;
        let tags = note.normalized_tags();
        let location = note.location.as_ref();
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            if !note_visible(&tx, owner, id)? {
                return Ok(None);
            }

            tx.execute(
                "UPDATE notes SET title = ?1, body = ?2, pinned = ?3, kind = ?4,
                     location = ?5, latitude = ?6, longitude = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    title,
                    body,
                    note.pinned,
                    kind,
                    location.and_then(|l| l.name.as_deref()),
                    location.and_then(|l| l.latitude),
                    location.and_then(|l| l.longitude),
                    now,
                    id,
                ],
            )
            .context("Failed to update note")?;

            unlink_tags(&tx, owner, id)?;
            link_tags(&tx, owner, id, &tags)?;
            unlink_resources(&tx, owner, id)?;
            link_resources(&tx, owner, id, &note.resource_ids)?;
            unlink_notebooks(&tx, owner, id)?;
            link_notebooks(&tx, owner, id, &note.notebook_ids)?;

            let updated = load_note(&tx, owner, id)?;
            tx.commit()?;
            debug!(note_id = %id, "note updated");
            Ok(updated)
        })
    }

    /// Deletes a note. Its tag and attachment links and its index entry go
    /// with it.
    ///
    /// Returns `false` when nothing visible to `owner` had that id.
    pub fn delete_note(&self, owner: Option<UserId>, id: NoteId) -> Result<bool> {
        Ok(self.delete_notes(owner, &[id])? == 1)
    }

    /// Deletes several notes in one transaction. Returns how many were removed.
    pub fn delete_notes(&self, owner: Option<UserId>, ids: &[NoteId]) -> Result<usize> {
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt = tx.prepare(concat!(
                    "DELETE FROM notes AS n WHERE n.id = ?1 AND ",
                    visible_to!("n", "?2")
                ))?;
                for id in ids {
                    deleted += stmt.execute(params![id, owner])?;
                }
            }
            tx.commit()?;
            debug!(requested = ids.len(), deleted, "notes deleted");
            Ok(deleted)
        })
    }

    /// Retrieves a note by its ID.
    ///
    /// Returns `None` if no note visible to `owner` has that id. This is not
    /// considered an error condition.
    pub fn get_note(&self, owner: Option<UserId>, id: NoteId) -> Result<Option<Note>> {
        self.db.with_reader(|conn| {
            if !note_visible(conn, owner, id)? {
                return Ok(None);
            }
            load_note(conn, owner, id)
        })
    }

    /// Lists notes matching `query`, pinned first.
    pub fn list_notes(&self, query: &NoteQuery) -> Result<Vec<Note>> {
        self.execute(&compose(query))
    }

    /// Runs a composed plan and assembles the page.
    pub fn execute(&self, plan: &QueryPlan) -> Result<Vec<Note>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&plan.sql)?;
            let rows = stmt
                .query_map(params_from_iter(plan.args.iter()), NoteRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to run note query")?;
            ResultAssembler::new(conn)
                .for_owner(plan.owner)
                .assemble(rows)
        })
    }

    // Tags

    /// Finds the owner's tag with this name, creating it if needed.
    ///
    /// Names are trimmed and truncated to 64 characters. New tags get a
    /// palette color derived from the name.
    ///
    /// # Examples
    ///
    /// ```
    /// use memostore::{Database, NoteService, UserId};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let service = NoteService::new(Database::in_memory()?);
    ///
    /// let first = service.get_or_create_tag(Some(UserId::new(1)), "rust")?;
    /// let again = service.get_or_create_tag(Some(UserId::new(1)), "  rust ")?;
    /// assert_eq!(first.id, again.id);
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_or_create_tag(&self, owner: Option<UserId>, name: &str) -> Result<Tag> {
        let name = tag_name(name)?;
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            let id = resolve_tag(&tx, owner, &name)?;
            let tag = load_tag(&tx, id)?.context("Resolved tag vanished")?;
            tx.commit()?;
            Ok(tag)
        })
    }

    /// Lists the owner's tags with their note counts, most used first, then
    /// newest. With `owner = None` every tag is listed.
    pub fn list_tags(&self, owner: Option<UserId>) -> Result<Vec<TagWithCount>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TAG_COLUMNS}, COUNT(nt.note_id) AS note_count
                 FROM tags t
                 LEFT JOIN note_tags nt ON nt.tag_id = t.id
                 WHERE ?1 IS NULL OR t.owner_id = ?1
                 GROUP BY t.id
                 ORDER BY note_count DESC, t.created_at DESC, t.id DESC"
            ))?;
            let tags = stmt
                .query_map([owner], |row| {
                    Ok(TagWithCount {
                        tag: tag_from_row(row)?,
                        note_count: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tags)
        })
    }

    /// Renames and/or recolors a tag.
    ///
    /// Returns `None` when the tag is not visible to `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new name is already used by another of the
    /// owner's tags.
    pub fn update_tag(
        &self,
        owner: Option<UserId>,
        id: TagId,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Option<Tag>> {
        let name = name.map(tag_name).transpose()?;
        let color = color.map(str::trim).filter(|c| !c.is_empty());

        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            let Some(current) = load_tag(&tx, id)? else {
                return Ok(None);
            };
            if !tag_visible(&tx, owner, id)? {
                return Ok(None);
            }

            if let Some(name) = &name {
                let clash: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM tags WHERE name = ?1 AND owner_id IS ?2 AND id != ?3",
                        params![name, current.owner_id, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if clash.is_some() {
                    bail!("Tag '{}' already exists", name);
                }
                tx.execute("UPDATE tags SET name = ?1 WHERE id = ?2", params![name, id])?;
            }
            if let Some(color) = color {
                tx.execute("UPDATE tags SET color = ?1 WHERE id = ?2", params![color, id])?;
            }

            let tag = load_tag(&tx, id)?;
            tx.commit()?;
            Ok(tag)
        })
    }

    /// Deletes a tag and unlinks it from every note.
    pub fn delete_tag(&self, owner: Option<UserId>, id: TagId) -> Result<bool> {
        self.db.with_writer(|conn| {
            let deleted = conn.execute(
                concat!("DELETE FROM tags AS t WHERE t.id = ?1 AND ", visible_to!("t", "?2")),
                params![id, owner],
            )?;
            Ok(deleted == 1)
        })
    }

    /// Moves every note from `source` onto `target`, then deletes `source`.
    ///
    /// Notes already carrying both keep a single link. Returns the number of
    /// notes newly linked to `target`, or `None` when either tag is not
    /// visible to `owner`.
    pub fn merge_tags(
        &self,
        owner: Option<UserId>,
        source: TagId,
        target: TagId,
    ) -> Result<Option<usize>> {
        if source == target {
            bail!("Cannot merge a tag into itself");
        }
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            if !tag_visible(&tx, owner, source)? || !tag_visible(&tx, owner, target)? {
                return Ok(None);
            }
            let moved = tx.execute(
                "INSERT OR IGNORE INTO note_tags (note_id, tag_id)
                 SELECT note_id, ?2 FROM note_tags WHERE tag_id = ?1",
                params![source, target],
            )?;
            tx.execute("DELETE FROM tags WHERE id = ?1", [source])?;
            tx.commit()?;
            debug!(%source, %target, moved, "tags merged");
            Ok(Some(moved))
        })
    }

    // Notebooks

    /// Creates a notebook for `owner`.
    ///
    /// The name is trimmed and a blank one becomes
    /// [`DEFAULT_NOTEBOOK_NAME`](crate::models::DEFAULT_NOTEBOOK_NAME); a
    /// blank color is stored as none.
    ///
    /// # Errors
    ///
    /// Returns an error if `owner` is not a known user, or on storage failure.
    pub fn create_notebook(&self, owner: UserId, notebook: NewNotebook) -> Result<Notebook> {
        let name = notebook.normalized_name();
        let color = notebook.normalized_color();
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO notebooks (owner_id, name, color, sort_order, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![owner, name, color, notebook.sort_order, now],
            )
            .context("Failed to insert notebook")?;
            let id = NotebookId::new(conn.last_insert_rowid());
            debug!(notebook_id = %id, %owner, "notebook created");
            load_notebook(conn, None, id)?.context("Inserted notebook vanished")
        })
    }

    /// Lists the owner's notebooks in their sort order, then oldest first.
    /// With `owner = None` every notebook is listed.
    pub fn list_notebooks(&self, owner: Option<UserId>) -> Result<Vec<Notebook>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTEBOOK_COLUMNS} FROM notebooks nb
                 WHERE ?1 IS NULL OR nb.owner_id = ?1
                 ORDER BY nb.sort_order ASC, nb.id ASC"
            ))?;
            let notebooks = stmt
                .query_map([owner], notebook_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notebooks)
        })
    }

    /// Retrieves a notebook. Returns `None` if `owner` does not own it.
    pub fn get_notebook(&self, owner: Option<UserId>, id: NotebookId) -> Result<Option<Notebook>> {
        self.db.with_reader(|conn| load_notebook(conn, owner, id))
    }

    /// Applies the non-blank fields of `changes` to a notebook.
    ///
    /// Returns `None` when the notebook is not visible to `owner`.
    pub fn update_notebook(
        &self,
        owner: Option<UserId>,
        id: NotebookId,
        changes: NotebookChanges,
    ) -> Result<Option<Notebook>> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE notebooks SET
                     name = COALESCE(?1, name),
                     color = COALESCE(?2, color),
                     sort_order = COALESCE(?3, sort_order),
                     updated_at = ?4
                 WHERE id = ?5 AND (?6 IS NULL OR owner_id = ?6)",
                params![
                    changes.normalized_name(),
                    changes.normalized_color(),
                    changes.sort_order,
                    now,
                    id,
                    owner,
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            let notebook = load_notebook(&tx, owner, id)?;
            tx.commit()?;
            Ok(notebook)
        })
    }

    /// Deletes a notebook. Its notes stay; only their membership goes.
    pub fn delete_notebook(&self, owner: Option<UserId>, id: NotebookId) -> Result<bool> {
        self.db.with_writer(|conn| {
            let deleted = conn.execute(
                "DELETE FROM notebooks WHERE id = ?1 AND (?2 IS NULL OR owner_id = ?2)",
                params![id, owner],
            )?;
            Ok(deleted == 1)
        })
    }

    /// Replaces the notebooks a note is filed in.
    ///
    /// Unknown, non-positive and foreign notebook ids are skipped. Returns
    /// the resulting memberships visible to `owner`, or `None` when the
    /// note is not visible.
    pub fn set_note_notebooks(
        &self,
        owner: Option<UserId>,
        note: NoteId,
        notebooks: &[NotebookId],
    ) -> Result<Option<Vec<NotebookId>>> {
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            if !note_visible(&tx, owner, note)? {
                return Ok(None);
            }
            unlink_notebooks(&tx, owner, note)?;
            link_notebooks(&tx, owner, note, notebooks)?;
            let ids = ResultAssembler::new(&tx)
                .for_owner(owner)
                .notebooks_for(note)?;
            tx.commit()?;
            Ok(Some(ids))
        })
    }

    /// Lists a page of the notes filed in a notebook, pinned first.
    ///
    /// Returns `None` when the notebook is not visible to `owner`.
    pub fn list_notebook_notes(
        &self,
        owner: Option<UserId>,
        notebook: NotebookId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Option<Vec<Note>>> {
        if self.get_notebook(owner, notebook)?.is_none() {
            return Ok(None);
        }
        let query = NoteQuery {
            notebook: Some(notebook),
            owner,
            limit,
            offset,
            ..NoteQuery::default()
        };
        self.list_notes(&query).map(Some)
    }

    // Resources

    /// Registers an uploaded attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the filename or storage path is empty.
    pub fn create_resource(&self, owner: Option<UserId>, resource: NewResource) -> Result<Resource> {
        let filename = resource.filename.trim();
        let storage_path = normalize_storage_path(&resource.storage_path);
        if filename.is_empty() {
            bail!("Resource filename cannot be empty");
        }
        if storage_path.is_empty() {
            bail!("Resource storage path cannot be empty");
        }
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO resources (owner_id, filename, storage_path, mime_type, size, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    owner,
                    filename,
                    storage_path,
                    resource.mime_type,
                    resource.size,
                    resource.sha256,
                    now,
                ],
            )
            .context("Failed to insert resource")?;
            let id = ResourceId::new(conn.last_insert_rowid());
            load_resource(conn, id)?.context("Inserted resource vanished")
        })
    }

    /// Lists attachments visible to `owner`, newest first.
    ///
    /// `limit` defaults to 20 and is capped at 100; a negative offset is 0.
    pub fn list_resources(
        &self,
        owner: Option<UserId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Resource>> {
        let limit = match limit {
            Some(n) if n > 0 => n.min(MAX_RESOURCE_PAGE),
            _ => DEFAULT_RESOURCE_PAGE,
        };
        let offset = offset.unwrap_or(0).max(0);

        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESOURCE_COLUMNS} FROM resources r
                 WHERE {}
                 ORDER BY r.created_at DESC, r.id DESC
                 LIMIT ?2 OFFSET ?3",
                visible_to!("r", "?1")
            ))?;
            let resources = stmt
                .query_map(params![owner, limit, offset], resource_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(resources)
        })
    }

    /// Deletes an attachment record and its note links.
    pub fn delete_resource(&self, owner: Option<UserId>, id: ResourceId) -> Result<bool> {
        self.db.with_writer(|conn| {
            let deleted = conn.execute(
                concat!("DELETE FROM resources AS r WHERE r.id = ?1 AND ", visible_to!("r", "?2")),
                params![id, owner],
            )?;
            Ok(deleted == 1)
        })
    }

    // Text index

    /// The body currently indexed for a note, if it has an entry.
    pub fn text_index_entry(&self, id: NoteId) -> Result<Option<String>> {
        self.db.with_reader(|conn| Ok(text_index::entry(conn, id)?))
    }

    /// Checks the text index against `notes`.
    pub fn audit_text_index(&self) -> Result<IndexAudit> {
        self.db.with_reader(|conn| Ok(text_index::audit(conn)?))
    }
}

fn tag_name(name: &str) -> Result<String> {
    let name: String = name.trim().chars().take(MAX_TAG_NAME_CHARS).collect();
    if name.is_empty() {
        bail!("Tag name cannot be empty");
    }
    Ok(name)
}

fn note_visible(conn: &Connection, owner: Option<UserId>, id: NoteId) -> Result<bool> {
    let found = conn
        .query_row(
            concat!("SELECT 1 FROM notes n WHERE n.id = ?1 AND ", visible_to!("n", "?2")),
            params![id, owner],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn tag_visible(conn: &Connection, owner: Option<UserId>, id: TagId) -> Result<bool> {
    let found = conn
        .query_row(
            concat!("SELECT 1 FROM tags t WHERE t.id = ?1 AND ", visible_to!("t", "?2")),
            params![id, owner],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Looks up `name` among the owner's tags, inserting it if missing.
fn resolve_tag(conn: &Connection, owner: Option<UserId>, name: &str) -> Result<TagId> {
    let existing: Option<TagId> = conn
        .query_row(
            "SELECT id FROM tags WHERE name = ?1 AND owner_id IS ?2",
            params![name, owner],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO tags (owner_id, name, color, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            owner,
            name,
            tag_color(name),
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )
    .with_context(|| format!("Failed to create tag '{name}'"))?;
    Ok(TagId::new(conn.last_insert_rowid()))
}

fn link_tags(conn: &Connection, owner: Option<UserId>, note: NoteId, names: &[String]) -> Result<()> {
    for name in names {
        let tag = resolve_tag(conn, owner, name)?;
        conn.execute(
            "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
            params![note, tag],
        )?;
    }
    Ok(())
}

fn link_resources(
    conn: &Connection,
    owner: Option<UserId>,
    note: NoteId,
    ids: &[ResourceId],
) -> Result<()> {
    let mut stmt = conn.prepare_cached(concat!(
        "INSERT OR IGNORE INTO note_resources (note_id, resource_id)
         SELECT ?1, r.id FROM resources r WHERE r.id = ?2 AND ",
        visible_to!("r", "?3")
    ))?;
    for id in ids.iter().filter(|id| id.get() > 0) {
        if stmt.execute(params![note, id, owner])? == 0 {
            debug!(note_id = %note, resource_id = %id, "skipped attachment link");
        }
    }
    Ok(())
}

fn link_notebooks(
    conn: &Connection,
    owner: Option<UserId>,
    note: NoteId,
    ids: &[NotebookId],
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO note_notebooks (note_id, notebook_id)
         SELECT ?1, nb.id FROM notebooks nb
         WHERE nb.id = ?2 AND (?3 IS NULL OR nb.owner_id = ?3)",
    )?;
    for id in ids.iter().filter(|id| id.get() > 0) {
        if stmt.execute(params![note, id, owner])? == 0 {
            debug!(note_id = %note, notebook_id = %id, "skipped notebook link");
        }
    }
    Ok(())
}

fn unlink_tags(conn: &Connection, owner: Option<UserId>, note: NoteId) -> Result<()> {
    conn.execute(
        concat!(
            "DELETE FROM note_tags WHERE note_id = ?1 AND tag_id IN (SELECT t.id FROM tags t WHERE ",
            visible_to!("t", "?2"),
            ")"
        ),
        params![note, owner],
    )?;
    Ok(())
}

fn unlink_resources(conn: &Connection, owner: Option<UserId>, note: NoteId) -> Result<()> {
    conn.execute(
        concat!(
            "DELETE FROM note_resources WHERE note_id = ?1 AND resource_id IN (SELECT r.id FROM resources r WHERE ",
            visible_to!("r", "?2"),
            ")"
        ),
        params![note, owner],
    )?;
    Ok(())
}

fn unlink_notebooks(conn: &Connection, owner: Option<UserId>, note: NoteId) -> Result<()> {
    conn.execute(
        "DELETE FROM note_notebooks WHERE note_id = ?1
           AND notebook_id IN (SELECT nb.id FROM notebooks nb WHERE ?2 IS NULL OR nb.owner_id = ?2)",
        params![note, owner],
    )?;
    Ok(())
}

fn load_notebook(
    conn: &Connection,
    owner: Option<UserId>,
    id: NotebookId,
) -> Result<Option<Notebook>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {NOTEBOOK_COLUMNS} FROM notebooks nb
                 WHERE nb.id = ?1 AND (?2 IS NULL OR nb.owner_id = ?2)"
            ),
            params![id, owner],
            notebook_from_row,
        )
        .optional()?)
}

fn load_note(conn: &Connection, owner: Option<UserId>, id: NoteId) -> Result<Option<Note>> {
    let row = conn
        .query_row(
            &format!("SELECT {NOTE_COLUMNS} FROM notes n WHERE n.id = ?1"),
            [id],
            NoteRow::from_row,
        )
        .optional()?;
    row.map(|row| ResultAssembler::new(conn).for_owner(owner).assemble_one(row))
        .transpose()
}

fn load_tag(conn: &Connection, id: TagId) -> Result<Option<Tag>> {
    Ok(conn
        .query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags t WHERE t.id = ?1"),
            [id],
            tag_from_row,
        )
        .optional()?)
}

fn load_resource(conn: &Connection, id: ResourceId) -> Result<Option<Resource>> {
    Ok(conn
        .query_row(
            &format!("SELECT {RESOURCE_COLUMNS} FROM resources r WHERE r.id = ?1"),
            [id],
            resource_from_row,
        )
        .optional()?)
}
