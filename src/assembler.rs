//! Turns rows from a composed query into [`Note`] aggregates.
//!
//! Tags, attachments and notebook memberships are fetched with one lookup
//! each per note, through cached prepared statements. A full page therefore
//! costs `1 + 3 * rows` statements, bounded by
//! [`MAX_PAGE_SIZE`](crate::query::MAX_PAGE_SIZE).
//! That is the known scaling limit here; raising the page cap should come
//! with a batched lookup keyed by the page's note ids and grouped in memory.

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use time::OffsetDateTime;

use crate::models::{
    Location, Note, NoteId, Notebook, NotebookId, Resource, ResourceId, Tag, TagId, UserId,
    resource_url, tag_color,
};

/// Reads an INTEGER unix-seconds column.
pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// Column list matching [`tag_from_row`].
pub(crate) const TAG_COLUMNS: &str = "t.id, t.owner_id, t.name, t.color, t.created_at";

/// Maps a row selected with [`TAG_COLUMNS`].
pub(crate) fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let name: String = row.get(2)?;
    let color = row
        .get::<_, Option<String>>(3)?
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| tag_color(&name).to_string());
    Ok(Tag {
        id: row.get::<_, TagId>(0)?,
        owner_id: row.get::<_, Option<UserId>>(1)?,
        name,
        color,
        created_at: timestamp(row, 4)?,
    })
}

/// Column list matching [`resource_from_row`].
pub(crate) const RESOURCE_COLUMNS: &str =
    "r.id, r.owner_id, r.filename, r.storage_path, r.mime_type, r.size, r.sha256, r.created_at";

/// Maps a row selected with [`RESOURCE_COLUMNS`].
pub(crate) fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    let storage_path: String = row.get(3)?;
    Ok(Resource {
        id: row.get::<_, ResourceId>(0)?,
        owner_id: row.get::<_, Option<UserId>>(1)?,
        filename: row.get(2)?,
        url: resource_url(&storage_path),
        storage_path,
        mime_type: row.get(4)?,
        size: row.get(5)?,
        sha256: row.get(6)?,
        created_at: timestamp(row, 7)?,
    })
}

/// Column list matching [`notebook_from_row`], ending with the note count.
pub(crate) const NOTEBOOK_COLUMNS: &str = "nb.id, nb.owner_id, nb.name, nb.color, nb.sort_order, \
     nb.created_at, nb.updated_at, \
     (SELECT COUNT(*) FROM note_notebooks nn WHERE nn.notebook_id = nb.id)";

/// Maps a row selected with [`NOTEBOOK_COLUMNS`].
pub(crate) fn notebook_from_row(row: &Row<'_>) -> rusqlite::Result<Notebook> {
    Ok(Notebook {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get::<_, Option<String>>(3)?.filter(|c| !c.is_empty()),
        sort_order: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
        note_count: row.get(7)?,
    })
}

/// A `notes` row selected with [`NOTE_COLUMNS`](crate::query::NOTE_COLUMNS),
/// before its tags and attachments are attached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NoteRow {
    pub id: NoteId,
    pub owner_id: Option<UserId>,
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub kind: String,
    pub location: Option<Location>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl NoteRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            body: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            pinned: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
            kind: row
                .get::<_, Option<String>>(5)?
                .unwrap_or_else(|| crate::models::DEFAULT_KIND.to_string()),
            location: Location::from_parts(row.get(6)?, row.get(7)?, row.get(8)?),
            created_at: timestamp(row, 9)?,
            updated_at: timestamp(row, 10)?,
        })
    }
}

/// Attaches tags, attachments and notebook ids to note rows.
///
/// A note without an owner is shared, and other owners may have linked
/// their own tags, attachments and notebooks to it. With a viewer set, only
/// links the viewer can see are attached.
pub struct ResultAssembler<'c> {
    conn: &'c Connection,
    viewer: Option<UserId>,
}

impl<'c> ResultAssembler<'c> {
    /// An assembler that attaches every link.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn, viewer: None }
    }

    /// Restricts attached links to those visible to `viewer`.
    pub fn for_owner(mut self, viewer: Option<UserId>) -> Self {
        self.viewer = viewer;
        self
    }

    pub(crate) fn assemble(&self, rows: Vec<NoteRow>) -> Result<Vec<Note>> {
        rows.into_iter().map(|row| self.assemble_one(row)).collect()
    }

    pub(crate) fn assemble_one(&self, row: NoteRow) -> Result<Note> {
        let tags = self.tags_for(row.id)?;
        let resources = self.resources_for(row.id)?;
        let notebook_ids = self.notebooks_for(row.id)?;
        Ok(Note {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            body: row.body,
            pinned: row.pinned,
            kind: row.kind,
            location: row.location,
            tags,
            resources,
            notebook_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Tags linked to a note, by name.
    pub fn tags_for(&self, note: NoteId) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {TAG_COLUMNS} FROM tags t
             JOIN note_tags nt ON nt.tag_id = t.id
             WHERE nt.note_id = ?1
               AND (?2 IS NULL OR t.owner_id = ?2 OR t.owner_id IS NULL)
             ORDER BY t.name"
        ))?;
        let tags = stmt
            .query_map(params![note, self.viewer], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Attachments linked to a note, oldest first.
    pub fn resources_for(&self, note: NoteId) -> Result<Vec<Resource>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r
             JOIN note_resources nr ON nr.resource_id = r.id
             WHERE nr.note_id = ?1
               AND (?2 IS NULL OR r.owner_id = ?2 OR r.owner_id IS NULL)
             ORDER BY r.created_at, r.id"
        ))?;
        let resources = stmt
            .query_map(params![note, self.viewer], resource_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(resources)
    }

    /// Notebooks a note is filed in, by id.
    pub fn notebooks_for(&self, note: NoteId) -> Result<Vec<NotebookId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT nn.notebook_id FROM note_notebooks nn
             JOIN notebooks nb ON nb.id = nn.notebook_id
             WHERE nn.note_id = ?1 AND (?2 IS NULL OR nb.owner_id = ?2)
             ORDER BY nn.notebook_id",
        )?;
        let ids = stmt
            .query_map(params![note, self.viewer], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}
