//! Note query composition.
//!
//! [`compose`] turns a [`NoteQuery`] into a single parameterized SQL
//! statement. It does no I/O; the resulting [`QueryPlan`] is run by
//! [`NoteService::execute`](crate::NoteService::execute).

pub mod params;

use rusqlite::types::Value;
use time::OffsetDateTime;

use crate::{NotebookId, UserId};
use crate::db::text_index::match_expression;
use crate::models::normalize_tag_names;

/// Page size used when the caller gives none (or a non-positive one).
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Hard cap on page size, whatever the caller asks for.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Columns every plan selects from `notes`, in the order the assembler reads them.
pub(crate) const NOTE_COLUMNS: &str = "n.id, n.owner_id, n.title, n.body, n.pinned, n.kind, \
     n.location, n.latitude, n.longitude, n.created_at, n.updated_at";

/// Filters for listing notes. Every field is optional and combines freely
/// with the others.
///
/// # Examples
///
/// ```
/// use memostore::{NoteQuery, UserId, compose};
///
/// let plan = compose(
///     &NoteQuery::new()
///         .owner(UserId::new(7))
///         .text("rust ownership")
///         .pinned(true)
///         .limit(10_000),
/// );
///
/// assert!(plan.ranked);
/// assert_eq!(plan.limit, 200);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteQuery {
    /// Free text matched against note bodies.
    pub text: Option<String>,
    /// Any-of tag names.
    pub tags: Vec<String>,
    /// Inclusive lower bound on creation time.
    pub from: Option<OffsetDateTime>,
    /// Inclusive upper bound on creation time.
    pub to: Option<OffsetDateTime>,
    pub pinned: Option<bool>,
    pub kind: Option<String>,
    /// Only notes filed in this notebook.
    pub notebook: Option<NotebookId>,
    /// Owner whose notes (plus owner-less legacy notes) are visible. `None`
    /// lists every note.
    pub owner: Option<UserId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NoteQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn since(mut self, from: OffsetDateTime) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: OffsetDateTime) -> Self {
        self.to = Some(to);
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn notebook(mut self, notebook: NotebookId) -> Self {
        self.notebook = Some(notebook);
        self
    }

    pub fn owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A rendered query: SQL text plus positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub sql: String,
    pub args: Vec<Value>,
    /// A tag join may repeat rows, so the projection is `DISTINCT`.
    pub distinct: bool,
    /// A text match is active and results are ordered by relevance.
    pub ranked: bool,
    /// Viewer the page is assembled for; their tags and attachments only.
    pub owner: Option<UserId>,
    pub limit: i64,
    pub offset: i64,
}

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(limit: Option<i64>) -> i64 {
    match limit {
        Some(n) if n > 0 => n.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Clamps a requested offset to be non-negative.
pub fn page_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

/// Renders `query` into SQL. Never fails: empty or blank filters are treated
/// as absent, and inverted date bounds simply match nothing.
pub fn compose(query: &NoteQuery) -> QueryPlan {
    let match_expr = query.text.as_deref().and_then(match_expression);
    let tags = normalize_tag_names(query.tags.iter().map(String::as_str));
    let kind = query
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let ranked = match_expr.is_some();
    let distinct = !tags.is_empty();

    let mut args: Vec<Value> = Vec::new();
    let mut predicates: Vec<String> = Vec::new();

    let mut sql = String::from(if distinct { "SELECT DISTINCT " } else { "SELECT " });
    sql.push_str(NOTE_COLUMNS);
    if ranked {
        sql.push_str(", bm25(notes_fts) AS relevance");
    }

    // The index drives the scan when searching so bm25() has a match context.
    if let Some(expr) = match_expr {
        sql.push_str(" FROM notes_fts JOIN notes n ON n.id = notes_fts.rowid");
        predicates.push("notes_fts MATCH ?".to_string());
        args.push(Value::Text(expr));
    } else {
        sql.push_str(" FROM notes n");
    }

    if distinct {
        sql.push_str(" JOIN note_tags nt ON nt.note_id = n.id JOIN tags t ON t.id = nt.tag_id");
        let placeholders = vec!["?"; tags.len()].join(", ");
        predicates.push(format!("t.name IN ({placeholders})"));
        args.extend(tags.into_iter().map(Value::Text));
        // A shared note may carry another owner's tag of the same name.
        if let Some(owner) = query.owner {
            predicates.push("(t.owner_id = ? OR t.owner_id IS NULL)".to_string());
            args.push(Value::Integer(owner.get()));
        }
    }

    if let Some(from) = query.from {
        predicates.push("n.created_at >= ?".to_string());
        args.push(Value::Integer(from.unix_timestamp()));
    }
    if let Some(to) = query.to {
        predicates.push("n.created_at <= ?".to_string());
        args.push(Value::Integer(to.unix_timestamp()));
    }
    if let Some(pinned) = query.pinned {
        predicates.push("n.pinned = ?".to_string());
        args.push(Value::Integer(i64::from(pinned)));
    }
    if let Some(kind) = kind {
        predicates.push("n.kind = ?".to_string());
        args.push(Value::Text(kind.to_string()));
    }
    if let Some(notebook) = query.notebook {
        predicates.push(
            "EXISTS (SELECT 1 FROM note_notebooks nn WHERE nn.note_id = n.id AND nn.notebook_id = ?)"
                .to_string(),
        );
        args.push(Value::Integer(notebook.get()));
    }
    if let Some(owner) = query.owner {
        predicates.push("(n.owner_id = ? OR n.owner_id IS NULL)".to_string());
        args.push(Value::Integer(owner.get()));
    }

    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    sql.push_str(" ORDER BY n.pinned DESC, ");
    if ranked {
        sql.push_str("relevance ASC, ");
    }
    sql.push_str("n.created_at DESC, n.id DESC");

    let limit = page_size(query.limit);
    let offset = page_offset(query.offset);
    sql.push_str(" LIMIT ? OFFSET ?");
    args.push(Value::Integer(limit));
    args.push(Value::Integer(offset));

    QueryPlan {
        sql,
        args,
        distinct,
        ranked,
        owner: query.owner,
        limit,
        offset,
    }
}
