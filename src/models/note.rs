use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{NoteId, NotebookId, Resource, ResourceId, Tag, UserId};

/// Content kind assigned when a caller does not specify one.
pub const DEFAULT_KIND: &str = "markdown";

/// Maximum accepted length of a single tag name, in characters.
pub const MAX_TAG_NAME_CHARS: usize = 64;

/// A note as returned to callers, with its tags and attachments attached.
///
/// `owner_id` is `None` for notes written before per-owner isolation existed;
/// those notes are visible to every owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: Option<UserId>,
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub tags: Vec<Tag>,
    pub resources: Vec<Resource>,
    /// Notebooks the note is filed in, ascending.
    pub notebook_ids: Vec<NotebookId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Where a note was written.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Location {
    /// Returns `None` when every field is empty.
    pub fn from_parts(
        name: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Option<Self> {
        let name = name.filter(|n| !n.trim().is_empty());
        if name.is_none() && latitude.is_none() && longitude.is_none() {
            None
        } else {
            Some(Self {
                name,
                latitude,
                longitude,
            })
        }
    }
}

/// Input for creating or replacing a note.
///
/// # Examples
///
/// ```
/// use memostore::NewNote;
///
/// let note = NewNote::new("Groceries", "milk, eggs")
///     .pinned(true)
///     .tags(["home", "todo"]);
///
/// assert_eq!(note.title, "Groceries");
/// assert!(note.pinned);
/// assert_eq!(note.tags, vec!["home", "todo"]);
/// assert_eq!(note.kind, "markdown");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewNote {
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub kind: String,
    pub tags: Vec<String>,
    pub resource_ids: Vec<ResourceId>,
    pub notebook_ids: Vec<NotebookId>,
    pub location: Option<Location>,
}

impl NewNote {
    /// Creates an unpinned markdown note with no tags or attachments.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            pinned: false,
            kind: DEFAULT_KIND.to_string(),
            tags: Vec::new(),
            resource_ids: Vec::new(),
            notebook_ids: Vec::new(),
            location: None,
        }
    }

    /// Sets the pin flag.
    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Sets the content kind.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Sets the tag names.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the attachments to link.
    pub fn resources(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.resource_ids = ids.into_iter().collect();
        self
    }

    /// Sets the notebooks to file the note in.
    pub fn notebooks(mut self, ids: impl IntoIterator<Item = NotebookId>) -> Self {
        self.notebook_ids = ids.into_iter().collect();
        self
    }

    /// Sets the location.
    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Returns the trimmed title, body and kind, falling back to the default kind.
    ///
    /// # Errors
    ///
    /// Returns an error when title and body are both empty after trimming.
    pub(crate) fn normalized(&self) -> anyhow::Result<(&str, &str, &str)> {
        let title = self.title.trim();
        let body = self.body.trim();
        if title.is_empty() && body.is_empty() {
            anyhow::bail!("Note title and body cannot both be empty");
        }
        let kind = match self.kind.trim() {
            "" => DEFAULT_KIND,
            kind => kind,
        };
        Ok((title, body, kind))
    }

    /// Returns the tag names trimmed, truncated and de-duplicated in input order.
    pub(crate) fn normalized_tags(&self) -> Vec<String> {
        normalize_tag_names(self.tags.iter().map(String::as_str))
    }
}

/// Trims, truncates to [`MAX_TAG_NAME_CHARS`] and de-duplicates tag names,
/// keeping the first occurrence of each.
pub fn normalize_tag_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let name: String = name.chars().take(MAX_TAG_NAME_CHARS).collect();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
