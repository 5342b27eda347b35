use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{NotebookId, UserId};

/// Name given to a notebook created with a blank one.
pub const DEFAULT_NOTEBOOK_NAME: &str = "Untitled notebook";

/// A named, ordered collection of one owner's notes.
///
/// Unlike notes and tags, a notebook always has an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: NotebookId,
    pub owner_id: UserId,
    pub name: String,
    pub color: Option<String>,
    pub sort_order: i64,
    /// Notes currently filed in the notebook.
    pub note_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Input for creating a notebook.
///
/// # Examples
///
/// ```
/// use memostore::NewNotebook;
///
/// let notebook = NewNotebook::new("Recipes").color("#ff8800").sort_order(2);
///
/// assert_eq!(notebook.name, "Recipes");
/// assert_eq!(notebook.sort_order, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNotebook {
    pub name: String,
    pub color: Option<String>,
    pub sort_order: i64,
}

impl NewNotebook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Trimmed name, or [`DEFAULT_NOTEBOOK_NAME`] when blank.
    pub(crate) fn normalized_name(&self) -> &str {
        match self.name.trim() {
            "" => DEFAULT_NOTEBOOK_NAME,
            name => name,
        }
    }

    pub(crate) fn normalized_color(&self) -> Option<&str> {
        non_blank(self.color.as_deref())
    }
}

/// Partial update of a notebook. Absent or blank fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotebookChanges {
    pub name: Option<String>,
    pub color: Option<String>,
    pub sort_order: Option<i64>,
}

impl NotebookChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    pub(crate) fn normalized_name(&self) -> Option<&str> {
        non_blank(self.name.as_deref())
    }

    pub(crate) fn normalized_color(&self) -> Option<&str> {
        non_blank(self.color.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_name_falls_back_to_default() {
        assert_eq!(NewNotebook::new("  ").normalized_name(), DEFAULT_NOTEBOOK_NAME);
        assert_eq!(NewNotebook::new(" Work ").normalized_name(), "Work");
    }

    #[test]
    fn blank_changes_are_ignored() {
        let changes = NotebookChanges::new().name(" ").color("\t");
        assert_eq!(changes.normalized_name(), None);
        assert_eq!(changes.normalized_color(), None);
        assert_eq!(changes.sort_order, None);

        let changes = NotebookChanges::new().name(" Home ").sort_order(-1);
        assert_eq!(changes.normalized_name(), Some("Home"));
        assert_eq!(changes.sort_order, Some(-1));
    }

    #[test]
    fn notebook_serializes_owner_as_bare_id() {
        let notebook = Notebook {
            id: NotebookId::new(2),
            owner_id: UserId::new(5),
            name: "Work".into(),
            color: None,
            sort_order: 0,
            note_count: 3,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&notebook).unwrap();
        assert_eq!(json["owner_id"], 5);
        assert_eq!(json["note_count"], 3);
        assert_eq!(json["color"], serde_json::Value::Null);
    }
}
