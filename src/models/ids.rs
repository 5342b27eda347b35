use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a transparent, strongly typed wrapper around a database row id.
///
/// Each id type serializes as a bare integer and converts to/from SQLite
/// integers, so the typed ids can be bound directly as query parameters.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw row id.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the underlying row id.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl rusqlite::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.0))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

row_id! {
    /// Unique identifier for a note.
    NoteId
}

row_id! {
    /// Unique identifier for a tag.
    TagId
}

row_id! {
    /// Unique identifier for an attachment (resource).
    ResourceId
}

row_id! {
    /// Unique identifier for a notebook.
    NotebookId
}

row_id! {
    /// Unique identifier for a user account; the owner of notes, tags and resources.
    UserId
}
