//! Lenient parsing of string filter parameters.
//!
//! A value that cannot be parsed drops only its own filter; the rest of the
//! query still runs. Dropped filters are reported back as [`FilterError`]s.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use super::NoteQuery;
use crate::{NotebookId, UserId};
use crate::error::FilterError;
use crate::models::normalize_tag_names;

/// Filter parameters as they arrive from a caller, unparsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawNoteQuery {
    pub q: Option<String>,
    /// Separated by commas, whitespace, semicolons or full-width commas.
    pub tags: Option<String>,
    /// Single-tag form, used when `tags` is empty.
    pub tag: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub pinned: Option<String>,
    pub kind: Option<String>,
    /// Notebook id.
    pub notebook: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl RawNoteQuery {
    /// Parses every parameter, dropping the ones that do not parse.
    pub fn parse(&self, owner: Option<UserId>) -> (NoteQuery, Vec<FilterError>) {
        let mut errors = Vec::new();

        let mut tags = parse_tags(self.tags.as_deref().unwrap_or_default());
        if tags.is_empty() {
            tags = parse_tags(self.tag.as_deref().unwrap_or_default());
        }

        let query = NoteQuery {
            text: non_blank(self.q.as_deref()).map(str::to_string),
            tags,
            from: recover(parse_date(self.from.as_deref(), "from"), &mut errors),
            to: recover(parse_date(self.to.as_deref(), "to"), &mut errors),
            pinned: recover(parse_bool(self.pinned.as_deref(), "pinned"), &mut errors),
            kind: non_blank(self.kind.as_deref()).map(str::to_string),
            notebook: recover(parse_number(self.notebook.as_deref(), "notebook"), &mut errors)
                .map(NotebookId::new),
            owner,
            limit: recover(parse_number(self.limit.as_deref(), "limit"), &mut errors),
            offset: recover(parse_number(self.offset.as_deref(), "offset"), &mut errors),
        };

        for error in &errors {
            debug!(field = error.field(), %error, "dropped unparseable filter");
        }
        (query, errors)
    }
}

fn recover<T>(parsed: Result<Option<T>, FilterError>, errors: &mut Vec<FilterError>) -> Option<T> {
    parsed.unwrap_or_else(|e| {
        errors.push(e);
        None
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parses a timestamp given as RFC 3339, `YYYY-MM-DD`, or
/// `YYYY-MM-DD HH:MM:SS`. Zone-less forms are taken as UTC.
pub fn parse_date(
    value: Option<&str>,
    field: &'static str,
) -> Result<Option<OffsetDateTime>, FilterError> {
    let Some(value) = non_blank(value) else {
        return Ok(None);
    };

    if let Ok(at) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(Some(at));
    }
    if let Ok(day) = Date::parse(value, format_description!("[year]-[month]-[day]")) {
        return Ok(Some(day.midnight().assume_utc()));
    }
    if let Ok(at) = PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(Some(at.assume_utc()));
    }

    Err(FilterError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Parses `1/true/yes/y` and `0/false/no/n`, case-insensitively.
pub fn parse_bool(value: Option<&str>, field: &'static str) -> Result<Option<bool>, FilterError> {
    let Some(value) = non_blank(value) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(FilterError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_number(value: Option<&str>, field: &'static str) -> Result<Option<i64>, FilterError> {
    let Some(value) = non_blank(value) else {
        return Ok(None);
    };
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| FilterError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Splits a tag list on commas, whitespace, semicolons and full-width commas.
pub fn parse_tags(raw: &str) -> Vec<String> {
    normalize_tag_names(raw.split(|c: char| c == ',' || c == ';' || c == '，' || c.is_whitespace()))
}
