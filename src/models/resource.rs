use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{ResourceId, UserId};

/// Metadata for an uploaded attachment.
///
/// The file bytes live in external blob storage; only the storage path and
/// descriptive metadata are kept here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub owner_id: Option<UserId>,
    pub filename: String,
    pub storage_path: String,
    /// Public path derived from `storage_path`.
    pub url: String,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub sha256: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input for registering a new attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewResource {
    pub filename: String,
    pub storage_path: String,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub sha256: Option<String>,
}

/// Trims whitespace and any leading slashes from a storage path.
pub fn normalize_storage_path(path: &str) -> &str {
    path.trim().trim_start_matches('/')
}

/// Builds the public URL for a storage path, or an empty string when there is none.
pub fn resource_url(storage_path: &str) -> String {
    let path = normalize_storage_path(storage_path);
    if path.is_empty() {
        String::new()
    } else {
        format!("/uploads/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_leading_slashes_and_whitespace() {
        assert_eq!(normalize_storage_path("  /2024/01/a.png "), "2024/01/a.png");
        assert_eq!(normalize_storage_path("//x"), "x");
        assert_eq!(normalize_storage_path("plain"), "plain");
    }

    #[test]
    fn url_is_empty_for_blank_path() {
        assert_eq!(resource_url("   "), "");
        assert_eq!(resource_url("/a/b.txt"), "/uploads/a/b.txt");
    }
}
