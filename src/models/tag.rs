use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{TagId, UserId};

/// Palette used for automatically assigned tag colors.
const TAG_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
];

/// A tag owned by a single user.
///
/// Tag names are unique per `(owner_id, name)`, so two owners may each hold
/// a tag with the same name under distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub owner_id: Option<UserId>,
    pub name: String,
    pub color: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A tag together with the number of notes linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub note_count: i64,
}

/// Picks a stable palette color for a tag name.
///
/// The same name always maps to the same color.
///
/// # Examples
///
/// ```
/// use memostore::tag_color;
///
/// assert_eq!(tag_color("rust"), tag_color("rust"));
/// assert!(tag_color("rust").starts_with('#'));
/// ```
pub fn tag_color(name: &str) -> &'static str {
    let hash = name.chars().fold(0i64, |hash, ch| {
        i64::from(u32::from(ch)).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash))
    });
    let index = (hash.unsigned_abs() % TAG_COLORS.len() as u64) as usize;
    TAG_COLORS[index]
}
