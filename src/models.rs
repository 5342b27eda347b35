mod ids;
mod note;
mod notebook;
mod resource;
mod tag;

pub use ids::{NoteId, NotebookId, ResourceId, TagId, UserId};
pub use note::{
    DEFAULT_KIND, Location, MAX_TAG_NAME_CHARS, NewNote, Note, normalize_tag_names,
};
pub use notebook::{DEFAULT_NOTEBOOK_NAME, NewNotebook, Notebook, NotebookChanges};
pub use resource::{NewResource, Resource, normalize_storage_path, resource_url};
pub use tag::{Tag, TagWithCount, tag_color};
