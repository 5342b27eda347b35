pub mod assembler;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod password;
pub mod query;
pub mod service;

pub use assembler::ResultAssembler;
pub use config::Config;
pub use db::Database;
pub use db::migration::{MigrationContext, MigrationReport};
pub use db::text_index::IndexAudit;
pub use error::{FilterError, MigrationError};
pub use models::{
    Location, NewNote, NewNotebook, NewResource, Note, NoteId, Notebook, NotebookChanges,
    NotebookId, Resource, ResourceId, Tag, TagId, TagWithCount, UserId, normalize_tag_names,
    tag_color,
};
pub use query::params::RawNoteQuery;
pub use query::{NoteQuery, QueryPlan, compose};
pub use service::NoteService;
