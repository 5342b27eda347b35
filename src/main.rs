use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memostore::{
    Config, Database, MigrationError, NewNote, Note, NoteService, RawNoteQuery, UserId,
};
use tracing_subscriber::EnvFilter;

/// memostore - notes store with versioned schema and full-text search
#[derive(Parser)]
#[command(name = "memostore")]
#[command(about = "Notes store with versioned schema migrations and full-text search")]
#[command(version)]
struct Cli {
    /// Database file (overrides MEMOSTORE_DB_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Bring the schema up to date and report the version
    Migrate,
    /// Add a new note
    Add(AddCommand),
    /// List notes matching filters
    List(ListCommand),
    /// List tags with note counts
    Tags(TagsCommand),
    /// Verify the full-text index against the notes table
    CheckIndex(CheckIndexCommand),
}

#[derive(Parser)]
struct AddCommand {
    /// Note title
    #[arg(value_name = "TITLE")]
    title: String,

    /// Note body
    #[arg(value_name = "BODY", default_value = "")]
    body: String,

    /// Tags separated by commas, spaces or semicolons
    #[arg(short, long, value_name = "TAGS")]
    tags: Option<String>,

    /// Pin the note
    #[arg(short, long)]
    pinned: bool,

    /// Content kind
    #[arg(long, value_name = "KIND")]
    kind: Option<String>,

    /// Owner user id
    #[arg(long, value_name = "ID")]
    owner: Option<i64>,
}

#[derive(Parser)]
struct ListCommand {
    /// Free-text search
    #[arg(short, long, value_name = "TEXT")]
    q: Option<String>,

    /// Any-of tag filter
    #[arg(short, long, value_name = "TAGS")]
    tags: Option<String>,

    /// Created at or after (RFC 3339, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_name = "WHEN")]
    from: Option<String>,

    /// Created at or before
    #[arg(long, value_name = "WHEN")]
    to: Option<String>,

    /// Only pinned (true) or unpinned (false) notes
    #[arg(long, value_name = "BOOL")]
    pinned: Option<String>,

    /// Content kind
    #[arg(long, value_name = "KIND")]
    kind: Option<String>,

    /// Notebook id
    #[arg(long, value_name = "ID")]
    notebook: Option<String>,

    /// Owner user id
    #[arg(long, value_name = "ID")]
    owner: Option<i64>,

    #[arg(short, long, value_name = "N")]
    limit: Option<String>,

    #[arg(long, value_name = "N")]
    offset: Option<String>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct TagsCommand {
    /// Owner user id
    #[arg(long, value_name = "ID")]
    owner: Option<i64>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct CheckIndexCommand {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        let exit_code = exit_code(&e);
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MEMOSTORE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Maps an error to the process exit code: 3 for a failed migration, 1 for
/// invalid input, 2 for everything else.
fn exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<MigrationError>().is_some() {
        3
    } else if is_user_error(error) {
        1
    } else {
        2
    }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors include validation failures like empty content.
fn is_user_error(error: &anyhow::Error) -> bool {
    let error_msg = format!("{error:#}");
    error_msg.contains("cannot be empty")
        || error_msg.contains("cannot both be empty")
        || error_msg.contains("already exists")
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(path) = &cli.db {
        config = config.with_db_path(path);
    }
    let db = Database::open_with_config(&config).context("Failed to open database")?;

    match &cli.command {
        Commands::Migrate => {
            let report = db.migration_report();
            if report.is_noop() {
                println!("Schema up to date (v{})", report.to_version);
            } else {
                println!(
                    "Migrated schema v{} -> v{} (applied: {})",
                    report.from_version,
                    report.to_version,
                    report
                        .applied
                        .iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            Ok(())
        }
        Commands::Add(cmd) => {
            let note = execute_add(&NoteService::new(db), cmd)?;
            print!("Note created (id: {})", note.id);
            if !note.tags.is_empty() {
                let names: Vec<_> = note.tags.iter().map(|t| t.name.as_str()).collect();
                print!(" with tags: {}", names.join(", "));
            }
            println!();
            Ok(())
        }
        Commands::List(cmd) => {
            let notes = execute_list(&NoteService::new(db), cmd)?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&notes)?);
            } else {
                for note in &notes {
                    println!("{}", format_note_line(note));
                }
            }
            Ok(())
        }
        Commands::Tags(cmd) => {
            let tags = NoteService::new(db).list_tags(cmd.owner.map(UserId::new))?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&tags)?);
            } else {
                for tag in &tags {
                    println!("{:>5}  {} ({})", tag.tag.id, tag.tag.name, tag.note_count);
                }
            }
            Ok(())
        }
        Commands::CheckIndex(cmd) => {
            let audit = NoteService::new(db).audit_text_index()?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&audit)?);
            } else {
                println!(
                    "documents: {}, entries: {}, missing: {}, orphaned: {}, stale: {}",
                    audit.documents,
                    audit.entries,
                    audit.missing.len(),
                    audit.orphaned.len(),
                    audit.stale.len()
                );
            }
            if !audit.is_consistent() {
                anyhow::bail!("Text index is out of step with notes");
            }
            Ok(())
        }
    }
}

fn execute_add(service: &NoteService, cmd: &AddCommand) -> Result<Note> {
    let tags = cmd
        .tags
        .as_deref()
        .map(memostore::query::params::parse_tags)
        .unwrap_or_default();
    let mut note = NewNote::new(&cmd.title, &cmd.body)
        .pinned(cmd.pinned)
        .tags(tags);
    if let Some(kind) = &cmd.kind {
        note = note.kind(kind);
    }
    service
        .create_note(cmd.owner.map(UserId::new), note)
        .context("Failed to create note")
}

fn execute_list(service: &NoteService, cmd: &ListCommand) -> Result<Vec<Note>> {
    let raw = RawNoteQuery {
        q: cmd.q.clone(),
        tags: cmd.tags.clone(),
        tag: None,
        from: cmd.from.clone(),
        to: cmd.to.clone(),
        pinned: cmd.pinned.clone(),
        kind: cmd.kind.clone(),
        notebook: cmd.notebook.clone(),
        limit: cmd.limit.clone(),
        offset: cmd.offset.clone(),
    };
    let (query, dropped) = raw.parse(cmd.owner.map(UserId::new));
    for error in &dropped {
        eprintln!("Warning: ignoring {error}");
    }
    service.list_notes(&query)
}

fn format_note_line(note: &Note) -> String {
    let mut line = format!(
        "{:>5} {} {}",
        note.id,
        if note.pinned { "*" } else { " " },
        if note.title.is_empty() {
            note.body.lines().next().unwrap_or_default()
        } else {
            note.title.as_str()
        }
    );
    for tag in &note.tags {
        line.push_str(" #");
        line.push_str(&tag.name);
    }
    line
}
