use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use crate::app::{BoardState, SubmitOutcome};
use crate::backend::NoteBackend;
use crate::filter::FilterToggle;
use crate::model::{canonical_tag, notes_from_value, Note, NoteDraft, NoteId};
use crate::render::NoteCard;

#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    /// Account email
    pub email: String,
    /// Password (prompted if omitted)
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only show cards whose title, body or tags contain this text
    #[arg(long)]
    pub search: Option<String>,
    /// Ignore the saved tag filters
    #[arg(long)]
    pub all: bool,
    /// Print the visible notes as a JSON array instead of cards
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    /// Title for the note
    pub title: String,
    /// Note body. If omitted, reads from stdin.
    #[arg(long)]
    pub body: Option<String>,
    /// Tag to attach; repeat for several
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Due date as YYYY-MM-DD
    #[arg(long)]
    pub due: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Note identifier
    pub id: NoteId,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub body: Option<String>,
    /// Replaces every tag on the note; repeat for several
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Due date as YYYY-MM-DD
    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,
    /// Remove the due date
    #[arg(long)]
    pub clear_due: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IdArgs {
    /// Note identifier
    pub id: NoteId,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FilterCommand {
    /// Add the tag to the filters, or remove it when already there
    Toggle { tag: String },
    /// Remove every filter
    Clear,
    /// Print the active filters
    Show,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[command(subcommand)]
    pub command: FilterCommand,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// JSON file holding an array of notes
    pub path: PathBuf,
}

pub fn register(
    board: &mut BoardState,
    backend: &mut dyn NoteBackend,
    args: CredentialArgs,
) -> Result<String> {
    let password = password_or_prompt(args.password)?;
    let user = board
        .register(backend, &args.email, &password)
        .with_context(|| format!("registering {}", args.email.trim()))?;
    Ok(format!("Registered and signed in as {}\n", user.email))
}

pub fn login(
    board: &mut BoardState,
    backend: &mut dyn NoteBackend,
    args: CredentialArgs,
) -> Result<String> {
    let password = password_or_prompt(args.password)?;
    let user = board
        .login(backend, &args.email, &password)
        .with_context(|| format!("signing in as {}", args.email.trim()))?;
    Ok(format!(
        "Signed in as {} ({} note{})\n",
        user.email,
        board.cards().len(),
        plural(board.cards().len())
    ))
}

pub fn logout(board: &mut BoardState, backend: &mut dyn NoteBackend) -> Result<String> {
    board.logout(backend).context("signing out")?;
    Ok("Signed out\n".to_string())
}

pub fn whoami(backend: &mut dyn NoteBackend) -> Result<String> {
    Ok(match backend.current_user().context("resolving session")? {
        Some(user) => format!("{} (user #{})\n", user.email, user.id),
        None => "Not signed in\n".to_string(),
    })
}

pub fn list(board: &mut BoardState, backend: &mut dyn NoteBackend, args: ListArgs) -> Result<String> {
    load_board(board, backend)?;
    if let Some(search) = &args.search {
        board.set_search(search);
    }
    let cards: Vec<&NoteCard> = if args.all {
        board
            .cards()
            .iter()
            .filter(|card| board.query().matches(card.search_text()))
            .collect()
    } else {
        board.visible_cards().collect()
    };

    if args.json {
        let notes: Vec<&Note> = cards
            .iter()
            .filter_map(|card| board.notes().iter().find(|note| note.id == card.id))
            .collect();
        let mut out = serde_json::to_string_pretty(&notes).context("serializing notes")?;
        out.push('\n');
        return Ok(out);
    }

    let mut out = format_cards(&cards);
    let _ = write!(&mut out, "Shown: {} of {}", cards.len(), board.cards().len());
    if !args.all && !board.filters().is_empty() {
        let active: Vec<&str> = board.filters().iter().collect();
        let _ = write!(&mut out, "  filters {}", active.join(" "));
    }
    out.push('\n');
    Ok(out)
}

pub fn add(board: &mut BoardState, backend: &mut dyn NoteBackend, args: AddArgs) -> Result<String> {
    load_board(board, backend)?;
    let body = match args.body {
        Some(body) => body,
        None => read_stdin()?.unwrap_or_default(),
    };
    let form = board.compose_mut();
    form.reset();
    form.title = args.title;
    form.content = body;
    form.due_date = args.due.unwrap_or_default();
    for tag in &args.tags {
        form.tag_input = tag.clone();
        form.stage_tag();
    }
    let before: Vec<NoteId> = board.notes().iter().map(|note| note.id).collect();
    expect_saved(board.submit(backend).context("creating note")?)?;
    let created = board.notes().iter().find(|note| !before.contains(&note.id));
    Ok(match created {
        Some(note) => format!("Created note #{} {}\n", note.id, note.title),
        None => "Created note\n".to_string(),
    })
}

pub fn edit(board: &mut BoardState, backend: &mut dyn NoteBackend, args: EditArgs) -> Result<String> {
    load_board(board, backend)?;
    if !board.begin_edit(args.id) {
        bail!("note #{} not found", args.id);
    }
    let form = board.compose_mut();
    if let Some(title) = args.title {
        form.title = title;
    }
    if let Some(body) = args.body {
        form.content = body;
    }
    if let Some(due) = args.due {
        form.due_date = due;
    } else if args.clear_due {
        form.due_date.clear();
    }
    if !args.tags.is_empty() {
        while form.pop_staged().is_some() {}
        for tag in &args.tags {
            form.tag_input = tag.clone();
            form.stage_tag();
        }
    }
    expect_saved(
        board
            .submit(backend)
            .with_context(|| format!("updating note #{}", args.id))?,
    )?;
    Ok(format!("Updated note #{}\n", args.id))
}

pub fn delete(board: &mut BoardState, backend: &mut dyn NoteBackend, args: IdArgs) -> Result<String> {
    load_board(board, backend)?;
    board
        .delete_note(backend, args.id)
        .with_context(|| format!("deleting note #{}", args.id))?;
    Ok(format!("Deleted note #{}\n", args.id))
}

pub fn tags(board: &mut BoardState, backend: &mut dyn NoteBackend) -> Result<String> {
    load_board(board, backend)?;
    let registry = board.registry();
    if registry.is_empty() {
        return Ok("(no tags)\n".to_string());
    }
    let mut out = String::new();
    for entry in registry.entries() {
        let marker = if entry.active { '*' } else { ' ' };
        let _ = writeln!(&mut out, "{marker} {}", entry.label());
    }
    Ok(out)
}

pub fn filter(board: &mut BoardState, backend: &mut dyn NoteBackend, args: FilterArgs) -> Result<String> {
    match args.command {
        FilterCommand::Toggle { tag } => {
            let Some(tag) = canonical_tag(&tag) else {
                bail!("tag cannot be empty");
            };
            // Registry entries are only marked when the notes are loaded.
            if let Err(err) = board.boot(backend) {
                tracing::warn!(error = %err, "could not load notes before toggling");
            }
            Ok(match board.toggle_tag(&tag) {
                FilterToggle::Added => format!("Filtering by {tag}\n"),
                FilterToggle::Removed => format!("No longer filtering by {tag}\n"),
            })
        }
        FilterCommand::Clear => {
            board.clear_filters();
            Ok("Cleared tag filters\n".to_string())
        }
        FilterCommand::Show => {
            if board.filters().is_empty() {
                return Ok("(no filters)\n".to_string());
            }
            let active: Vec<&str> = board.filters().iter().collect();
            Ok(format!("{}\n", active.join(" ")))
        }
    }
}

/// Creates one note per readable entry. Malformed entries and entries
/// without a title are skipped.
pub fn import(board: &mut BoardState, backend: &mut dyn NoteBackend, args: ImportArgs) -> Result<String> {
    load_board(board, backend)?;
    let raw = fs::read_to_string(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.path.display()))?;
    if !value.is_array() {
        bail!("{} does not hold a JSON array", args.path.display());
    }

    let mut created = 0;
    let mut skipped = 0;
    for note in notes_from_value(value) {
        if note.title.trim().is_empty() {
            skipped += 1;
            continue;
        }
        let draft = NoteDraft {
            title: note.title,
            content: note.content,
            tags: note.tags,
            due_date: note.due_date,
        };
        backend
            .create_note(&draft)
            .with_context(|| format!("importing {:?}", draft.title))?;
        created += 1;
    }
    board.refresh(backend).context("reloading notes")?;
    tracing::info!(created, skipped, path = %args.path.display(), "import finished");

    let mut out = format!("Imported {created} note{}", plural(created));
    if skipped > 0 {
        let _ = write!(&mut out, " (skipped {skipped} without a title)");
    }
    out.push('\n');
    Ok(out)
}

fn load_board(board: &mut BoardState, backend: &mut dyn NoteBackend) -> Result<()> {
    board.boot(backend).context("loading notes")?;
    if board.user().is_none() {
        bail!("not signed in; run `notecards login <email>` first");
    }
    Ok(())
}

fn expect_saved(outcome: SubmitOutcome) -> Result<()> {
    match outcome {
        SubmitOutcome::Saved => Ok(()),
        SubmitOutcome::Incomplete => bail!("title and body are required"),
        SubmitOutcome::Invalid(err) => Err(err.into()),
    }
}

fn format_cards(cards: &[&NoteCard]) -> String {
    if cards.is_empty() {
        return "No notes to show.\n".to_string();
    }
    let mut out = String::new();
    for card in cards {
        let _ = writeln!(&mut out, "#{}  {}", card.id, card.title);
        if let Some(due) = &card.due_label {
            let _ = writeln!(&mut out, "    {due}");
        }
        if !card.tags.is_empty() {
            let _ = writeln!(&mut out, "    tags    {}", card.tags.join(" "));
        }
        let snippet = card.excerpt.replace('\n', " ");
        if !snippet.trim().is_empty() {
            let _ = writeln!(&mut out, "    {}", snippet.trim());
        }
        out.push('\n');
    }
    out
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => prompt("Password"),
    }
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, SessionJar};
    use crate::cli::board_state;
    use crate::config::{AppConfig, AuthOptions, ConfigPaths, StorageOptions};
    use crate::storage;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    struct Fixture {
        _temp: TempDir,
        paths: ConfigPaths,
        config: AppConfig,
        backend: LocalBackend,
    }

    impl Fixture {
        fn board(&self) -> BoardState {
            board_state(&self.config, &self.paths)
        }

        /// A fresh backend over the same files, like a second invocation.
        fn reopen(&mut self) -> TestResult {
            let storage = storage::init(&self.paths, &self.config.storage)?;
            let jar = SessionJar::open(&self.paths.session_path)?;
            self.backend = LocalBackend::new(storage, jar, &self.config.auth);
            Ok(())
        }
    }

    fn setup() -> TestResult<Fixture> {
        let temp = TempDir::new().context("creating temp dir")?;
        let paths = ConfigPaths::rooted(temp.path());
        paths.ensure_directories()?;
        let config = AppConfig {
            storage: StorageOptions {
                database_path: paths.database_path.clone(),
                ..StorageOptions::default()
            },
            auth: AuthOptions {
                bcrypt_cost: 4,
                ..AuthOptions::default()
            },
            ..AppConfig::default()
        };
        let storage = storage::init(&paths, &config.storage)?;
        let jar = SessionJar::open(&paths.session_path)?;
        let backend = LocalBackend::new(storage, jar, &config.auth);
        let mut fixture = Fixture {
            _temp: temp,
            paths,
            config,
            backend,
        };
        let mut board = fixture.board();
        register(
            &mut board,
            &mut fixture.backend,
            CredentialArgs {
                email: "ada@example.com".into(),
                password: Some("hunter22".into()),
            },
        )?;
        Ok(fixture)
    }

    fn add_note(fx: &mut Fixture, title: &str, body: &str, tags: &[&str]) -> TestResult<String> {
        let mut board = fx.board();
        add(
            &mut board,
            &mut fx.backend,
            AddArgs {
                title: title.into(),
                body: Some(body.into()),
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
                due: None,
            },
        )
    }

    #[test]
    fn session_survives_between_invocations() -> TestResult {
        let mut fx = setup()?;
        fx.reopen()?;
        assert_eq!(whoami(&mut fx.backend)?, "ada@example.com (user #1)\n");

        let mut board = fx.board();
        logout(&mut board, &mut fx.backend)?;
        fx.reopen()?;
        assert_eq!(whoami(&mut fx.backend)?, "Not signed in\n");

        let mut board = fx.board();
        let err = list(&mut board, &mut fx.backend, ListArgs::default()).unwrap_err();
        assert!(err.to_string().contains("not signed in"));
        Ok(())
    }

    #[test]
    fn list_respects_saved_filters_and_all_flag() -> TestResult {
        let mut fx = setup()?;
        add_note(&mut fx, "Buy milk", "Two liters", &["errand"])?;
        add_note(&mut fx, "Ship release", "Tag and publish", &["#work"])?;

        let mut board = fx.board();
        let toggled = filter(
            &mut board,
            &mut fx.backend,
            FilterArgs {
                command: FilterCommand::Toggle {
                    tag: "errand".into(),
                },
            },
        )?;
        assert_eq!(toggled, "Filtering by #errand\n");

        let mut board = fx.board();
        let filtered = list(&mut board, &mut fx.backend, ListArgs::default())?;
        assert!(filtered.contains("Buy milk"));
        assert!(!filtered.contains("Ship release"));
        assert!(filtered.contains("Shown: 1 of 2  filters #errand"));

        let mut board = fx.board();
        let everything = list(
            &mut board,
            &mut fx.backend,
            ListArgs {
                all: true,
                ..ListArgs::default()
            },
        )?;
        assert!(everything.contains("Ship release"));
        assert!(everything.contains("Shown: 2 of 2"));
        Ok(())
    }

    #[test]
    fn tags_marks_active_filters() -> TestResult {
        let mut fx = setup()?;
        add_note(&mut fx, "One", "a", &["#work", "#home"])?;
        add_note(&mut fx, "Two", "b", &["#work"])?;

        let mut board = fx.board();
        filter(
            &mut board,
            &mut fx.backend,
            FilterArgs {
                command: FilterCommand::Toggle { tag: "home".into() },
            },
        )?;

        let mut board = fx.board();
        let out = tags(&mut board, &mut fx.backend)?;
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.contains(&"  #work (2)"));
        assert!(lines.contains(&"* #home (1)"));
        Ok(())
    }

    #[test]
    fn edit_replaces_tags_and_clears_due_date() -> TestResult {
        let mut fx = setup()?;
        let mut board = fx.board();
        add(
            &mut board,
            &mut fx.backend,
            AddArgs {
                title: "Dentist".into(),
                body: Some("Call to book".into()),
                tags: vec!["health".into()],
                due: Some("2024-07-04".into()),
            },
        )?;
        let id = board.notes()[0].id;

        let mut board = fx.board();
        edit(
            &mut board,
            &mut fx.backend,
            EditArgs {
                id,
                tags: vec!["#errand".into()],
                clear_due: true,
                ..EditArgs::default()
            },
        )?;
        let note = &board.notes()[0];
        assert_eq!(note.title, "Dentist");
        assert_eq!(note.tags, vec!["#errand".to_string()]);
        assert_eq!(note.due_date, None);
        Ok(())
    }

    #[test]
    fn add_rejects_bad_due_date_and_missing_body() -> TestResult {
        let mut fx = setup()?;
        let mut board = fx.board();
        let err = add(
            &mut board,
            &mut fx.backend,
            AddArgs {
                title: "Taxes".into(),
                body: Some("File them".into()),
                due: Some("next week".into()),
                ..AddArgs::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));

        let err = add_note(&mut fx, "Taxes", "   ", &[]).unwrap_err();
        assert!(err.to_string().contains("title and body are required"));
        Ok(())
    }

    #[test]
    fn delete_removes_note_and_unknown_ids_fail() -> TestResult {
        let mut fx = setup()?;
        add_note(&mut fx, "Temp", "gone soon", &["#scratch"])?;
        let mut board = fx.board();
        load_board(&mut board, &mut fx.backend)?;
        let id = board.notes()[0].id;

        assert_eq!(
            delete(&mut board, &mut fx.backend, IdArgs { id })?,
            format!("Deleted note #{id}\n")
        );
        assert!(board.notes().is_empty());
        assert!(board.registry().is_empty());

        let mut board = fx.board();
        assert!(delete(&mut board, &mut fx.backend, IdArgs { id }).is_err());
        Ok(())
    }

    #[test]
    fn import_round_trips_a_json_listing() -> TestResult {
        let mut fx = setup()?;
        let file = fx.paths.state_dir.join("import.json");
        fs::write(
            &file,
            r##"[
                {"id": 1, "title": "Buy milk", "content": "Two liters", "tags": ["errand"], "due_date": "2024-07-04"},
                {"id": 2, "title": "Legacy", "description": "old field", "tags": null},
                {"id": 3, "title": "", "content": "no title"},
                {"title": "missing id"}
            ]"##,
        )?;

        let mut board = fx.board();
        let out = import(&mut board, &mut fx.backend, ImportArgs { path: file })?;
        assert_eq!(out, "Imported 2 notes (skipped 1 without a title)\n");

        let titles: Vec<&str> = board.notes().iter().map(|note| note.title.as_str()).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"Buy milk"));
        assert!(titles.contains(&"Legacy"));
        assert_eq!(board.registry().count("#errand"), 1);

        let mut board = fx.board();
        let json = list(
            &mut board,
            &mut fx.backend,
            ListArgs {
                json: true,
                ..ListArgs::default()
            },
        )?;
        let listed: serde_json::Value = serde_json::from_str(&json)?;
        assert_eq!(notes_from_value(listed).len(), 2);
        Ok(())
    }
}
