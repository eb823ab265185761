use anyhow::{anyhow, Result};
use assert_matches::assert_matches;
use serde_json::json;
use tempfile::TempDir;

use notecards::app::{BoardState, ComposeMode, PendingAction};
use notecards::backend::{BackendError, BackendResult, LocalBackend, NoteBackend, SessionJar};
use notecards::config::{AuthOptions, ConfigPaths, StorageOptions};
use notecards::filter::{FilePreferenceStore, FilterState, MemoryPreferenceStore};
use notecards::model::{notes_from_value, Note, NoteDraft, NoteId, NotePatch, User};
use notecards::registry::TagRegistry;
use notecards::render::NoteRenderer;
use notecards::storage::{self, StorageHandle};

struct Harness {
    _temp: TempDir,
    paths: ConfigPaths,
    storage: StorageHandle,
}

impl Harness {
    fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted(temp.path());
        paths.ensure_directories()?;
        let options = StorageOptions {
            database_path: paths.database_path.clone(),
            ..StorageOptions::default()
        };
        let storage = storage::init(&paths, &options)?;
        Ok(Self {
            _temp: temp,
            paths,
            storage,
        })
    }

    fn backend(&self) -> LocalBackend {
        let auth = AuthOptions {
            bcrypt_cost: 4,
            ..AuthOptions::default()
        };
        LocalBackend::new(self.storage.clone(), SessionJar::in_memory(), &auth)
    }

    fn signed_in(&self, email: &str) -> Result<LocalBackend> {
        let mut backend = self.backend();
        backend.register(email, "correct horse")?;
        Ok(backend)
    }

    /// A board whose filters live in the harness's local storage file.
    fn board(&self) -> BoardState {
        let store = FilePreferenceStore::new(&self.paths.local_storage_path);
        BoardState::new(NoteRenderer::default(), FilterState::load(Box::new(store)))
    }
}

fn memory_board() -> BoardState {
    BoardState::new(
        NoteRenderer::default(),
        FilterState::load(Box::new(MemoryPreferenceStore::new())),
    )
}

fn draft(title: &str, content: &str, tags: &[&str]) -> NoteDraft {
    NoteDraft {
        title: title.into(),
        content: content.into(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        due_date: None,
    }
}

fn visible_titles(board: &BoardState) -> Vec<String> {
    board.visible_cards().map(|card| card.title.clone()).collect()
}

/// Passes every call through, except deletes while `failing_deletes` is set.
struct FlakyBackend {
    inner: LocalBackend,
    failing_deletes: usize,
}

impl NoteBackend for FlakyBackend {
    fn list_notes(&mut self) -> BackendResult<Vec<Note>> {
        self.inner.list_notes()
    }

    fn create_note(&mut self, draft: &NoteDraft) -> BackendResult<Note> {
        self.inner.create_note(draft)
    }

    fn update_note(&mut self, id: NoteId, patch: &NotePatch) -> BackendResult<Note> {
        self.inner.update_note(id, patch)
    }

    fn delete_note(&mut self, id: NoteId) -> BackendResult<()> {
        if self.failing_deletes > 0 {
            self.failing_deletes -= 1;
            return Err(BackendError::Transport(anyhow!("connection reset")));
        }
        self.inner.delete_note(id)
    }

    fn current_user(&mut self) -> BackendResult<Option<User>> {
        self.inner.current_user()
    }

    fn login(&mut self, email: &str, password: &str) -> BackendResult<User> {
        self.inner.login(email, password)
    }

    fn register(&mut self, email: &str, password: &str) -> BackendResult<User> {
        self.inner.register(email, password)
    }

    fn logout(&mut self) -> BackendResult<()> {
        self.inner.logout()
    }
}

#[test]
fn registry_counts_match_rendered_cards() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    backend.create_note(&draft("One", "a", &["#work", "#home"]))?;
    backend.create_note(&draft("Two", "b", &["work"]))?;
    backend.create_note(&draft("Three", "c", &[]))?;

    let mut board = harness.board();
    board.boot(&mut backend)?;

    assert_eq!(board.registry().len(), 2);
    for entry in board.registry().entries() {
        let holders = board
            .cards()
            .iter()
            .filter(|card| card.has_tag(&entry.tag))
            .count();
        assert_eq!(entry.count(), holders, "count for {}", entry.tag);
    }
    assert_eq!(board.registry().count("#work"), 2);
    Ok(())
}

#[test]
fn toggling_a_tag_twice_restores_visibility() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    backend.create_note(&draft("Report", "quarterly", &["#work"]))?;
    backend.create_note(&draft("Garden", "weeds", &["#home"]))?;

    let mut board = harness.board();
    board.boot(&mut backend)?;
    let before: Vec<bool> = board.cards().iter().map(|card| card.visible).collect();

    board.toggle_tag("#work");
    assert_eq!(visible_titles(&board), vec!["Report".to_string()]);
    board.toggle_tag("#work");

    let after: Vec<bool> = board.cards().iter().map(|card| card.visible).collect();
    assert_eq!(before, after);
    assert!(board.filters().is_empty());
    Ok(())
}

#[test]
fn visibility_requires_every_filter_and_the_query() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    backend.create_note(&draft("Ship release", "Tag and publish", &["#work", "#urgent"]))?;
    backend.create_note(&draft("Review PR", "Look at the parser", &["#work"]))?;
    backend.create_note(&draft("Call mom", "Sunday", &["#urgent"]))?;

    let mut board = harness.board();
    board.boot(&mut backend)?;
    board.toggle_tag("#work");
    board.toggle_tag("#urgent");
    assert_eq!(visible_titles(&board), vec!["Ship release".to_string()]);

    board.clear_filters();
    board.set_search("  PARSER ");
    assert_eq!(visible_titles(&board), vec!["Review PR".to_string()]);

    board.set_search("#urgent");
    let mut titles = visible_titles(&board);
    titles.sort();
    assert_eq!(titles, vec!["Call mom".to_string(), "Ship release".to_string()]);

    board.toggle_tag("#work");
    assert_eq!(visible_titles(&board), vec!["Ship release".to_string()]);
    assert_eq!(board.shown_count(), 1);
    Ok(())
}

#[test]
fn persisted_filters_reload_with_the_same_visibility() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    backend.create_note(&draft("Both", "x", &["#work", "#urgent"]))?;
    backend.create_note(&draft("Work only", "y", &["#work"]))?;

    let mut first = harness.board();
    first.boot(&mut backend)?;
    first.toggle_tag("#work");
    first.toggle_tag("#urgent");
    let expected = visible_titles(&first);

    let mut second = harness.board();
    second.boot(&mut backend)?;
    assert_eq!(visible_titles(&second), expected);
    assert!(second.filters().contains("#work"));
    assert!(second.filters().contains("#urgent"));
    assert!(second.registry().get("#urgent").is_some_and(|entry| entry.active));
    Ok(())
}

#[test]
fn new_note_stays_visible_under_its_own_filter() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    backend.create_note(&draft("Standup", "notes", &["#work"]))?;

    let mut board = harness.board();
    board.boot(&mut backend)?;
    let form = board.compose_mut();
    form.title = "Buy milk".into();
    form.content = "Two liters".into();
    form.tag_input = "errand".into();
    board.submit(&mut backend)?;

    board.toggle_tag("#errand");
    assert_eq!(visible_titles(&board), vec!["Buy milk".to_string()]);
    assert!(board
        .cards()
        .iter()
        .any(|card| card.title == "Standup" && !card.visible));
    Ok(())
}

#[test]
fn deleting_the_last_holder_drops_the_registry_entry() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    let errand = backend.create_note(&draft("Buy milk", "Two liters", &["#errand"]))?;
    backend.create_note(&draft("Standup", "notes", &["#work"]))?;

    let mut board = harness.board();
    board.boot(&mut backend)?;
    assert_eq!(board.registry().count("#errand"), 1);

    board.delete_note(&mut backend, errand.id)?;
    assert!(!board.registry().contains("#errand"));
    assert_eq!(board.registry().count("#work"), 1);
    assert_eq!(board.cards().len(), 1);
    Ok(())
}

#[test]
fn edit_then_cancel_leaves_the_backend_alone() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    let note = backend.create_note(&draft("Plan", "Write it down", &["#work"]))?;
    let before = backend.list_notes()?;

    let mut board = harness.board();
    board.boot(&mut backend)?;
    assert!(board.begin_edit(note.id));
    assert_eq!(board.compose().mode(), ComposeMode::Editing(note.id));
    board.compose_mut().title = "Changed my mind".into();
    board.cancel_edit();

    assert_eq!(board.compose().mode(), ComposeMode::Idle);
    assert!(board.compose().title.is_empty());
    assert!(board.cards().iter().all(|card| !card.editing));
    assert_eq!(backend.list_notes()?, before);
    Ok(())
}

#[test]
fn null_tags_render_without_chips() {
    let notes = notes_from_value(json!([
        { "id": 7, "title": "Loose", "content": "no tags here", "tags": null },
        { "id": 8, "title": "Odd", "content": "bad tags", "tags": "#work" }
    ]));
    assert_eq!(notes.len(), 2);

    let mut registry = TagRegistry::new();
    let cards = NoteRenderer::default().render(&notes, &mut registry);
    assert!(cards.iter().all(|card| card.tags.is_empty()));
    assert!(registry.is_empty());
}

#[test]
fn failed_delete_keeps_the_card_and_retry_finishes_it() -> Result<()> {
    let harness = Harness::new()?;
    let mut inner = harness.signed_in("ada@example.com")?;
    let errand = inner.create_note(&draft("Buy milk", "Two liters", &["#errand"]))?;
    inner.create_note(&draft("More milk", "Oat", &["#errand"]))?;
    let mut backend = FlakyBackend {
        inner,
        failing_deletes: 1,
    };

    let mut board = harness.board();
    board.boot(&mut backend)?;
    let result = board.delete_note(&mut backend, errand.id);
    assert_matches!(result, Err(BackendError::Transport(_)));

    let banner = board.banner().expect("banner after failed delete");
    assert_eq!(banner.retry, Some(PendingAction::Delete(errand.id)));
    assert!(board.cards().iter().any(|card| card.id == errand.id));
    assert_eq!(board.registry().count("#errand"), 2);

    assert!(board.retry(&mut backend)?);
    assert!(board.banner().is_none());
    assert!(board.cards().iter().all(|card| card.id != errand.id));
    assert_eq!(board.registry().count("#errand"), 1);
    assert!(!board.retry(&mut backend)?);
    Ok(())
}

#[test]
fn users_only_see_and_touch_their_own_notes() -> Result<()> {
    let harness = Harness::new()?;
    let mut ada = harness.signed_in("ada@example.com")?;
    let mut bob = harness.signed_in("bob@example.com")?;
    let secret = ada.create_note(&draft("Ada's plan", "private", &["#work"]))?;
    bob.create_note(&draft("Bob's list", "groceries", &["#errand"]))?;

    let mut bob_board = memory_board();
    bob_board.boot(&mut bob)?;
    let titles: Vec<&str> = bob_board.cards().iter().map(|card| card.title.as_str()).collect();
    assert_eq!(titles, vec!["Bob's list"]);
    assert!(!bob_board.registry().contains("#work"));

    let patch = NotePatch {
        title: Some("Hijacked".into()),
        ..NotePatch::default()
    };
    assert_matches!(bob.update_note(secret.id, &patch), Err(BackendError::NotFound(_)));
    assert_matches!(bob.delete_note(secret.id), Err(BackendError::NotFound(_)));
    assert_eq!(ada.list_notes()?[0].title, "Ada's plan");
    Ok(())
}

#[test]
fn signed_out_board_is_empty_and_mutations_expire_the_session() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.signed_in("ada@example.com")?;
    backend.create_note(&draft("Plan", "Write it down", &["#work"]))?;

    let mut board = memory_board();
    board.boot(&mut backend)?;
    assert_eq!(board.cards().len(), 1);

    // Another device ends the session behind the board's back.
    backend.logout()?;
    let form = board.compose_mut();
    form.title = "Late".into();
    form.content = "too late".into();
    assert_matches!(board.submit(&mut backend), Err(BackendError::Unauthenticated));
    assert!(board.user().is_none());
    assert!(board.cards().is_empty());
    assert!(board.registry().is_empty());
    let banner = board.banner().expect("session banner");
    assert_eq!(banner.message, "Your session expired. Sign in again.");
    assert_eq!(banner.retry, None);

    board.refresh(&mut backend)?;
    assert!(board.cards().is_empty());
    Ok(())
}
