use std::collections::HashSet;

use crate::app::actions::{ActionDispatcher, PendingAction};
use crate::app::compose::{ComposeError, ComposeForm, Submission};
use crate::backend::{BackendError, BackendResult, NoteBackend};
use crate::filter::{FilterSet, FilterState, FilterToggle};
use crate::model::{Note, NoteId, User};
use crate::registry::TagRegistry;
use crate::render::{unregister_card, NoteCard, NoteRenderer};
use crate::search::{self, SearchQuery};

const SESSION_EXPIRED: &str = "Your session expired. Sign in again.";

/// Failure notice shown above the board. `retry` is set when re-issuing
/// the failed call could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub message: String,
    pub retry: Option<PendingAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Saved,
    /// Title or body was blank; nothing was sent.
    Incomplete,
    Invalid(ComposeError),
}

/// Everything the board shows, derived from the last successful fetch.
///
/// Cards and registry entries are rebuilt from `notes` on every fetch and
/// on every failure, so tag counts always match the rendered cards.
#[derive(Debug)]
pub struct BoardState {
    notes: Vec<Note>,
    cards: Vec<NoteCard>,
    registry: TagRegistry,
    filters: FilterState,
    query: SearchQuery,
    compose: ComposeForm,
    user: Option<User>,
    banner: Option<Banner>,
    status_message: Option<String>,
    expanded: HashSet<NoteId>,
    selected: usize,
    shown: usize,
    renderer: NoteRenderer,
}

impl BoardState {
    /// `filters` must already be loaded so the first render honours them.
    pub fn new(renderer: NoteRenderer, filters: FilterState) -> Self {
        Self {
            notes: Vec::new(),
            cards: Vec::new(),
            registry: TagRegistry::new(),
            filters,
            query: SearchQuery::default(),
            compose: ComposeForm::new(),
            user: None,
            banner: None,
            status_message: None,
            expanded: HashSet::new(),
            selected: 0,
            shown: 0,
            renderer,
        }
    }

    /// Resolves the session, then fetches and renders.
    pub fn boot(&mut self, backend: &mut dyn NoteBackend) -> BackendResult<()> {
        match backend.current_user() {
            Ok(user) => self.user = user,
            Err(err) => return Err(self.fail(PendingAction::Refresh, err)),
        }
        if self.user.is_none() {
            self.clear_session_state();
            return Ok(());
        }
        self.refresh(backend)
    }

    /// Replaces the local copy with the backend's list and re-renders.
    /// An unauthenticated answer is an empty, signed-out board.
    pub fn refresh(&mut self, backend: &mut dyn NoteBackend) -> BackendResult<()> {
        match backend.list_notes() {
            Ok(notes) => {
                tracing::debug!(count = notes.len(), "notes fetched");
                self.notes = notes;
                if self.banner.as_ref().is_some_and(|banner| {
                    banner.retry == Some(PendingAction::Refresh)
                }) {
                    self.banner = None;
                }
                self.rerender();
                Ok(())
            }
            Err(BackendError::Unauthenticated) => {
                tracing::info!("not signed in; showing an empty board");
                self.clear_session_state();
                Ok(())
            }
            Err(err) => Err(self.fail(PendingAction::Refresh, err)),
        }
    }

    pub fn toggle_tag(&mut self, tag: &str) -> FilterToggle {
        let outcome = self.filters.toggle(tag);
        match outcome {
            FilterToggle::Added => {
                self.registry.set_active(tag, true);
                self.registry.promote(tag);
            }
            FilterToggle::Removed => self.registry.set_active(tag, false),
        }
        tracing::debug!(%tag, ?outcome, "tag filter toggled");
        self.recompute();
        outcome
    }

    /// Toggles the tag of the registry entry at `index` in display order.
    pub fn toggle_tag_at(&mut self, index: usize) -> Option<FilterToggle> {
        let tag = self.registry.get_index(index)?.tag.clone();
        Some(self.toggle_tag(&tag))
    }

    pub fn clear_filters(&mut self) {
        let active: Vec<String> = self.filters.set().iter().map(str::to_string).collect();
        for tag in &active {
            self.registry.set_active(tag, false);
        }
        self.filters.clear();
        self.recompute();
    }

    pub fn set_search(&mut self, raw: &str) {
        self.query = SearchQuery::new(raw);
        self.recompute();
    }

    pub fn push_search_char(&mut self, ch: char) {
        self.query.push(ch);
        self.recompute();
    }

    pub fn pop_search_char(&mut self) {
        self.query.pop();
        self.recompute();
    }

    pub fn clear_search(&mut self) {
        self.query.clear();
        self.recompute();
    }

    /// Drops the card locally, then asks the backend to delete and re-fetches.
    /// An edit of the same note ends only once the delete succeeds.
    pub fn delete_note(&mut self, backend: &mut dyn NoteBackend, id: NoteId) -> BackendResult<()> {
        if let Some(position) = self.cards.iter().position(|card| card.id == id) {
            let card = self.cards.remove(position);
            unregister_card(&card, &mut self.registry);
            self.expanded.remove(&id);
            self.recompute();
        }
        let action = PendingAction::Delete(id);
        let dispatched = ActionDispatcher::new(&mut *backend).dispatch(&action);
        if let Err(err) = dispatched {
            return Err(self.fail(action, err));
        }
        if self.compose.editing_id() == Some(id) {
            self.cancel_edit();
        }
        self.refresh(backend)
    }

    /// Loads the note into the compose form. `false` when it is not on the board.
    pub fn begin_edit(&mut self, id: NoteId) -> bool {
        let Some(note) = self.notes.iter().find(|note| note.id == id) else {
            return false;
        };
        self.compose.begin_edit(note);
        for card in &mut self.cards {
            card.editing = card.id == id;
        }
        true
    }

    /// Leaves the compose form idle and empty. No backend call.
    pub fn cancel_edit(&mut self) {
        self.compose.reset();
        for card in &mut self.cards {
            card.editing = false;
        }
    }

    /// Flips a card between excerpt and full body. Returns the new state.
    pub fn toggle_expanded(&mut self, id: NoteId) -> Option<bool> {
        let card = self.cards.iter_mut().find(|card| card.id == id)?;
        card.expanded = !card.expanded;
        if card.expanded {
            self.expanded.insert(id);
        } else {
            self.expanded.remove(&id);
        }
        Some(card.expanded)
    }

    /// Creates or updates from the compose form, then re-fetches.
    ///
    /// Blank or invalid forms never reach the backend. On failure the form
    /// keeps its contents and the banner offers a retry.
    pub fn submit(&mut self, backend: &mut dyn NoteBackend) -> BackendResult<SubmitOutcome> {
        let submission = match self.compose.prepare() {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                self.status_message = Some("Title and body are required".to_string());
                return Ok(SubmitOutcome::Incomplete);
            }
            Err(err) => {
                self.status_message = Some(err.to_string());
                return Ok(SubmitOutcome::Invalid(err));
            }
        };
        let action = match submission {
            Submission::Create(draft) => PendingAction::Create(draft),
            Submission::Update { id, patch } => PendingAction::Update { id, patch },
        };
        self.save(backend, action)?;
        Ok(SubmitOutcome::Saved)
    }

    /// Re-issues the action held by the banner. `Ok(false)` when there is none.
    pub fn retry(&mut self, backend: &mut dyn NoteBackend) -> BackendResult<bool> {
        let Some(action) = self.banner.as_ref().and_then(|banner| banner.retry.clone()) else {
            return Ok(false);
        };
        self.banner = None;
        tracing::info!(action = %action, "retrying");
        match action {
            PendingAction::Refresh => self.refresh(backend)?,
            PendingAction::Delete(id) => self.delete_note(backend, id)?,
            PendingAction::Create(_) | PendingAction::Update { .. } => self.save(backend, action)?,
        }
        Ok(true)
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn login(
        &mut self,
        backend: &mut dyn NoteBackend,
        email: &str,
        password: &str,
    ) -> BackendResult<User> {
        let user = backend.login(email, password)?;
        self.signed_in(backend, user.clone())?;
        Ok(user)
    }

    pub fn register(
        &mut self,
        backend: &mut dyn NoteBackend,
        email: &str,
        password: &str,
    ) -> BackendResult<User> {
        let user = backend.register(email, password)?;
        self.signed_in(backend, user.clone())?;
        Ok(user)
    }

    /// Signs out locally even when the backend call fails.
    pub fn logout(&mut self, backend: &mut dyn NoteBackend) -> BackendResult<()> {
        let result = backend.logout();
        if let Err(err) = &result {
            tracing::warn!(error = %err, "logout call failed; clearing local session anyway");
        }
        self.banner = None;
        self.clear_session_state();
        self.status_message = Some("Signed out".to_string());
        result
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn cards(&self) -> &[NoteCard] {
        &self.cards
    }

    pub fn visible_cards(&self) -> impl Iterator<Item = &NoteCard> {
        self.cards.iter().filter(|card| card.visible)
    }

    pub fn shown_count(&self) -> usize {
        self.shown
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn filters(&self) -> &FilterSet {
        self.filters.set()
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn compose(&self) -> &ComposeForm {
        &self.compose
    }

    pub fn compose_mut(&mut self) -> &mut ComposeForm {
        &mut self.compose
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    /// Index of the selection among the visible cards.
    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_card(&self) -> Option<&NoteCard> {
        self.visible_cards().nth(self.selected)
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.shown == 0 {
            return;
        }
        let last = self.shown as isize - 1;
        self.selected = (self.selected as isize + delta).clamp(0, last) as usize;
    }

    fn normalize_selection(&mut self) {
        if self.shown == 0 {
            self.selected = 0;
        } else if self.selected >= self.shown {
            self.selected = self.shown - 1;
        }
    }

    fn signed_in(&mut self, backend: &mut dyn NoteBackend, user: User) -> BackendResult<()> {
        self.status_message = Some(format!("Signed in as {}", user.email));
        self.user = Some(user);
        self.banner = None;
        self.refresh(backend)
    }

    /// Sends a create or update. The form resets as soon as the backend
    /// accepts it, before the re-fetch.
    fn save(&mut self, backend: &mut dyn NoteBackend, action: PendingAction) -> BackendResult<()> {
        let dispatched = ActionDispatcher::new(&mut *backend).dispatch(&action);
        if let Err(err) = dispatched {
            return Err(self.fail(action, err));
        }
        tracing::info!(action = %action, "note saved");
        self.cancel_edit();
        self.status_message = Some("Saved".to_string());
        self.refresh(backend)
    }

    /// Records a failed call and restores the board from the last good list.
    fn fail(&mut self, action: PendingAction, err: BackendError) -> BackendError {
        if err.is_unauthenticated() {
            tracing::warn!(action = %action, "session rejected by backend");
            self.clear_session_state();
            self.banner = Some(Banner {
                message: SESSION_EXPIRED.to_string(),
                retry: None,
            });
            return err;
        }
        tracing::warn!(action = %action, error = %err, "backend call failed");
        let message = format!("Could not {action}: {err}");
        let retry = err.is_retryable().then_some(action);
        self.banner = Some(Banner { message, retry });
        self.rerender();
        err
    }

    fn clear_session_state(&mut self) {
        self.user = None;
        self.notes.clear();
        self.expanded.clear();
        self.compose.reset();
        self.rerender();
    }

    fn rerender(&mut self) {
        self.cards = self.renderer.render(&self.notes, &mut self.registry);

        let present: HashSet<NoteId> = self.notes.iter().map(|note| note.id).collect();
        self.expanded.retain(|id| present.contains(id));
        if let Some(editing) = self.compose.editing_id() {
            if !present.contains(&editing) {
                tracing::debug!(note_id = editing, "edited note is gone; leaving edit mode");
                self.compose.reset();
            }
        }
        let editing = self.compose.editing_id();
        for card in &mut self.cards {
            card.expanded = self.expanded.contains(&card.id);
            card.editing = editing == Some(card.id);
        }

        let active: Vec<String> = self.filters.set().iter().map(str::to_string).collect();
        for tag in &active {
            self.registry.set_active(tag, true);
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        self.shown = search::recompute(&mut self.cards, self.filters.set(), &self.query);
        self.normalize_selection();
    }
}
