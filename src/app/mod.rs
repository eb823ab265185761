use std::io::Stdout;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::backend::{BackendResult, NoteBackend};
use crate::config::AppConfig;
use crate::filter::FilterToggle;
use crate::model::NoteId;
use crate::ui;

mod actions;
pub mod compose;
pub mod state;

pub use actions::PendingAction;
pub use compose::{ComposeError, ComposeField, ComposeForm, ComposeMode, Submission};
pub use state::{Banner, BoardState, SubmitOutcome};

/// Which part of the board receives key presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Board,
    Search,
    TagBar,
    Compose,
    ConfirmDelete(NoteId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignInField {
    #[default]
    Email,
    Password,
}

/// The sign-in overlay shown while nobody is signed in.
#[derive(Debug, Clone, Default)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
    pub field: SignInField,
    pub register: bool,
    pub error: Option<String>,
}

impl SignInForm {
    fn focused(&mut self) -> &mut String {
        match self.field {
            SignInField::Email => &mut self.email,
            SignInField::Password => &mut self.password,
        }
    }
}

/// Terminal-only state that never reaches the board controller.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub mode: InputMode,
    pub tag_cursor: usize,
    pub sign_in: SignInForm,
    pub tag_bar_min_width: u16,
}

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    ToggleExpand,
    EditSelected,
    DeleteSelected,
    ComposeNew,
    StartSearch,
    FocusTags,
    ClearFilters,
    Retry,
    Refresh,
    SignOut,
    DismissBanner,
}

pub struct App {
    pub config: Arc<AppConfig>,
    backend: Box<dyn NoteBackend>,
    state: BoardState,
    view: View,
    list_state: ListState,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, mut backend: Box<dyn NoteBackend>, mut state: BoardState) -> Self {
        if let Err(err) = state.boot(backend.as_mut()) {
            tracing::warn!(error = %err, "initial load failed");
        }
        let view = View {
            tag_bar_min_width: config.board.tag_bar_min_width,
            ..View::default()
        };
        Self {
            config,
            backend,
            state,
            view,
            list_state: ListState::default(),
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            terminal
                .draw(|frame| {
                    if self.state.shown_count() > 0 {
                        self.list_state.select(Some(self.state.selected()));
                    } else {
                        self.list_state.select(None);
                    }
                    ui::draw_app(frame, &self.state, &self.view, &mut self.list_state);
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            if event::poll(self.tick_rate).context("polling for terminal events")? {
                // Resizes need nothing: the next draw picks up the new size.
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }
        }
        Ok(())
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        if self.state.user().is_none() {
            self.view.mode = InputMode::Board;
            self.handle_sign_in_key(key);
            return;
        }

        match self.view.mode {
            InputMode::ConfirmDelete(id) => self.handle_confirm_key(key, id),
            InputMode::Compose => self.handle_compose_key(key),
            InputMode::Search => self.handle_search_key(key),
            InputMode::TagBar => self.handle_tag_bar_key(key),
            InputMode::Board => {
                if let Some(action) = board_action(key) {
                    self.handle_action(action);
                }
            }
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::ToggleExpand => {
                if let Some(id) = self.selected_id() {
                    self.state.toggle_expanded(id);
                }
            }
            Action::EditSelected => {
                if let Some(id) = self.selected_id() {
                    if self.state.begin_edit(id) {
                        self.view.mode = InputMode::Compose;
                        self.state
                            .set_status_message(Some("Editing: Ctrl-s to save, Esc to cancel"));
                    }
                }
            }
            Action::DeleteSelected => {
                if let Some(id) = self.selected_id() {
                    self.view.mode = InputMode::ConfirmDelete(id);
                }
            }
            Action::ComposeNew => {
                if self.state.compose().editing_id().is_some() {
                    self.state.cancel_edit();
                }
                self.state.compose_mut().focus = ComposeField::Title;
                self.view.mode = InputMode::Compose;
                self.state
                    .set_status_message(Some("New note: Tab moves between fields, Ctrl-s saves"));
            }
            Action::StartSearch => self.view.mode = InputMode::Search,
            Action::FocusTags => {
                if self.state.registry().is_empty() {
                    self.state.set_status_message(Some("No tags on the board yet"));
                } else {
                    self.clamp_tag_cursor();
                    self.view.mode = InputMode::TagBar;
                }
            }
            Action::ClearFilters => {
                self.state.clear_filters();
                self.state.set_status_message(Some("Filters cleared"));
            }
            Action::Retry => {
                let retried = self.state.retry(self.backend.as_mut());
                if let Some(false) = settle(retried) {
                    self.state.set_status_message(Some("Nothing to retry"));
                }
            }
            Action::Refresh => {
                let refreshed = self.state.refresh(self.backend.as_mut());
                if settle(refreshed).is_some() {
                    self.state.set_status_message(Some("Refreshed"));
                }
            }
            Action::SignOut => {
                let result = self.state.logout(self.backend.as_mut());
                settle(result);
                self.view = View {
                    tag_bar_min_width: self.view.tag_bar_min_width,
                    ..View::default()
                };
            }
            Action::DismissBanner => self.state.dismiss_banner(),
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent, id: NoteId) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                self.view.mode = InputMode::Board;
                let result = self.state.delete_note(self.backend.as_mut(), id);
                if settle(result).is_some() {
                    self.state.set_status_message(Some(format!("Deleted note {id}")));
                }
            }
            KeyCode::Char('n') | KeyCode::Esc => self.view.mode = InputMode::Board,
            _ => {}
        }
    }

    fn handle_compose_key(&mut self, key: KeyEvent) {
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        match key.code {
            KeyCode::Esc => {
                self.state.cancel_edit();
                self.state.set_status_message(None::<String>);
                self.view.mode = InputMode::Board;
            }
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                let submitted = self.state.submit(self.backend.as_mut());
                if let Some(SubmitOutcome::Saved) = settle(submitted) {
                    self.view.mode = InputMode::Board;
                }
            }
            KeyCode::Tab => self.state.compose_mut().focus_next(),
            KeyCode::Enter => {
                let compose = self.state.compose_mut();
                match compose.focus {
                    ComposeField::Tag => {
                        compose.stage_tag();
                    }
                    ComposeField::Content => compose.insert_char('\n'),
                    ComposeField::Title | ComposeField::DueDate => compose.focus_next(),
                }
            }
            KeyCode::Left | KeyCode::Right => {
                let compose = self.state.compose_mut();
                if compose.focus == ComposeField::Tag && compose.tag_input.is_empty() {
                    compose.move_chip_cursor(if key.code == KeyCode::Left { -1 } else { 1 });
                }
            }
            KeyCode::Delete => {
                let compose = self.state.compose_mut();
                if compose.focus == ComposeField::Tag {
                    compose.unstage_selected();
                }
            }
            KeyCode::Backspace => self.state.compose_mut().backspace(),
            KeyCode::Char(ch) if plain => self.state.compose_mut().insert_char(ch),
            _ => {}
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.state.clear_search();
                self.view.mode = InputMode::Board;
            }
            KeyCode::Enter => self.view.mode = InputMode::Board,
            KeyCode::Backspace => self.state.pop_search_char(),
            KeyCode::Char(ch)
                if !key.modifiers.intersects(
                    KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                ) =>
            {
                self.state.push_search_char(ch)
            }
            _ => {}
        }
    }

    fn handle_tag_bar_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Left | KeyCode::Char('h') => {
                self.view.tag_cursor = self.view.tag_cursor.saturating_sub(1);
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.view.tag_cursor += 1;
                self.clamp_tag_cursor();
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                let cursor = self.view.tag_cursor;
                let tag = self.state.registry().get_index(cursor).map(|entry| entry.tag.clone());
                if let Some(tag) = tag {
                    let outcome = self.state.toggle_tag(&tag);
                    if outcome == FilterToggle::Added {
                        self.view.tag_cursor = self.state.registry().position(&tag).unwrap_or(0);
                    }
                }
            }
            KeyCode::Char('x') => self.state.clear_filters(),
            KeyCode::Esc | KeyCode::Char('t') => self.view.mode = InputMode::Board,
            _ => {}
        }
    }

    fn handle_sign_in_key(&mut self, key: KeyEvent) {
        let form = &mut self.view.sign_in;
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab => {
                form.field = match form.field {
                    SignInField::Email => SignInField::Password,
                    SignInField::Password => SignInField::Email,
                };
            }
            KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                form.register = !form.register;
                form.error = None;
            }
            KeyCode::Enter => self.submit_sign_in(),
            KeyCode::Backspace => {
                form.focused().pop();
            }
            KeyCode::Char(ch)
                if !key.modifiers.intersects(
                    KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                ) =>
            {
                form.focused().push(ch);
            }
            _ => {}
        }
    }

    fn submit_sign_in(&mut self) {
        let form = &self.view.sign_in;
        let (email, password) = (form.email.clone(), form.password.clone());
        let result = if form.register {
            self.state.register(self.backend.as_mut(), &email, &password)
        } else {
            self.state.login(self.backend.as_mut(), &email, &password)
        };
        match result {
            Ok(_) => {
                self.view.sign_in = SignInForm::default();
                self.view.mode = InputMode::Board;
            }
            Err(err) => {
                tracing::info!(error = %err, "sign-in rejected");
                self.view.sign_in.password.clear();
                self.view.sign_in.error = Some(err.to_string());
            }
        }
    }

    fn selected_id(&self) -> Option<NoteId> {
        self.state.selected_card().map(|card| card.id)
    }

    fn clamp_tag_cursor(&mut self) {
        let len = self.state.registry().len();
        if len == 0 {
            self.view.tag_cursor = 0;
        } else if self.view.tag_cursor >= len {
            self.view.tag_cursor = len - 1;
        }
    }
}

/// Failures already sit in the banner; only the outcome matters here.
fn settle<T>(result: BackendResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(error = %err, "action did not complete");
            None
        }
    }
}

fn board_action(key: KeyEvent) -> Option<Action> {
    let plain = !key
        .modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
    match key.code {
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::Refresh)
        }
        KeyCode::Char('q') if plain => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
        KeyCode::Enter => Some(Action::ToggleExpand),
        KeyCode::Char('e') if plain => Some(Action::EditSelected),
        KeyCode::Char('d') if plain => Some(Action::DeleteSelected),
        KeyCode::Char('a') if plain => Some(Action::ComposeNew),
        KeyCode::Char('/') if plain => Some(Action::StartSearch),
        KeyCode::Char('t') if plain => Some(Action::FocusTags),
        KeyCode::Char('x') if plain => Some(Action::ClearFilters),
        KeyCode::Char('r') if plain => Some(Action::Retry),
        KeyCode::Char('L') => Some(Action::SignOut),
        KeyCode::Esc => Some(Action::DismissBanner),
        _ => None,
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
