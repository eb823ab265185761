use std::fmt;

use crate::backend::{BackendResult, NoteBackend};
use crate::model::{NoteDraft, NoteId, NotePatch};

/// A backend mutation that can be re-issued after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Refresh,
    Create(NoteDraft),
    Update { id: NoteId, patch: NotePatch },
    Delete(NoteId),
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::Refresh => write!(f, "load notes"),
            PendingAction::Create(draft) => write!(f, "create \"{}\"", draft.title),
            PendingAction::Update { id, .. } => write!(f, "save note {id}"),
            PendingAction::Delete(id) => write!(f, "delete note {id}"),
        }
    }
}

pub struct ActionDispatcher<'a> {
    backend: &'a mut dyn NoteBackend,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(backend: &'a mut dyn NoteBackend) -> Self {
        Self { backend }
    }

    /// Issues the mutation. `Refresh` is a no-op here; the caller re-fetches
    /// after every successful dispatch anyway.
    pub fn dispatch(&mut self, action: &PendingAction) -> BackendResult<()> {
        match action {
            PendingAction::Refresh => Ok(()),
            PendingAction::Create(draft) => self.create(draft),
            PendingAction::Update { id, patch } => self.update(*id, patch),
            PendingAction::Delete(id) => self.delete(*id),
        }
    }

    pub fn create(&mut self, draft: &NoteDraft) -> BackendResult<()> {
        self.backend.create_note(draft).map(|_| ())
    }

    pub fn update(&mut self, id: NoteId, patch: &NotePatch) -> BackendResult<()> {
        self.backend.update_note(id, patch).map(|_| ())
    }

    pub fn delete(&mut self, id: NoteId) -> BackendResult<()> {
        self.backend.delete_note(id)
    }
}
