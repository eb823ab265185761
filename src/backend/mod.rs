use thiserror::Error;

use crate::model::{Note, NoteDraft, NoteId, NotePatch, User};

mod local;

pub use local::{LocalBackend, SessionJar};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not logged in")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailTaken,
    #[error("missing email or password")]
    MissingCredentials,
    #[error("note {0} not found")]
    NotFound(NoteId),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl BackendError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, BackendError::Unauthenticated)
    }

    /// Only transport failures can succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Everything the board needs from the server side.
///
/// Note calls are scoped to the signed-in user and fail with
/// [`BackendError::Unauthenticated`] when there is none.
pub trait NoteBackend {
    /// All of the user's notes, newest first.
    fn list_notes(&mut self) -> BackendResult<Vec<Note>>;
    fn create_note(&mut self, draft: &NoteDraft) -> BackendResult<Note>;
    /// Only the fields present in `patch` change.
    fn update_note(&mut self, id: NoteId, patch: &NotePatch) -> BackendResult<Note>;
    fn delete_note(&mut self, id: NoteId) -> BackendResult<()>;

    fn current_user(&mut self) -> BackendResult<Option<User>>;
    fn login(&mut self, email: &str, password: &str) -> BackendResult<User>;
    /// Creates the account and signs it in.
    fn register(&mut self, email: &str, password: &str) -> BackendResult<User>;
    fn logout(&mut self) -> BackendResult<()>;
}
