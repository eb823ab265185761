use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{BackendError, BackendResult, NoteBackend};
use crate::config::AuthOptions;
use crate::model::{canonical_tags, Note, NoteDraft, NoteId, NotePatch, User};
use crate::storage::StorageHandle;

/// Holds the session token between calls, optionally mirrored to a file.
#[derive(Debug, Clone, Default)]
pub struct SessionJar {
    path: Option<PathBuf>,
    token: Option<String>,
}

impl SessionJar {
    /// A jar that forgets its token when dropped.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads whatever token the file holds. A missing file is an empty jar.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let token = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading session {}", path.display()))?;
            Some(raw.trim().to_string()).filter(|token| !token.is_empty())
        } else {
            None
        };
        Ok(Self {
            path: Some(path),
            token,
        })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn store(&mut self, token: String) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(path, &token).with_context(|| format!("writing session {}", path.display()))?;
        }
        self.token = Some(token);
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.token = None;
        if let Some(path) = &self.path {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("removing session {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// [`NoteBackend`] over the local SQLite store with bcrypt-hashed passwords.
pub struct LocalBackend {
    storage: StorageHandle,
    jar: SessionJar,
    bcrypt_cost: u32,
    session_ttl: Duration,
}

impl LocalBackend {
    pub fn new(storage: StorageHandle, jar: SessionJar, auth: &AuthOptions) -> Self {
        Self {
            storage,
            jar,
            bcrypt_cost: auth.bcrypt_cost,
            session_ttl: auth.session_ttl(),
        }
    }

    fn require_user(&mut self) -> BackendResult<User> {
        self.current_user()?.ok_or(BackendError::Unauthenticated)
    }

    fn start_session(&mut self, user: &User) -> BackendResult<()> {
        let now = OffsetDateTime::now_utc();
        let purged = self.storage.purge_expired_sessions(now)?;
        if purged > 0 {
            tracing::debug!(purged, "dropped expired sessions");
        }
        if let Some(previous) = self.jar.token().map(str::to_string) {
            self.storage.delete_session(&previous)?;
        }
        let expires_at = now
            .checked_add(self.session_ttl)
            .ok_or_else(|| anyhow::anyhow!("session lifetime {} overflows the clock", self.session_ttl))?;
        let token = Uuid::new_v4().simple().to_string();
        self.storage.create_session(&token, user.id, expires_at)?;
        self.jar.store(token)?;
        tracing::info!(user_id = user.id, "session started");
        Ok(())
    }
}

fn credentials<'a>(email: &'a str, password: &'a str) -> BackendResult<(&'a str, &'a str)> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(BackendError::MissingCredentials);
    }
    Ok((email, password))
}

impl NoteBackend for LocalBackend {
    fn list_notes(&mut self) -> BackendResult<Vec<Note>> {
        let user = self.require_user()?;
        Ok(self.storage.list_todos(user.id)?)
    }

    fn create_note(&mut self, draft: &NoteDraft) -> BackendResult<Note> {
        let user = self.require_user()?;
        if draft.title.trim().is_empty() {
            return Err(BackendError::Rejected("Title is required".to_string()));
        }
        let draft = NoteDraft {
            tags: canonical_tags(&draft.tags),
            ..draft.clone()
        };
        let note = self.storage.create_todo(user.id, &draft)?;
        tracing::info!(note_id = note.id, user_id = user.id, "note created");
        Ok(note)
    }

    fn update_note(&mut self, id: NoteId, patch: &NotePatch) -> BackendResult<Note> {
        let user = self.require_user()?;
        let patch = NotePatch {
            tags: patch.tags.as_ref().map(canonical_tags),
            ..patch.clone()
        };
        match self.storage.update_todo(user.id, id, &patch)? {
            Some(note) => {
                tracing::info!(note_id = id, user_id = user.id, "note updated");
                Ok(note)
            }
            None => Err(BackendError::NotFound(id)),
        }
    }

    fn delete_note(&mut self, id: NoteId) -> BackendResult<()> {
        let user = self.require_user()?;
        if self.storage.delete_todo(user.id, id)? {
            tracing::info!(note_id = id, user_id = user.id, "note deleted");
            Ok(())
        } else {
            Err(BackendError::NotFound(id))
        }
    }

    fn current_user(&mut self) -> BackendResult<Option<User>> {
        let Some(token) = self.jar.token().map(str::to_string) else {
            return Ok(None);
        };
        let user = self
            .storage
            .session_user(&token, OffsetDateTime::now_utc())?;
        if user.is_none() {
            tracing::debug!("stored session is no longer valid");
            self.jar.clear()?;
        }
        Ok(user)
    }

    fn login(&mut self, email: &str, password: &str) -> BackendResult<User> {
        let (email, password) = credentials(email, password)?;
        let Some(record) = self.storage.find_user_by_email(email)? else {
            tracing::warn!(%email, "login for unknown email");
            return Err(BackendError::InvalidCredentials);
        };
        let valid = bcrypt::verify(password, &record.password_hash)
            .context("verifying password hash")?;
        if !valid {
            tracing::warn!(user_id = record.id, "login with wrong password");
            return Err(BackendError::InvalidCredentials);
        }
        let user = record.to_user();
        self.start_session(&user)?;
        Ok(user)
    }

    fn register(&mut self, email: &str, password: &str) -> BackendResult<User> {
        let (email, password) = credentials(email, password)?;
        if self.storage.find_user_by_email(email)?.is_some() {
            return Err(BackendError::EmailTaken);
        }
        let hash = bcrypt::hash(password, self.bcrypt_cost).context("hashing password")?;
        let user = self.storage.create_user(email, &hash)?.to_user();
        tracing::info!(user_id = user.id, "user registered");
        self.start_session(&user)?;
        Ok(user)
    }

    fn logout(&mut self) -> BackendResult<()> {
        if let Some(token) = self.jar.token().map(str::to_string) {
            self.storage.delete_session(&token)?;
            tracing::info!("session ended");
        }
        self.jar.clear()?;
        Ok(())
    }
}
