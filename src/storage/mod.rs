use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions};
use crate::model::{
    format_due_date, parse_due_date, tags_from_json, tags_to_json, Note, NoteDraft, NoteId,
    NotePatch, User, UserId,
};

mod schema;

const TODO_COLUMNS: &str = "id, title, content, tags, due_date, created_at";

/// A user row including the stored bcrypt hash.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
}

impl UserRecord {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
        }
    }
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn create_user(&self, email: &str, password_hash: &str) -> Result<UserRecord> {
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
                params![email, password_hash, now],
            )
            .with_context(|| format!("inserting user {email}"))?;
            Ok(UserRecord {
                id: conn.last_insert_rowid(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
            })
        })
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, email, password_hash FROM users WHERE email = ?1",
                    params![email],
                    user_from_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    pub fn create_session(
        &self,
        token: &str,
        user_id: UserId,
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    token,
                    user_id,
                    OffsetDateTime::now_utc().unix_timestamp(),
                    expires_at.unix_timestamp()
                ],
            )
            .context("inserting session")?;
            Ok(())
        })
    }

    /// The user behind a live session. Expired or unknown tokens give `None`.
    pub fn session_user(&self, token: &str, now: OffsetDateTime) -> Result<Option<User>> {
        self.with_connection(|conn| {
            let user = conn
                .query_row(
                    "SELECT u.id, u.email
                     FROM sessions s
                     JOIN users u ON u.id = s.user_id
                     WHERE s.token = ?1 AND s.expires_at > ?2",
                    params![token, now.unix_timestamp()],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            email: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
            Ok(removed > 0)
        })
    }

    pub fn purge_expired_sessions(&self, now: OffsetDateTime) -> Result<usize> {
        self.with_connection(|conn| {
            let removed = conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![now.unix_timestamp()],
            )?;
            Ok(removed)
        })
    }

    /// Every todo owned by `user_id`, newest first.
    pub fn list_todos(&self, user_id: UserId) -> Result<Vec<Note>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {TODO_COLUMNS} FROM todos
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let notes = stmt
                .query_map(params![user_id], note_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(notes)
        })
    }

    pub fn fetch_todo(&self, user_id: UserId, note_id: NoteId) -> Result<Option<Note>> {
        self.with_connection(|conn| fetch_todo_with(conn, user_id, note_id))
    }

    pub fn create_todo(&self, user_id: UserId, draft: &NoteDraft) -> Result<Note> {
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO todos (user_id, title, content, tags, due_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    user_id,
                    draft.title,
                    draft.content,
                    tags_to_json(&draft.tags),
                    draft.due_date.map(format_due_date),
                    now
                ],
            )
            .context("inserting todo")?;
            let note_id = conn.last_insert_rowid();
            match fetch_todo_with(conn, user_id, note_id)? {
                Some(note) => Ok(note),
                None => bail!("todo {note_id} vanished after insert"),
            }
        })
    }

    /// Applies the fields present in `patch`. `None` when the todo does not
    /// exist or belongs to someone else.
    pub fn update_todo(
        &self,
        user_id: UserId,
        note_id: NoteId,
        patch: &NotePatch,
    ) -> Result<Option<Note>> {
        self.with_connection(|conn| {
            let mut assignments: Vec<&str> = Vec::new();
            let mut values: Vec<SqlValue> = Vec::new();
            if let Some(title) = &patch.title {
                assignments.push("title = ?");
                values.push(SqlValue::Text(title.clone()));
            }
            if let Some(content) = &patch.content {
                assignments.push("content = ?");
                values.push(SqlValue::Text(content.clone()));
            }
            if let Some(tags) = &patch.tags {
                assignments.push("tags = ?");
                values.push(SqlValue::Text(tags_to_json(tags)));
            }
            if let Some(due_date) = &patch.due_date {
                assignments.push("due_date = ?");
                values.push(match due_date {
                    Some(date) => SqlValue::Text(format_due_date(*date)),
                    None => SqlValue::Null,
                });
            }

            if assignments.is_empty() {
                return fetch_todo_with(conn, user_id, note_id);
            }

            let sql = format!(
                "UPDATE todos SET {} WHERE id = ? AND user_id = ?",
                assignments.join(", ")
            );
            values.push(SqlValue::Integer(note_id));
            values.push(SqlValue::Integer(user_id));
            let updated = conn
                .execute(&sql, params_from_iter(values))
                .with_context(|| format!("updating todo {note_id}"))?;
            if updated == 0 {
                return Ok(None);
            }
            fetch_todo_with(conn, user_id, note_id)
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_todo(&self, user_id: UserId, note_id: NoteId) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM todos WHERE id = ?1 AND user_id = ?2",
                    params![note_id, user_id],
                )
                .with_context(|| format!("deleting todo {note_id}"))?;
            Ok(removed > 0)
        })
    }
}

fn fetch_todo_with(conn: &Connection, user_id: UserId, note_id: NoteId) -> Result<Option<Note>> {
    let sql = format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1 AND user_id = ?2");
    let note = conn
        .query_row(&sql, params![note_id, user_id], note_from_row)
        .optional()?;
    Ok(note)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let tags: Option<String> = row.get(3)?;
    let due_date: Option<String> = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        tags: tags.as_deref().map(tags_from_json).unwrap_or_default(),
        due_date: due_date.as_deref().and_then(parse_due_date),
        created_at: OffsetDateTime::from_unix_timestamp(created_at).ok(),
    })
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &paths.database_path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    tracing::debug!(path = %db_path.display(), "database ready");
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}
