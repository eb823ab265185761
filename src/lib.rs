pub mod app;
pub mod backend;
pub mod cli;
pub mod config;
pub mod filter;
pub mod highlight;
pub mod model;
pub mod registry;
pub mod render;
pub mod search;
pub mod storage;
pub mod ui;

pub use app::BoardState;
pub use backend::{BackendError, LocalBackend, NoteBackend, SessionJar};
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use model::{Note, NoteDraft, NoteId, NotePatch, User};
