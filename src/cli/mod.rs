use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::{App, BoardState};
use crate::backend::{LocalBackend, SessionJar};
use crate::config::{AppConfig, ConfigLoader, ConfigPaths};
use crate::filter::{FilePreferenceStore, FilterState};
use crate::render::NoteRenderer;
use crate::storage;

pub mod commands;

use self::commands::{AddArgs, CredentialArgs, EditArgs, FilterArgs, IdArgs, ImportArgs, ListArgs};

#[derive(Parser, Debug)]
#[command(
    name = "notecards",
    version,
    about = "Tagged to-do cards with filtering and search"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over NOTECARDS_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over NOTECARDS_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive board (default)
    Tui,
    /// Create an account and sign in
    Register(CredentialArgs),
    /// Sign in with an existing account
    Login(CredentialArgs),
    /// End the current session
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Print the cards that pass the saved tag filters
    List(ListArgs),
    /// Create a note
    Add(AddArgs),
    /// Change an existing note
    Edit(EditArgs),
    /// Delete a note
    Delete(IdArgs),
    /// Show every tag with its note count
    Tags,
    /// Manage the saved tag filters
    Filter(FilterArgs),
    /// Create notes from a JSON array export
    Import(ImportArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut paths = ConfigPaths::discover()?;
    if let Some(file) = &cli.config {
        paths = paths.with_config_file(file);
    }
    if let Some(dir) = &cli.data_dir {
        paths = paths.with_data_dir(dir);
    }
    let loader = ConfigLoader::with_paths(paths);
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();

    let command = cli.command.unwrap_or(Commands::Tui);
    let log_file = matches!(command, Commands::Tui).then(|| paths.log_dir.join("notecards.log"));
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let config = Arc::new(loader.load_or_init()?);
    let storage = storage::init(&paths, &config.storage)?;
    let jar = SessionJar::open(&paths.session_path)?;
    let mut backend = LocalBackend::new(storage, jar, &config.auth);
    let mut board = board_state(&config, &paths);

    let output = match command {
        Commands::Tui => {
            let mut app = App::new(config, Box::new(backend), board);
            return app.run();
        }
        Commands::Register(args) => commands::register(&mut board, &mut backend, args)?,
        Commands::Login(args) => commands::login(&mut board, &mut backend, args)?,
        Commands::Logout => commands::logout(&mut board, &mut backend)?,
        Commands::Whoami => commands::whoami(&mut backend)?,
        Commands::List(args) => commands::list(&mut board, &mut backend, args)?,
        Commands::Add(args) => commands::add(&mut board, &mut backend, args)?,
        Commands::Edit(args) => commands::edit(&mut board, &mut backend, args)?,
        Commands::Delete(args) => commands::delete(&mut board, &mut backend, args)?,
        Commands::Tags => commands::tags(&mut board, &mut backend)?,
        Commands::Filter(args) => commands::filter(&mut board, &mut backend, args)?,
        Commands::Import(args) => commands::import(&mut board, &mut backend, args)?,
    };
    print!("{output}");
    Ok(())
}

/// A board whose filters persist next to the session file.
pub fn board_state(config: &AppConfig, paths: &ConfigPaths) -> BoardState {
    let store = FilePreferenceStore::new(&paths.local_storage_path);
    BoardState::new(
        NoteRenderer::new(config.board.excerpt_chars),
        FilterState::load(Box::new(store)),
    )
}

fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            // The terminal belongs to the board while it runs.
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}
