use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::render::DEFAULT_EXCERPT_CHARS;

const APP_DOMAIN: &str = "io";

pub const DEFAULT_BCRYPT_COST: u32 = 10;
/// Costs bcrypt accepts.
const BCRYPT_COSTS: std::ops::RangeInclusive<u32> = 4..=31;
const DEFAULT_SESSION_TTL_HOURS: u64 = 24 * 30;
const MAX_SESSION_TTL_HOURS: u64 = 24 * 365 * 10;
const APP_ORG: &str = "Notecards";
const APP_NAME: &str = "notecards";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
    /// Client-side key/value file holding the persisted tag filters.
    pub local_storage_path: PathBuf,
    /// Cookie jar with the current session token.
    pub session_path: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("NOTECARDS_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("NOTECARDS_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let state_dir = match &override_data {
            Some(data_root) => data_root.join("state"),
            None => project_dirs
                .state_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project_dirs.data_dir().join("state")),
        };
        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());

        Ok(Self::from_parts(config_dir, config_file, data_root, state_dir))
    }

    /// Every path rooted under one directory. Used by `--data-dir` and tests.
    pub fn rooted(root: &Path) -> Self {
        Self::from_parts(
            root.join("config"),
            root.join("config").join("config.toml"),
            root.join("data"),
            root.join("state"),
        )
    }

    fn from_parts(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            database_path: data_dir.join("notecards.db"),
            log_dir: state_dir.join("logs"),
            local_storage_path: state_dir.join("local_storage.json"),
            session_path: state_dir.join("session.cookie"),
            config_dir,
            config_file,
            data_dir,
            state_dir,
        }
    }

    /// Redirects data and state under `data_dir`, keeping the config location.
    pub fn with_data_dir(self, data_dir: &Path) -> Self {
        Self::from_parts(
            self.config_dir,
            self.config_file,
            data_dir.to_path_buf(),
            data_dir.join("state"),
        )
    }

    /// Replaces the config file location.
    pub fn with_config_file(mut self, config_file: &Path) -> Self {
        if let Some(parent) = config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.config_dir = parent.to_path_buf();
        }
        self.config_file = config_file.to_path_buf();
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.log_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub board: BoardOptions,
    pub storage: StorageOptions,
    pub auth: AuthOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if self.board.excerpt_chars == 0 {
            tracing::warn!("excerpt_chars of 0 would hide every body, using the default");
            self.board.excerpt_chars = DEFAULT_EXCERPT_CHARS;
        }
        if !BCRYPT_COSTS.contains(&self.auth.bcrypt_cost) {
            tracing::warn!(
                cost = self.auth.bcrypt_cost,
                "bcrypt cost out of range, falling back to {}",
                DEFAULT_BCRYPT_COST
            );
            self.auth.bcrypt_cost = DEFAULT_BCRYPT_COST;
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.auth.session_ttl_hours) {
            tracing::warn!(
                hours = self.auth.session_ttl_hours,
                "session_ttl_hours out of range, falling back to {}",
                DEFAULT_SESSION_TTL_HOURS
            );
            self.auth.session_ttl_hours = DEFAULT_SESSION_TTL_HOURS;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardOptions {
    /// Characters of body shown on a collapsed card.
    pub excerpt_chars: usize,
    /// Below this width the tag bar collapses to a single scroll row.
    pub tag_bar_min_width: u16,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            tag_bar_min_width: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    pub bcrypt_cost: u32,
    pub session_ttl_hours: u64,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
        }
    }
}

impl AuthOptions {
    /// Saturates instead of wrapping for hour counts past `i64::MAX`.
    pub fn session_ttl(&self) -> Duration {
        Duration::hours(i64::try_from(self.session_ttl_hours).unwrap_or(i64::MAX / 3600))
    }
}
