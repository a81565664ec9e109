use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::locator::DirectoryLocator;

/// Project configuration, read from `seedbase.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeedbaseConfig {
    /// Directory holding the bundled seed assets
    pub seed_dir: Option<PathBuf>,
    /// File extension of database files (without the dot)
    pub extension: Option<String>,
    /// Candidate directories, highest priority first
    #[serde(default)]
    pub locations: Vec<PathBuf>,
    /// Directories where earlier releases kept copies that must be removed
    #[serde(default)]
    pub obsolete_locations: Vec<PathBuf>,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,
}

/// Per-database settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub expected_size: u64,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub reopen_after_commit: bool,
}

/// Options recognized when opening a database, resolved once per session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Exact byte size a valid database file must have
    pub expected_size: u64,
    /// Open the engine handle read-only
    pub read_only: bool,
    /// Close and re-open the handle after a batch consisting solely of `COMMIT`
    pub reopen_after_commit: bool,
}

impl OpenOptions {
    pub fn new(expected_size: u64) -> Self {
        Self { expected_size, ..Self::default() }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn reopen_after_commit(mut self, reopen: bool) -> Self {
        self.reopen_after_commit = reopen;
        self
    }
}

impl From<DatabaseConfig> for OpenOptions {
    fn from(db: DatabaseConfig) -> Self {
        Self {
            expected_size: db.expected_size,
            read_only: db.read_only,
            reopen_after_commit: db.reopen_after_commit,
        }
    }
}

impl SeedbaseConfig {
    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or(DEFAULT_EXTENSION)
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.seed_dir.clone().unwrap_or_else(|| PathBuf::from("assets"))
    }

    /// Open options for a configured database, if any
    pub fn open_options(&self, name: &str) -> Option<OpenOptions> {
        self.databases.get(name).copied().map(OpenOptions::from)
    }

    /// Build the storage locator described by this config
    pub fn locator(&self) -> DirectoryLocator {
        DirectoryLocator::new(self.locations.clone())
            .with_extension(self.extension())
            .with_seed_dir(self.seed_dir())
            .with_obsolete(self.obsolete_locations.clone())
    }
}

pub const DEFAULT_EXTENSION: &str = "db";

pub fn default_config_path() -> PathBuf {
    PathBuf::from("seedbase.toml")
}

/// Default candidate directories, relative to a base directory
pub fn default_locations_in(base: &Path) -> Vec<PathBuf> {
    vec![base.join(".seedbase").join("external"), base.join(".seedbase").join("databases")]
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<SeedbaseConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: SeedbaseConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &SeedbaseConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
