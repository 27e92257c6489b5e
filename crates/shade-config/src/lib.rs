//! # shade-config
//!
//! Configuration management for shade.
//!
//! Loads configuration from:
//! 1. `~/.shade/config.toml` (global)
//! 2. `<project>/.shade/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory name used for both the global and the project config
pub const CONFIG_DIR: &str = ".shade";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub farm: FarmConfig,
    pub patterns: PatternConfig,
    pub sweep: SweepConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Load config for the current working directory
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir()?;
        Self::load_for(&cwd)
    }

    /// Load config from the standard locations for `project_dir`
    pub fn load_for(project_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.shade/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::read_file(&global_path)?;
            }
        }

        // 2. Project config (<project>/.shade/config.toml) - overrides global
        let project_path = Self::project_config_path(project_dir);
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::read_file(&project_path)?;
            config.merge(project_config);
        }

        // 3. Environment variable overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Global config path: ~/.shade/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Project config path: <project>/.shade/config.toml
    pub fn project_config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Merge a project config on top of this one.
    ///
    /// Sections that differ from their defaults replace the global value as a
    /// whole; pattern lists are replaced only when non-empty.
    pub fn merge(&mut self, other: Config) {
        if other.farm != FarmConfig::default() {
            self.farm = other.farm;
        }
        if !other.patterns.include.is_empty() {
            self.patterns.include = other.patterns.include;
        }
        if !other.patterns.exclude.is_empty() {
            self.patterns.exclude = other.patterns.exclude;
        }
        if other.sweep != SweepConfig::default() {
            self.sweep = other.sweep;
        }
        if other.sync != SyncConfig::default() {
            self.sync = other.sync;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("SHADE_MAX_ENTRIES") {
            self.farm.max_entries = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SHADE_MAX_ENTRIES",
                value: value.clone(),
            })?;
        }
        if let Ok(path) = std::env::var("SHADE_TEMP_DIR") {
            if !path.is_empty() {
                self.farm.temp_base = Some(PathBuf::from(path));
            }
        }
        if std::env::var_os("SHADE_NO_SYNC").is_some() {
            self.sync.enabled = false;
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    /// Render this config as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Farm creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Hard ceiling on planned entries before creation aborts
    pub max_entries: usize,
    /// Where farms are created (None = OS temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_base: Option<PathBuf>,
    /// Hide files matched by .gitignore / info/exclude / global excludes
    pub respect_gitignore: bool,
    /// Override for the global gitignore file (None = git's core.excludesFile)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_gitignore: Option<PathBuf>,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            temp_base: None,
            respect_gitignore: true,
            global_gitignore: None,
        }
    }
}

impl FarmConfig {
    /// Resolved temp base directory
    pub fn temp_base(&self) -> PathBuf {
        self.temp_base.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Include / exclude glob patterns, relative to the project root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Orphan sweep thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Sweep the temp base before creating a farm
    pub enabled: bool,
    /// Age after which an abandoned `-removing` directory is finished off
    pub removing_max_age_secs: u64,
    /// Age after which an abandoned farm is reclaimed
    pub farm_max_age_secs: u64,
    /// Age after which a farm's recorded pid is no longer trusted
    pub owner_max_age_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            removing_max_age_secs: 60 * 60,
            farm_max_age_secs: 24 * 60 * 60,
            owner_max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl SweepConfig {
    pub fn removing_max_age(&self) -> Duration {
        Duration::from_secs(self.removing_max_age_secs)
    }

    pub fn farm_max_age(&self) -> Duration {
        Duration::from_secs(self.farm_max_age_secs)
    }

    pub fn owner_max_age(&self) -> Duration {
        Duration::from_secs(self.owner_max_age_secs)
    }
}

/// Live sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Mirror edits made inside the farm back into the project
    pub enabled: bool,
    /// Quiet period before a written file is considered stable
    pub settle_ms: u64,
    /// OS metadata files that are never synced
    pub junk_patterns: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_ms: 150,
            junk_patterns: vec![
                ".DS_Store".to_string(),
                "._*".to_string(),
                ".Spotlight-V100".to_string(),
                ".Trashes".to_string(),
                "Thumbs.db".to_string(),
                "ehthumbs.db".to_string(),
                "desktop.ini".to_string(),
                "*.swp".to_string(),
                "*~".to_string(),
            ],
        }
    }
}

impl SyncConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
