//! Configuration management for kmem.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (KMEM_*)
//! 2. Config file (`$KMEM_CONFIG` or `<data dir>/config.toml`)
//! 3. Default values

use anyhow::{Context, Result};
use directories::ProjectDirs;
use kmem_core::CompactionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace used when `--workspace` is not given
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Paths
    #[serde(default)]
    pub paths: PathsConfig,

    /// Compaction policy and schedule
    #[serde(default)]
    pub compaction: CompactionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for kmem data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Record store database (default: `<data_dir>/kmem.db`)
    pub database_path: Option<PathBuf>,

    /// Conflict ledger (default: `<data_dir>/conflicts.jsonl`)
    pub ledger_path: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_path: None,
            ledger_path: None,
        }
    }
}

/// Environment overrides, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub workspace: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            config_path: var("KMEM_CONFIG").map(PathBuf::from),
            database_path: var("KMEM_DATABASE_PATH").map(PathBuf::from),
            ledger_path: var("KMEM_LEDGER_PATH").map(PathBuf::from),
            workspace: var("KMEM_WORKSPACE"),
        }
    }
}

// Default value functions
fn default_workspace() -> String {
    "default".to_string()
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "kmem", "kmem") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kmem")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            paths: PathsConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        Self::load_with(&EnvOverrides::from_env())
    }

    /// Load configuration using explicit overrides.
    pub fn load_with(env: &EnvOverrides) -> Result<Self> {
        let config_path = env
            .config_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("config.toml"));

        let mut config = Self::from_file(&config_path)?;
        config.apply(env);

        config
            .compaction
            .validate()
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
        Ok(config)
    }

    /// Read a config file, falling back to defaults when it does not exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply(&mut self, env: &EnvOverrides) {
        if let Some(path) = &env.database_path {
            self.paths.database_path = Some(path.clone());
        }
        if let Some(path) = &env.ledger_path {
            self.paths.ledger_path = Some(path.clone());
        }
        if let Some(workspace) = &env.workspace {
            self.workspace = workspace.clone();
        }
    }

    /// Get the record store path.
    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database_path
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("kmem.db"))
    }

    /// Get the conflict ledger path.
    pub fn ledger_path(&self) -> PathBuf {
        self.paths
            .ledger_path
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("conflicts.jsonl"))
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        for path in [self.database_path(), self.ledger_path()] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        Ok(())
    }
}
