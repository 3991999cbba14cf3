//! Configuration loading for repoindex
//!
//! Reads `~/.repoindex/config.yaml` when present. Every field is optional;
//! a missing file yields defaults. Environment variables take precedence
//! over config keys (`REPOINDEX_DB` for the store path,
//! `REPOINDEX_GITHUB_TOKEN` / `GITHUB_TOKEN` for credentials).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DB_FILE_NAME, ENV_DB_PATH, ENV_GITHUB_TOKEN,
    ENV_GITHUB_TOKEN_FALLBACK, ENV_VIEWS_PATH, VIEWS_FILE_NAME,
};
use crate::error::{RepoIndexError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Explicit store path; `~` is expanded
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZenodoConfig {
    /// ORCID used for DOI-registry author search
    pub orcid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Token used when no environment variable is set
    pub token: Option<String>,
}

/// User configuration, deserialized from `~/.repoindex/config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,

    /// Root specs to scan; may contain `~` and globs including `**`
    pub repository_directories: Vec<String>,

    /// Directory names/paths excluded from discovery (added to defaults)
    pub exclude_directories: Vec<String>,

    /// Explicit tags per repository path
    pub repository_tags: HashMap<String, Vec<String>>,

    pub zenodo: ZenodoConfig,

    pub github: GitHubConfig,
}

/// Path of the user config directory (`~/.repoindex`).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

impl Config {
    /// Load from the default location. Missing file → defaults,
    /// malformed file → config error.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| RepoIndexError::io(path, e))?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| RepoIndexError::config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve the store path: `REPOINDEX_DB` env, then `database.path`,
    /// then the default under the config directory.
    pub fn db_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(ref path) = self.database.path {
            return PathBuf::from(shellexpand::tilde(path).as_ref());
        }
        config_dir().join(DB_FILE_NAME)
    }

    /// Resolve the views file path: `REPOINDEX_VIEWS` env, then the default.
    pub fn views_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var(ENV_VIEWS_PATH) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        config_dir().join(VIEWS_FILE_NAME)
    }

    /// Resolve a GitHub token: env vars first, then the config key.
    pub fn github_token(&self) -> Option<String> {
        for var in [ENV_GITHUB_TOKEN, ENV_GITHUB_TOKEN_FALLBACK] {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }
        self.github.token.clone()
    }

    /// Tags configured for a repository path.
    pub fn tags_for(&self, path: &str) -> Vec<String> {
        self.repository_tags.get(path).cloned().unwrap_or_default()
    }
}
