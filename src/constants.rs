//! Central constants for repoindex configuration
//!
//! All string literals for paths, filenames, and configuration should be defined here
//! to avoid duplication and ensure consistency across the codebase.

use std::sync::atomic::AtomicBool;

/// Name of the config directory in user home
pub const CONFIG_DIR_NAME: &str = ".repoindex";

/// Name of the database file inside the config directory
pub const DB_FILE_NAME: &str = "index.db";

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Name of the views file inside the config directory
pub const VIEWS_FILE_NAME: &str = "views.yaml";

/// Environment variable overriding the database path
pub const ENV_DB_PATH: &str = "REPOINDEX_DB";

/// Environment variable overriding the views file path
pub const ENV_VIEWS_PATH: &str = "REPOINDEX_VIEWS";

/// Environment variables supplying a GitHub token, in precedence order
pub const ENV_GITHUB_TOKEN: &str = "REPOINDEX_GITHUB_TOKEN";
pub const ENV_GITHUB_TOKEN_FALLBACK: &str = "GITHUB_TOKEN";

/// Default event scan window for refresh
pub const DEFAULT_EVENT_WINDOW: &str = "90d";

/// Fallback window when a duration string cannot be parsed
pub const FALLBACK_WINDOW_DAYS: i64 = 30;

/// Per-request timeout for remote adapters (seconds)
pub const REMOTE_TIMEOUT_SECS: u64 = 30;

/// Retry policy for remote adapters
pub const REMOTE_MAX_RETRIES: u32 = 3;
pub const REMOTE_BASE_DELAY_SECS: u64 = 1;
pub const REMOTE_MAX_DELAY_SECS: u64 = 60;

/// Upper bound on concurrent per-repo enrichment tasks during refresh
pub const MAX_REFRESH_WORKERS: usize = 8;

/// Default interval between watch-mode rescans (seconds)
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 300;

/// Set once a shutdown has been requested (second ctrl-c forces exit)
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Directories never descended into during repository discovery.
/// Matched case-insensitively; entries containing `*` are glob patterns.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    // Package managers / virtualenvs
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    // Build output
    "_deps",
    "build",
    "build-*",
    "cmake-build-*",
    "target",
    "dist",
    "out",
    ".tox",
    // Vendored dependencies
    "vendor",
    "third_party",
    "external",
    "deps",
];
