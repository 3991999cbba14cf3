pub mod citation;
pub mod cli;
pub mod config;
pub mod constants;
pub mod detect;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod events;
pub mod export;
pub mod git;
pub mod output;
pub mod query;
pub mod refresh;
pub mod remote;
pub mod service;
pub mod store;
pub mod views;

// Re-export commonly used types
pub use domain::{Event, Repository};
pub use error::{QueryCompileError, RepoIndexError, Result};
pub use query::{compile_query, CompiledQuery, QueryCompiler};
pub use refresh::{run_refresh, RefreshOptions, RefreshStats};
pub use store::{DatabaseInfo, Store};
