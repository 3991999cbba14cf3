//! Centralized error types for repoindex
//!
//! This module provides a unified error handling approach using thiserror.
//! The query compiler carries its own error type so callers can distinguish
//! a malformed expression (user input, exit code 2) from a store failure
//! (exit code 1).

use std::path::PathBuf;
use thiserror::Error;

/// Error produced while compiling a DSL expression to SQL.
///
/// The compiler performs no I/O; every variant here is a grammar or
/// resolution problem in the input expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryCompileError {
    #[error("Unexpected token at position {position}: {found}")]
    UnexpectedToken { position: usize, found: String },

    #[error("Incomplete expression at: {0}")]
    IncompleteExpression(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown view: {0}")]
    UnknownView(String),

    #[error("Cyclic view reference: {0}")]
    CyclicView(String),

    #[error("Unterminated string literal")]
    UnterminatedString,
}

/// Main error type for repoindex operations
#[derive(Error, Debug)]
pub enum RepoIndexError {
    /// Store (SQLite) errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The on-disk schema is newer than this binary supports
    #[error("Database schema version {found} is newer than supported version {supported}; refusing to open")]
    SchemaFromFuture { found: i64, supported: i64 },

    /// Query compilation errors
    #[error("Query error: {0}")]
    Query(#[from] QueryCompileError),

    /// Git subprocess errors
    #[error("Git error in {path}: {message}")]
    Git { path: PathBuf, message: String },

    /// Remote adapter errors (after retries exhausted)
    #[error("Remote error: {0}")]
    Remote(String),

    /// I/O operation errors
    #[error("I/O error: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File parsing errors (config, citation files, views)
    #[error("Parse error: {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl RepoIndexError {
    pub fn git(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Git {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors caused by user input rather than runtime failure.
    /// The CLI maps these to exit code 2.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Query(_) | Self::Validation(_) | Self::Config(_)
        )
    }
}

/// Result type alias for repoindex operations
pub type Result<T> = std::result::Result<T, RepoIndexError>;

impl From<std::io::Error> for RepoIndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RepoIndexError::git("/r/a", "exit status 128");
        assert!(err.to_string().contains("Git error"));
        assert!(err.to_string().contains("/r/a"));

        let err = RepoIndexError::SchemaFromFuture {
            found: 9,
            supported: 1,
        };
        assert!(err.to_string().contains("refusing to open"));
    }

    #[test]
    fn test_usage_error_classification() {
        assert!(RepoIndexError::from(QueryCompileError::UnknownFunction("nope".into()))
            .is_usage_error());
        assert!(RepoIndexError::validation("bad flag").is_usage_error());
        assert!(!RepoIndexError::remote("503").is_usage_error());
    }

    #[test]
    fn test_compile_error_display() {
        let err = QueryCompileError::UnknownView("python-active".into());
        assert_eq!(err.to_string(), "Unknown view: python-active");
    }
}
