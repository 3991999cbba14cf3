//! SQLite schema and migrations.
//!
//! The schema is fixed and versioned. A fresh database gets the current
//! schema; an older database is migrated forward one version at a time,
//! each migration in its own transaction. A database written by a newer
//! binary is refused; the store never guesses at unknown columns and
//! never silently re-creates the file.

use rusqlite::Connection;
use tracing::info;

use crate::error::{RepoIndexError, Result};

/// Current schema version; increment when the schema changes.
pub const CURRENT_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
-- Schema version tracking
CREATE TABLE IF NOT EXISTS _schema_info (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    description TEXT
);

-- Core repositories table. `path` is the sole identity of a repository.
CREATE TABLE IF NOT EXISTS repos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT UNIQUE NOT NULL,

    -- Local git state
    branch TEXT,
    remote_url TEXT,
    is_clean BOOLEAN DEFAULT 1,
    ahead INTEGER DEFAULT 0,
    behind INTEGER DEFAULT 0,
    has_upstream BOOLEAN DEFAULT 0,
    uncommitted_changes BOOLEAN DEFAULT 0,
    untracked_files INTEGER DEFAULT 0,

    -- Derived from remote_url
    owner TEXT,

    -- Local metadata
    language TEXT,
    languages TEXT,          -- JSON array of all languages
    description TEXT,
    readme_content TEXT,     -- for full-text search

    -- License info (local heuristic)
    license_key TEXT,
    license_name TEXT,
    license_file TEXT,

    -- Local flags
    has_readme BOOLEAN DEFAULT 0,
    has_license BOOLEAN DEFAULT 0,
    has_ci BOOLEAN DEFAULT 0,

    -- Citation detection and parsed metadata
    has_citation BOOLEAN DEFAULT 0,
    citation_file TEXT,
    citation_doi TEXT,
    citation_title TEXT,
    citation_authors TEXT,   -- JSON array
    citation_version TEXT,
    citation_repository TEXT,
    citation_license TEXT,

    -- Hosted-provider metadata; github_ prefix keeps provenance explicit
    github_owner TEXT,
    github_name TEXT,
    github_description TEXT,
    github_stars INTEGER DEFAULT 0,
    github_forks INTEGER DEFAULT 0,
    github_watchers INTEGER DEFAULT 0,
    github_open_issues INTEGER DEFAULT 0,
    github_is_fork BOOLEAN DEFAULT 0,
    github_is_private BOOLEAN DEFAULT 0,
    github_is_archived BOOLEAN DEFAULT 0,
    github_has_issues BOOLEAN DEFAULT 1,
    github_has_wiki BOOLEAN DEFAULT 1,
    github_has_pages BOOLEAN DEFAULT 0,
    github_pages_url TEXT,
    github_topics TEXT,      -- JSON array
    github_created_at TIMESTAMP,
    github_updated_at TIMESTAMP,
    github_pushed_at TIMESTAMP,

    scanned_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,

    -- mtime of .git/index at last successful refresh (staleness contract)
    git_index_mtime REAL
);

-- Tags explain why a repo is in a set. One row per (repo, tag); the
-- source column partitions ownership between user config, implicit
-- derivation, and the hosted provider.
CREATE TABLE IF NOT EXISTS tags (
    repo_id INTEGER NOT NULL,
    tag TEXT NOT NULL,
    source TEXT DEFAULT 'user',    -- 'user', 'implicit', 'github'
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (repo_id, tag),
    FOREIGN KEY (repo_id) REFERENCES repos(id) ON DELETE CASCADE
);

-- Events. event_id is content-derived; INSERT OR IGNORE on it is the
-- deduplication contract.
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    event_id TEXT UNIQUE,
    type TEXT NOT NULL,
    timestamp TIMESTAMP NOT NULL,
    ref TEXT,
    message TEXT,
    author TEXT,
    metadata TEXT,                 -- JSON, type-specific
    scanned_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (repo_id) REFERENCES repos(id) ON DELETE CASCADE
);

-- Package-registry state, one row per (repo, registry)
CREATE TABLE IF NOT EXISTS publications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    registry TEXT NOT NULL,        -- 'pypi', 'cran', 'npm', 'cargo'
    package_name TEXT NOT NULL,
    current_version TEXT,
    published BOOLEAN DEFAULT 0,
    url TEXT,
    doi TEXT,
    downloads_total INTEGER,
    downloads_30d INTEGER,
    last_published TIMESTAMP,
    scanned_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (repo_id, registry),
    FOREIGN KEY (repo_id) REFERENCES repos(id) ON DELETE CASCADE
);

-- Dependencies extracted from package manifests
CREATE TABLE IF NOT EXISTS dependencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    package_name TEXT NOT NULL,
    package_registry TEXT,
    version_spec TEXT,
    dep_type TEXT DEFAULT 'runtime',   -- 'runtime', 'dev', 'optional'
    UNIQUE (repo_id, package_name, package_registry),
    FOREIGN KEY (repo_id) REFERENCES repos(id) ON DELETE CASCADE
);

-- Daily star/fork snapshots for trending analysis
CREATE TABLE IF NOT EXISTS repo_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    captured_at DATE NOT NULL,
    stars INTEGER,
    forks INTEGER,
    open_issues INTEGER,
    UNIQUE (repo_id, captured_at),
    FOREIGN KEY (repo_id) REFERENCES repos(id) ON DELETE CASCADE
);

-- Latest scan failure per path; prior rows are purged on insert
CREATE TABLE IF NOT EXISTS scan_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    message TEXT,
    occurred_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Indexes for the common query paths
CREATE INDEX IF NOT EXISTS idx_repos_name ON repos(name);
CREATE INDEX IF NOT EXISTS idx_repos_language ON repos(language);
CREATE INDEX IF NOT EXISTS idx_repos_owner ON repos(owner);
CREATE INDEX IF NOT EXISTS idx_repos_stars ON repos(github_stars);
CREATE INDEX IF NOT EXISTS idx_repos_updated ON repos(github_updated_at);
CREATE INDEX IF NOT EXISTS idx_repos_scanned ON repos(scanned_at);

CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);
CREATE INDEX IF NOT EXISTS idx_tags_source ON tags(source);

CREATE INDEX IF NOT EXISTS idx_events_repo ON events(repo_id);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_repo_type_ts ON events(repo_id, type, timestamp);

CREATE INDEX IF NOT EXISTS idx_publications_registry ON publications(registry);
CREATE INDEX IF NOT EXISTS idx_publications_package ON publications(package_name);

CREATE INDEX IF NOT EXISTS idx_dependencies_package ON dependencies(package_name);
CREATE INDEX IF NOT EXISTS idx_dependencies_repo ON dependencies(repo_id);

CREATE INDEX IF NOT EXISTS idx_snapshots_repo ON repo_snapshots(repo_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_date ON repo_snapshots(captured_at);

CREATE INDEX IF NOT EXISTS idx_scan_errors_path ON scan_errors(path);

-- Full-text search over (name, description, readme_content)
CREATE VIRTUAL TABLE IF NOT EXISTS repos_fts USING fts5(
    name,
    description,
    readme_content,
    content='repos',
    content_rowid='id'
);

-- Triggers keep the FTS table in sync with the base table
CREATE TRIGGER IF NOT EXISTS repos_fts_insert AFTER INSERT ON repos BEGIN
    INSERT INTO repos_fts(rowid, name, description, readme_content)
    VALUES (NEW.id, NEW.name, NEW.description, NEW.readme_content);
END;

CREATE TRIGGER IF NOT EXISTS repos_fts_delete AFTER DELETE ON repos BEGIN
    INSERT INTO repos_fts(repos_fts, rowid, name, description, readme_content)
    VALUES ('delete', OLD.id, OLD.name, OLD.description, OLD.readme_content);
END;

CREATE TRIGGER IF NOT EXISTS repos_fts_update AFTER UPDATE ON repos BEGIN
    INSERT INTO repos_fts(repos_fts, rowid, name, description, readme_content)
    VALUES ('delete', OLD.id, OLD.name, OLD.description, OLD.readme_content);
    INSERT INTO repos_fts(rowid, name, description, readme_content)
    VALUES (NEW.id, NEW.name, NEW.description, NEW.readme_content);
END;

-- Active repos: a commit event in the last 30 days
CREATE VIEW IF NOT EXISTS v_active_repos AS
SELECT DISTINCT r.*
FROM repos r
WHERE EXISTS (
    SELECT 1 FROM events e
    WHERE e.repo_id = r.id
    AND e.type = 'commit'
    AND e.timestamp > datetime('now', '-30 days')
);

-- Stale repos: no commit in 180 days
CREATE VIEW IF NOT EXISTS v_stale_repos AS
SELECT r.*
FROM repos r
WHERE NOT EXISTS (
    SELECT 1 FROM events e
    WHERE e.repo_id = r.id
    AND e.type = 'commit'
    AND e.timestamp > datetime('now', '-180 days')
);

-- Aggregated per-repo event counts with a derived activity status
CREATE VIEW IF NOT EXISTS v_repo_stats AS
SELECT
    r.id as repo_id,
    r.name,
    r.language,
    r.github_stars,
    r.github_forks,
    COALESCE(commits_30d.cnt, 0) as commits_30d,
    COALESCE(commits_90d.cnt, 0) as commits_90d,
    COALESCE(tags_90d.cnt, 0) as tags_90d,
    MAX(CASE WHEN e.type = 'commit' THEN e.timestamp END) as last_commit,
    MAX(CASE WHEN e.type = 'git_tag' THEN e.timestamp END) as last_tag,
    CASE
        WHEN MAX(CASE WHEN e.type = 'commit' THEN e.timestamp END) > datetime('now', '-30 days') THEN 'active'
        WHEN MAX(CASE WHEN e.type = 'commit' THEN e.timestamp END) > datetime('now', '-180 days') THEN 'maintained'
        ELSE 'stale'
    END as activity_status
FROM repos r
LEFT JOIN events e ON e.repo_id = r.id
LEFT JOIN (
    SELECT repo_id, COUNT(*) as cnt
    FROM events
    WHERE type = 'commit' AND timestamp > datetime('now', '-30 days')
    GROUP BY repo_id
) commits_30d ON commits_30d.repo_id = r.id
LEFT JOIN (
    SELECT repo_id, COUNT(*) as cnt
    FROM events
    WHERE type = 'commit' AND timestamp > datetime('now', '-90 days')
    GROUP BY repo_id
) commits_90d ON commits_90d.repo_id = r.id
LEFT JOIN (
    SELECT repo_id, COUNT(*) as cnt
    FROM events
    WHERE type = 'git_tag' AND timestamp > datetime('now', '-90 days')
    GROUP BY repo_id
) tags_90d ON tags_90d.repo_id = r.id
GROUP BY r.id;
";

/// Ordered migrations: (target version, description, SQL).
fn migrations() -> Vec<(i64, &'static str, &'static str)> {
    vec![(
        1,
        "Initial schema with repos, events, tags, publications, dependencies",
        SCHEMA_V1,
    )]
}

/// Read the applied schema version (0 when the database is fresh).
pub fn schema_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM _schema_info", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

/// Apply pending migrations, one transaction each. Refuses to touch a
/// database whose version exceeds what this binary supports.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn);

    if current > CURRENT_VERSION {
        return Err(RepoIndexError::SchemaFromFuture {
            found: current,
            supported: CURRENT_VERSION,
        });
    }

    for (version, description, sql) in migrations() {
        if version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT OR REPLACE INTO _schema_info (version, description) VALUES (?1, ?2)",
            rusqlite::params![version, description],
        )?;
        tx.commit()?;
        info!(version, "applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_gets_current_version() {
        let conn = fresh_conn();
        assert_eq!(schema_version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let mut conn = fresh_conn();
        ensure_schema(&mut conn).unwrap();
        assert_eq!(schema_version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn test_future_schema_is_refused() {
        let mut conn = fresh_conn();
        conn.execute(
            "INSERT INTO _schema_info (version, description) VALUES (?1, 'from the future')",
            [CURRENT_VERSION + 5],
        )
        .unwrap();
        let err = ensure_schema(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RepoIndexError::SchemaFromFuture { .. }
        ));
    }

    #[test]
    fn test_expected_tables_exist() {
        let conn = fresh_conn();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        for expected in [
            "_schema_info",
            "repos",
            "tags",
            "events",
            "publications",
            "dependencies",
            "repo_snapshots",
            "scan_errors",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_views_exist() {
        let conn = fresh_conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='view' AND name IN
                 ('v_active_repos', 'v_stale_repos', 'v_repo_stats')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_event_cascade_on_repo_delete() {
        let conn = fresh_conn();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn.execute(
            "INSERT INTO repos (name, path) VALUES ('a', '/r/a')",
            [],
        )
        .unwrap();
        let repo_id: i64 = conn
            .query_row("SELECT id FROM repos WHERE path = '/r/a'", [], |r| r.get(0))
            .unwrap();
        conn.execute(
            "INSERT INTO events (repo_id, event_id, type, timestamp) VALUES (?1, 'commit_a_deadbeef', 'commit', '2024-01-01T00:00:00Z')",
            [repo_id],
        )
        .unwrap();

        conn.execute("DELETE FROM repos WHERE id = ?1", [repo_id]).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
