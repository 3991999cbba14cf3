//! The persistence core: a single-file SQLite store.
//!
//! Opens (or creates) the index database, enforces the versioned schema,
//! and exposes the write operations used by the refresh pipeline plus the
//! read operations used by the query paths. WAL journaling permits
//! concurrent readers while one writer holds the lock.
//!
//! The store never silently re-creates the database; corruption and
//! schema-from-the-future are fatal.

pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{DependencyInfo, Event, PublicationInfo, Repository, TagSource};
use crate::error::{RepoIndexError, Result};
use crate::query::{CompiledQuery, QueryValue};

/// A materialized row: column name → JSON value.
pub type JsonMap = serde_json::Map<String, Value>;

/// Filters for reading events back out of the store.
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    /// Substring match against repo name or path
    pub repo: Option<String>,
    /// Event kinds to include (empty = all)
    pub kinds: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Aggregate event counts over a window.
#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub period_days: i64,
    pub total_events: i64,
    pub repos_with_events: i64,
    pub by_type: Vec<(String, i64)>,
}

/// Store diagnostics for `db --info`.
#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub exists: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repos: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publications: Option<i64>,
}

/// The repoindex store.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    /// Open or create the store at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RepoIndexError::io(parent, e))?;
            }
        }

        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        schema::ensure_schema(&mut conn)?;
        debug!(path = %path.display(), "opened store");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open read-only; used by the query and sql paths. Refuses a missing
    /// file rather than creating one.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RepoIndexError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "database not found (run 'repoindex refresh' first)",
                ),
            ));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let found = schema::schema_version(&conn);
        if found > schema::CURRENT_VERSION {
            return Err(RepoIndexError::SchemaFromFuture {
                found,
                supported: schema::CURRENT_VERSION,
            });
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn)?;
        schema::ensure_schema(&mut conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Delete the store file (plus WAL sidecars) and re-create it fresh.
    pub fn reset(path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let file = PathBuf::from(file);
            if file.exists() {
                std::fs::remove_file(&file).map_err(|e| RepoIndexError::io(&file, e))?;
            }
        }
        Self::open(path).map(|_| ())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Access the underlying connection (raw `sql` passthrough).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ---- writes -----------------------------------------------------------

    /// Execute one parameterized statement, returning affected rows.
    pub fn execute(&mut self, sql: &str, params: &[QueryValue]) -> Result<usize> {
        Ok(self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter()))?)
    }

    /// Execute one statement for each parameter set, in a single
    /// transaction.
    pub fn execute_many(&mut self, sql: &str, param_sets: &[Vec<QueryValue>]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut affected = 0;
        {
            let mut stmt = tx.prepare(sql)?;
            for params in param_sets {
                affected += stmt.execute(rusqlite::params_from_iter(params.iter()))?;
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    /// Insert or update a repository keyed on its path. Hosted-provider
    /// columns are only overwritten when the record carries fresh values,
    /// so a local-only refresh preserves previously fetched metadata.
    pub fn upsert_repo(&mut self, repo: &Repository) -> Result<i64> {
        let status = repo.status.clone().unwrap_or_default();
        let github = repo.github.clone();
        let citation = repo.citation.clone();
        let languages_json = if repo.languages.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&repo.languages).unwrap_or_default())
        };
        let topics_json = github.as_ref().and_then(|g| {
            if g.topics.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&g.topics).unwrap_or_default())
            }
        });
        let authors_json = citation.as_ref().and_then(|c| {
            if c.authors.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&c.authors).unwrap_or_default())
            }
        });
        let scanned_at = now_iso();

        self.conn.execute(
            "INSERT INTO repos (
                name, path, branch, remote_url, is_clean, ahead, behind,
                has_upstream, uncommitted_changes, untracked_files, owner,
                language, languages, description,
                license_key, license_name, license_file, has_license,
                has_readme, has_ci,
                has_citation, citation_file, citation_doi, citation_title,
                citation_authors, citation_version, citation_repository, citation_license,
                github_owner, github_name, github_description,
                github_stars, github_forks, github_watchers, github_open_issues,
                github_is_fork, github_is_private, github_is_archived,
                github_has_issues, github_has_wiki, github_has_pages,
                github_pages_url, github_topics,
                github_created_at, github_updated_at, github_pushed_at,
                scanned_at, git_index_mtime, readme_content
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38,
                ?39, ?40, ?41, ?42, ?43, ?44, ?45, ?46, ?47, ?48, ?49
            )
            ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                branch = excluded.branch,
                remote_url = excluded.remote_url,
                is_clean = excluded.is_clean,
                ahead = excluded.ahead,
                behind = excluded.behind,
                has_upstream = excluded.has_upstream,
                uncommitted_changes = excluded.uncommitted_changes,
                untracked_files = excluded.untracked_files,
                owner = excluded.owner,
                language = excluded.language,
                languages = excluded.languages,
                description = COALESCE(excluded.description, repos.description),
                license_key = excluded.license_key,
                license_name = excluded.license_name,
                license_file = excluded.license_file,
                has_license = excluded.has_license,
                has_readme = excluded.has_readme,
                has_ci = excluded.has_ci,
                has_citation = excluded.has_citation,
                citation_file = excluded.citation_file,
                citation_doi = excluded.citation_doi,
                citation_title = excluded.citation_title,
                citation_authors = excluded.citation_authors,
                citation_version = excluded.citation_version,
                citation_repository = excluded.citation_repository,
                citation_license = excluded.citation_license,
                github_owner = COALESCE(excluded.github_owner, repos.github_owner),
                github_name = COALESCE(excluded.github_name, repos.github_name),
                github_description = COALESCE(excluded.github_description, repos.github_description),
                github_stars = COALESCE(excluded.github_stars, repos.github_stars),
                github_forks = COALESCE(excluded.github_forks, repos.github_forks),
                github_watchers = COALESCE(excluded.github_watchers, repos.github_watchers),
                github_open_issues = COALESCE(excluded.github_open_issues, repos.github_open_issues),
                github_is_fork = COALESCE(excluded.github_is_fork, repos.github_is_fork),
                github_is_private = COALESCE(excluded.github_is_private, repos.github_is_private),
                github_is_archived = COALESCE(excluded.github_is_archived, repos.github_is_archived),
                github_has_issues = COALESCE(excluded.github_has_issues, repos.github_has_issues),
                github_has_wiki = COALESCE(excluded.github_has_wiki, repos.github_has_wiki),
                github_has_pages = COALESCE(excluded.github_has_pages, repos.github_has_pages),
                github_pages_url = COALESCE(excluded.github_pages_url, repos.github_pages_url),
                github_topics = COALESCE(excluded.github_topics, repos.github_topics),
                github_created_at = COALESCE(excluded.github_created_at, repos.github_created_at),
                github_updated_at = COALESCE(excluded.github_updated_at, repos.github_updated_at),
                github_pushed_at = COALESCE(excluded.github_pushed_at, repos.github_pushed_at),
                scanned_at = excluded.scanned_at,
                git_index_mtime = excluded.git_index_mtime,
                readme_content = excluded.readme_content",
            rusqlite::params![
                repo.name,
                repo.path,
                status.branch,
                repo.remote_url,
                status.clean,
                status.ahead,
                status.behind,
                status.has_upstream,
                status.uncommitted_changes,
                status.untracked_files,
                repo.owner,
                repo.language,
                languages_json,
                github.as_ref().and_then(|g| g.description.clone()),
                repo.license.as_ref().map(|l| l.key.clone()),
                repo.license.as_ref().and_then(|l| l.name.clone()),
                repo.license.as_ref().and_then(|l| l.file.clone()),
                repo.license.is_some(),
                repo.has_readme,
                repo.has_ci,
                repo.has_citation,
                repo.citation_file,
                citation.as_ref().and_then(|c| c.doi.clone()),
                citation.as_ref().and_then(|c| c.title.clone()),
                authors_json,
                citation.as_ref().and_then(|c| c.version.clone()),
                citation.as_ref().and_then(|c| c.repository.clone()),
                citation.as_ref().and_then(|c| c.license.clone()),
                github.as_ref().map(|g| g.owner.clone()),
                github.as_ref().map(|g| g.name.clone()),
                github.as_ref().and_then(|g| g.description.clone()),
                github.as_ref().map(|g| g.stars),
                github.as_ref().map(|g| g.forks),
                github.as_ref().map(|g| g.watchers),
                github.as_ref().map(|g| g.open_issues),
                github.as_ref().map(|g| g.is_fork),
                github.as_ref().map(|g| g.is_private),
                github.as_ref().map(|g| g.is_archived),
                github.as_ref().map(|g| g.has_issues),
                github.as_ref().map(|g| g.has_wiki),
                github.as_ref().map(|g| g.has_pages),
                github.as_ref().and_then(|g| g.pages_url.clone()),
                topics_json,
                github.as_ref().and_then(|g| g.created_at.clone()),
                github.as_ref().and_then(|g| g.updated_at.clone()),
                github.as_ref().and_then(|g| g.pushed_at.clone()),
                scanned_at,
                repo.git_index_mtime,
                repo.readme_content,
            ],
        )?;

        let repo_id = self.conn.query_row(
            "SELECT id FROM repos WHERE path = ?1",
            [&repo.path],
            |row| row.get(0),
        )?;
        Ok(repo_id)
    }

    /// Replace the tag rows of one source with `tags`, leaving other
    /// sources untouched.
    pub fn sync_tags(&mut self, repo_id: i64, tags: &[String], source: TagSource) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut current = Vec::new();
            let mut stmt =
                tx.prepare("SELECT tag FROM tags WHERE repo_id = ?1 AND source = ?2")?;
            let rows = stmt.query_map(rusqlite::params![repo_id, source.as_str()], |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                current.push(row?);
            }

            for tag in tags {
                if !current.contains(tag) {
                    tx.execute(
                        "INSERT OR IGNORE INTO tags (repo_id, tag, source) VALUES (?1, ?2, ?3)",
                        rusqlite::params![repo_id, tag, source.as_str()],
                    )?;
                }
            }
            for tag in &current {
                if !tags.contains(tag) {
                    tx.execute(
                        "DELETE FROM tags WHERE repo_id = ?1 AND tag = ?2 AND source = ?3",
                        rusqlite::params![repo_id, tag, source.as_str()],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert one event; true when a row was actually inserted.
    pub fn insert_event(&mut self, repo_id: i64, event: &Event) -> Result<bool> {
        Ok(self.insert_events(repo_id, std::slice::from_ref(event))? > 0)
    }

    /// Insert events with `INSERT OR IGNORE` keyed on the stable event ID.
    /// Returns how many rows were actually inserted.
    pub fn insert_events(&mut self, repo_id: i64, events: &[Event]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO events
                 (repo_id, event_id, type, timestamp, ref, message, author, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for event in events {
                let changed = stmt.execute(rusqlite::params![
                    repo_id,
                    event.id(),
                    event.kind,
                    event
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                    event.reference(),
                    event.message(),
                    event.author(),
                    serde_json::to_string(&event.data).unwrap_or_default(),
                ])?;
                inserted += changed;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn upsert_publication(
        &mut self,
        repo_id: i64,
        publication: &PublicationInfo,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO publications
             (repo_id, registry, package_name, current_version, published, url, doi,
              downloads_total, downloads_30d, last_published, scanned_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(repo_id, registry) DO UPDATE SET
                package_name = excluded.package_name,
                current_version = excluded.current_version,
                published = excluded.published,
                url = excluded.url,
                doi = COALESCE(excluded.doi, publications.doi),
                downloads_total = excluded.downloads_total,
                downloads_30d = excluded.downloads_30d,
                last_published = excluded.last_published,
                scanned_at = excluded.scanned_at",
            rusqlite::params![
                repo_id,
                publication.registry,
                publication.package_name,
                publication.current_version,
                publication.published,
                publication.url,
                publication.doi,
                publication.downloads_total,
                publication.downloads_30d,
                publication.last_published,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    /// Replace all dependency rows for a repo.
    pub fn replace_dependencies(
        &mut self,
        repo_id: i64,
        dependencies: &[DependencyInfo],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM dependencies WHERE repo_id = ?1", [repo_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO dependencies
                 (repo_id, package_name, package_registry, version_spec, dep_type)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for dep in dependencies {
                stmt.execute(rusqlite::params![
                    repo_id,
                    dep.package_name,
                    dep.registry,
                    dep.version_spec,
                    dep.dep_type,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record today's star/fork counts for trending analysis.
    pub fn record_snapshot(
        &mut self,
        repo_id: i64,
        stars: i64,
        forks: i64,
        open_issues: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO repo_snapshots
             (repo_id, captured_at, stars, forks, open_issues)
             VALUES (?1, date('now'), ?2, ?3, ?4)",
            rusqlite::params![repo_id, stars, forks, open_issues],
        )?;
        Ok(())
    }

    /// Record a scan failure, replacing any prior row for the same path.
    pub fn record_scan_error(&mut self, path: &str, message: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM scan_errors WHERE path = ?1", [path])?;
        tx.execute(
            "INSERT INTO scan_errors (path, message) VALUES (?1, ?2)",
            rusqlite::params![path, message],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_repo_by_path(&mut self, path: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM repos WHERE path = ?1", [path])?;
        Ok(changed > 0)
    }

    /// Remove rows whose path no longer exists on disk. Events, tags, and
    /// publications cascade.
    pub fn cleanup_missing_repos(&mut self) -> Result<usize> {
        let mut gone = Vec::new();
        {
            let mut stmt = self.conn.prepare("SELECT id, path FROM repos")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, path) = row?;
                if !Path::new(&path).exists() {
                    gone.push((id, path));
                }
            }
        }

        for (id, path) in &gone {
            self.conn.execute("DELETE FROM repos WHERE id = ?1", [id])?;
            debug!(%path, "removed repository no longer on disk");
        }
        Ok(gone.len())
    }

    // ---- reads ------------------------------------------------------------

    /// Staleness check: a repo needs refresh unless its stored
    /// `git_index_mtime` equals the currently observed one.
    pub fn needs_refresh(&self, path: &str, current_mtime: Option<f64>) -> Result<bool> {
        let stored: Option<Option<f64>> = self
            .conn
            .query_row(
                "SELECT git_index_mtime FROM repos WHERE path = ?1",
                [path],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(match (stored, current_mtime) {
            // known repo, both mtimes present: stale only when they differ
            (Some(Some(stored)), Some(current)) => stored != current,
            // known repo that still has no .git/index: nothing changed
            (Some(None), None) => false,
            // unknown repo, or the index appeared/disappeared
            _ => true,
        })
    }

    pub fn repo_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM repos", [], |row| row.get(0))?)
    }

    pub fn repo_id_for_path(&self, path: &str) -> Result<Option<i64>> {
        match self
            .conn
            .query_row("SELECT id FROM repos WHERE path = ?1", [path], |row| {
                row.get(0)
            }) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_repo_by_path(&self, path: &str) -> Result<Option<JsonMap>> {
        let rows = self.fetch_with_params(
            "SELECT * FROM repos WHERE path = ?1",
            &[QueryValue::Text(path.to_string())],
        )?;
        Ok(rows.into_iter().next())
    }

    pub fn get_all_repos(&self) -> Result<Vec<JsonMap>> {
        self.fetch("SELECT * FROM repos ORDER BY name")
    }

    /// All repositories with their tags folded in as a JSON array.
    pub fn get_repos_with_tags(&self) -> Result<Vec<JsonMap>> {
        let mut rows = self.fetch(
            "SELECT r.*, GROUP_CONCAT(t.tag) as tags_csv
             FROM repos r
             LEFT JOIN tags t ON t.repo_id = r.id
             GROUP BY r.id
             ORDER BY r.name",
        )?;
        for row in &mut rows {
            let tags = match row.remove("tags_csv") {
                Some(Value::String(csv)) if !csv.is_empty() => csv
                    .split(',')
                    .map(|t| Value::String(t.to_string()))
                    .collect(),
                _ => Vec::new(),
            };
            row.insert("tags".to_string(), Value::Array(tags));
        }
        Ok(rows)
    }

    /// Full-text search over (name, description, readme_content).
    pub fn search_repos(&self, fts_match: &str) -> Result<Vec<JsonMap>> {
        self.fetch_with_params(
            "SELECT r.*
             FROM repos r
             JOIN repos_fts fts ON fts.rowid = r.id
             WHERE repos_fts MATCH ?1
             ORDER BY rank",
            &[QueryValue::Text(fts_match.to_string())],
        )
    }

    /// Execute a compiled DSL query.
    pub fn query(&self, compiled: &CompiledQuery) -> Result<Vec<JsonMap>> {
        self.fetch_with_params(&compiled.sql, &compiled.params)
    }

    /// Execute raw parameterless SQL (the `sql` passthrough path).
    pub fn fetch(&self, sql: &str) -> Result<Vec<JsonMap>> {
        self.fetch_with_params(sql, &[])
    }

    pub fn fetch_with_params(&self, sql: &str, params: &[QueryValue]) -> Result<Vec<JsonMap>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = JsonMap::new();
            for (i, column) in columns.iter().enumerate() {
                map.insert(column.clone(), value_ref_to_json(row.get_ref(i)?));
            }
            result.push(map);
        }
        Ok(result)
    }

    /// Read events joined with their repository, newest first. The stored
    /// metadata JSON becomes the event's `data` payload.
    pub fn get_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryValue> = Vec::new();

        if let Some(since) = filter.since {
            conditions.push("e.timestamp >= ?".to_string());
            params.push(QueryValue::Text(
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(until) = filter.until {
            conditions.push("e.timestamp <= ?".to_string());
            params.push(QueryValue::Text(
                until.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if !filter.kinds.is_empty() {
            let placeholders = vec!["?"; filter.kinds.len()].join(",");
            conditions.push(format!("e.type IN ({placeholders})"));
            params.extend(
                filter
                    .kinds
                    .iter()
                    .map(|k| QueryValue::Text(k.clone())),
            );
        }
        if let Some(repo) = &filter.repo {
            conditions.push("(r.name LIKE ? OR r.path LIKE ?)".to_string());
            let pattern = format!("%{repo}%");
            params.push(QueryValue::Text(pattern.clone()));
            params.push(QueryValue::Text(pattern));
        }

        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        let limit_clause = filter
            .limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT e.type, e.timestamp, e.metadata, r.name as repo_name, r.path as repo_path
             FROM events e
             JOIN repos r ON r.id = e.repo_id
             WHERE {where_clause}
             ORDER BY e.timestamp DESC{limit_clause}"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(0)?;
            let timestamp: String = row.get(1)?;
            let metadata: Option<String> = row.get(2)?;
            let repo_name: String = row.get(3)?;
            let repo_path: String = row.get(4)?;

            let data = metadata
                .as_deref()
                .and_then(|m| serde_json::from_str(m).ok())
                .unwrap_or_else(|| Value::Object(JsonMap::new()));
            let timestamp = parse_stored_timestamp(&timestamp);

            events.push(Event::new(kind, timestamp, repo_name, repo_path, data));
        }
        Ok(events)
    }

    /// Count events matching a repo/kind/window filter.
    pub fn count_events(&self, filter: &EventFilter) -> Result<i64> {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryValue> = Vec::new();

        if let Some(since) = filter.since {
            conditions.push("timestamp >= ?".to_string());
            params.push(QueryValue::Text(
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(until) = filter.until {
            conditions.push("timestamp <= ?".to_string());
            params.push(QueryValue::Text(
                until.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if !filter.kinds.is_empty() {
            let placeholders = vec!["?"; filter.kinds.len()].join(",");
            conditions.push(format!("type IN ({placeholders})"));
            params.extend(filter.kinds.iter().map(|k| QueryValue::Text(k.clone())));
        }
        if let Some(repo) = &filter.repo {
            conditions.push(
                "repo_id IN (SELECT id FROM repos WHERE name LIKE ? OR path LIKE ?)".to_string(),
            );
            let pattern = format!("%{repo}%");
            params.push(QueryValue::Text(pattern.clone()));
            params.push(QueryValue::Text(pattern));
        }

        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        Ok(self.conn.query_row(
            &format!("SELECT COUNT(*) FROM events WHERE {where_clause}"),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?)
    }

    pub fn event_summary(&self, days: i64) -> Result<EventSummary> {
        let since = (Utc::now() - chrono::Duration::days(days))
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut by_type = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT type, COUNT(*) as count FROM events
                 WHERE timestamp >= ?1 GROUP BY type ORDER BY count DESC",
            )?;
            let rows = stmt.query_map([&since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                by_type.push(row?);
            }
        }

        let (total_events, repos_with_events) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT repo_id) FROM events WHERE timestamp >= ?1",
            [&since],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        Ok(EventSummary {
            period_days: days,
            total_events,
            repos_with_events,
            by_type,
        })
    }

    pub fn get_scan_errors(&self) -> Result<Vec<JsonMap>> {
        self.fetch("SELECT path, message, occurred_at FROM scan_errors ORDER BY occurred_at DESC")
    }

    /// Diagnostics for `db --info`. Does not create a missing database.
    pub fn database_info(path: &Path) -> Result<DatabaseInfo> {
        if !path.exists() {
            return Ok(DatabaseInfo {
                exists: false,
                path: path.display().to_string(),
                size_bytes: None,
                size_human: None,
                schema_version: None,
                repos: None,
                events: None,
                tags: None,
                publications: None,
            });
        }

        let store = Self::open_read_only(path)?;
        let count = |table: &str| -> Result<i64> {
            Ok(store
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };

        let size_bytes = std::fs::metadata(path).map(|m| m.len()).ok();
        Ok(DatabaseInfo {
            exists: true,
            path: path.display().to_string(),
            size_human: size_bytes.map(human_size),
            size_bytes,
            schema_version: Some(schema::schema_version(&store.conn)),
            repos: Some(count("repos")?),
            events: Some(count("events")?),
            tags: Some(count("tags")?),
            publications: Some(count("publications")?),
        })
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "wal")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -64000)?;
    Ok(())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_stored_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!(raw, "unparseable event timestamp in store");
            Utc::now()
        })
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn human_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
