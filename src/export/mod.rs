//! ECHO export: a self-describing snapshot of the index.
//!
//! The output directory holds a byte-faithful copy of the store
//! (`index.db`), a JSONL projection of repositories (and optionally
//! events), a human-readable README, and a manifest describing all of it.
//! The export remains useful without repoindex installed: SQLite and
//! JSONL outlive any one tool.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{RepoIndexError, Result};
use crate::query::QueryCompiler;
use crate::store::{EventFilter, JsonMap, Store};
use crate::views::ViewService;

const ECHO_VERSION: &str = "1.0";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    /// Optional DSL expression restricting which repos are exported
    pub query: Option<String>,
    pub include_events: bool,
    /// Views available for `@name` in the query
    pub views_path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
pub struct ExportResult {
    pub repos_exported: usize,
    pub events_exported: usize,
    pub output_dir: String,
}

/// Columns stored as JSON text that get re-parsed into real JSON values
/// in the export.
const JSON_COLUMNS: &[&str] = &["languages", "github_topics", "citation_authors"];

/// Run an export against an open store.
pub fn run_export(store: &Store, options: &ExportOptions) -> Result<ExportResult> {
    std::fs::create_dir_all(&options.output_dir)
        .map_err(|e| RepoIndexError::io(&options.output_dir, e))?;

    let mut result = ExportResult {
        output_dir: options.output_dir.display().to_string(),
        ..ExportResult::default()
    };

    copy_database(store, &options.output_dir.join("index.db"))?;

    let rows = select_rows(store, options)?;
    result.repos_exported = write_repos_jsonl(&rows, &options.output_dir.join("repos.jsonl"))?;

    if options.include_events {
        result.events_exported =
            write_events_jsonl(store, &options.output_dir.join("events.jsonl"))?;
    }

    let languages = language_stats(&rows);
    write_readme(&options.output_dir.join("README.md"), &result, options)?;
    write_manifest(
        &options.output_dir.join("manifest.json"),
        &result,
        options,
        languages,
    )?;

    info!(
        repos = result.repos_exported,
        events = result.events_exported,
        dir = %options.output_dir.display(),
        "export complete"
    );
    Ok(result)
}

/// Byte-copy the store through the SQLite backup API, so a live WAL store
/// exports consistently.
fn copy_database(store: &Store, dest: &Path) -> Result<()> {
    let mut target = rusqlite::Connection::open(dest)?;
    let backup = rusqlite::backup::Backup::new(store.conn(), &mut target)?;
    backup.run_to_completion(64, std::time::Duration::from_millis(5), None)?;
    Ok(())
}

fn select_rows(store: &Store, options: &ExportOptions) -> Result<Vec<JsonMap>> {
    match options.query.as_deref().filter(|q| !q.trim().is_empty()) {
        Some(expr) => {
            let views = match options.views_path.as_deref() {
                Some(path) => ViewService::load(path)?,
                None => ViewService::default(),
            };
            let compiled = QueryCompiler::with_views(views.predicates()).compile(expr)?;
            store.query(&compiled)
        }
        None => store.get_repos_with_tags(),
    }
}

/// Null fields dropped; JSON-valued text columns re-parsed.
fn clean_record(row: &JsonMap) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in row {
        if value.is_null() {
            continue;
        }
        if JSON_COLUMNS.contains(&key.as_str()) {
            if let Some(text) = value.as_str() {
                if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                    cleaned.insert(key.clone(), parsed);
                    continue;
                }
            }
        }
        cleaned.insert(key.clone(), value.clone());
    }
    cleaned
}

fn write_repos_jsonl(rows: &[JsonMap], dest: &Path) -> Result<usize> {
    let mut lines = String::new();
    for row in rows {
        let record = clean_record(row);
        lines.push_str(&serde_json::to_string(&record).unwrap_or_default());
        lines.push('\n');
    }
    std::fs::write(dest, lines).map_err(|e| RepoIndexError::io(dest, e))?;
    Ok(rows.len())
}

fn write_events_jsonl(store: &Store, dest: &Path) -> Result<usize> {
    let events = store.get_events(&EventFilter::default())?;
    let mut lines = String::new();
    for event in &events {
        lines.push_str(&event.to_jsonl());
        lines.push('\n');
    }
    std::fs::write(dest, lines).map_err(|e| RepoIndexError::io(dest, e))?;
    Ok(events.len())
}

fn language_stats(rows: &[JsonMap]) -> Map<String, Value> {
    let mut counts: Map<String, Value> = Map::new();
    for row in rows {
        if let Some(language) = row.get("language").and_then(Value::as_str) {
            let entry = counts.entry(language.to_string()).or_insert(json!(0));
            *entry = json!(entry.as_i64().unwrap_or(0) + 1);
        }
    }
    counts
}

fn write_readme(dest: &Path, result: &ExportResult, options: &ExportOptions) -> Result<()> {
    let exported_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let events_line = if options.include_events {
        format!("| `events.jsonl` | {} events, one JSON object per line |\n", result.events_exported)
    } else {
        String::new()
    };
    let query_note = match &options.query {
        Some(query) => format!("\nFiltered by query: `{query}`\n"),
        None => String::new(),
    };

    let content = format!(
        "# Repository Index Export\n\n\
         Exported {exported_at} by repoindex {version}.\n{query_note}\n\
         ## Contents\n\n\
         | File | Description |\n\
         |------|-------------|\n\
         | `index.db` | Complete SQLite database (schema + data) |\n\
         | `repos.jsonl` | {repos} repositories, one JSON object per line |\n\
         {events_line}\
         | `manifest.json` | Machine-readable description of this export |\n\n\
         ## Reading the data\n\n\
         ```sh\n\
         sqlite3 index.db 'SELECT name, language, github_stars FROM repos'\n\
         jq .name repos.jsonl\n\
         ```\n\n\
         The SQLite file is standard; any SQLite client can read it. The\n\
         JSONL files drop null fields and parse JSON-valued columns, so\n\
         they are directly usable without the database.\n",
        version = env!("CARGO_PKG_VERSION"),
        repos = result.repos_exported,
    );
    std::fs::write(dest, content).map_err(|e| RepoIndexError::io(dest, e))
}

fn write_manifest(
    dest: &Path,
    result: &ExportResult,
    options: &ExportOptions,
    languages: Map<String, Value>,
) -> Result<()> {
    let mut contents = Map::new();
    contents.insert(
        "index.db".to_string(),
        json!({"type": "sqlite", "description": "Complete repository index database"}),
    );
    contents.insert(
        "repos.jsonl".to_string(),
        json!({
            "type": "jsonl",
            "count": result.repos_exported,
            "description": "One JSON object per repository",
        }),
    );
    if options.include_events {
        contents.insert(
            "events.jsonl".to_string(),
            json!({
                "type": "jsonl",
                "count": result.events_exported,
                "description": "One JSON object per event",
            }),
        );
    }
    contents.insert(
        "README.md".to_string(),
        json!({"type": "markdown", "description": "Human-readable description of this export"}),
    );

    let manifest = json!({
        "echo_version": ECHO_VERSION,
        "toolkit": "repoindex",
        "toolkit_version": env!("CARGO_PKG_VERSION"),
        "exported_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "contents": contents,
        "stats": {
            "total_repos": result.repos_exported,
            "languages": languages,
        },
        "options": {
            "query": options.query,
            "include_events": options.include_events,
        },
    });

    std::fs::write(dest, serde_json::to_string_pretty(&manifest).unwrap_or_default())
        .map_err(|e| RepoIndexError::io(dest, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, Repository};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded_store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        for (name, language) in [("alpha", Some("Python")), ("beta", Some("Python")), ("gamma", None)] {
            let repo = Repository {
                path: format!("/r/{name}"),
                name: name.to_string(),
                language: language.map(str::to_string),
                languages: language.map(|l| vec![l.to_string()]).unwrap_or_default(),
                ..Repository::default()
            };
            store.upsert_repo(&repo).unwrap();
        }
        let id = store.repo_id_for_path("/r/alpha").unwrap().unwrap();
        store
            .insert_events(
                id,
                &[Event::new(
                    "commit",
                    chrono::Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
                    "alpha",
                    "/r/alpha",
                    json!({"hash": "feedface0123", "message": "m", "author": "a"}),
                )],
            )
            .unwrap();
        store
    }

    fn options(dir: &Path) -> ExportOptions {
        ExportOptions {
            output_dir: dir.to_path_buf(),
            query: None,
            include_events: false,
            views_path: None,
        }
    }

    #[test]
    fn test_export_writes_all_artifacts() {
        let store = seeded_store();
        let out = TempDir::new().unwrap();
        let mut opts = options(out.path());
        opts.include_events = true;

        let result = run_export(&store, &opts).unwrap();
        assert_eq!(result.repos_exported, 3);
        assert_eq!(result.events_exported, 1);

        for file in ["index.db", "repos.jsonl", "events.jsonl", "README.md", "manifest.json"] {
            assert!(out.path().join(file).exists(), "missing {file}");
        }
    }

    #[test]
    fn test_exported_db_is_queryable_and_equivalent() {
        let store = seeded_store();
        let out = TempDir::new().unwrap();
        run_export(&store, &options(out.path())).unwrap();

        let copy = Store::open_read_only(&out.path().join("index.db")).unwrap();
        assert_eq!(copy.repo_count().unwrap(), 3);
        let names: Vec<String> = copy
            .get_all_repos()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        let events = copy.get_events(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id(), "commit_alpha_feedface");
    }

    #[test]
    fn test_repos_jsonl_drops_nulls_and_parses_json_columns() {
        let store = seeded_store();
        let out = TempDir::new().unwrap();
        run_export(&store, &options(out.path())).unwrap();

        let content = std::fs::read_to_string(out.path().join("repos.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["name"], json!("alpha"));
        // languages was stored as JSON text; the export re-parses it
        assert_eq!(first["languages"], json!(["Python"]));
        // null columns are dropped entirely
        assert!(first.get("remote_url").is_none());
    }

    #[test]
    fn test_export_with_query_filter() {
        let store = seeded_store();
        let out = TempDir::new().unwrap();
        let mut opts = options(out.path());
        opts.query = Some("language == 'Python'".to_string());

        let result = run_export(&store, &opts).unwrap();
        assert_eq!(result.repos_exported, 2);
    }

    #[test]
    fn test_manifest_shape() {
        let store = seeded_store();
        let out = TempDir::new().unwrap();
        let mut opts = options(out.path());
        opts.include_events = true;
        run_export(&store, &opts).unwrap();

        let manifest: Value =
            serde_json::from_str(&std::fs::read_to_string(out.path().join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["echo_version"], json!("1.0"));
        assert_eq!(manifest["toolkit"], json!("repoindex"));
        assert!(manifest["contents"]["index.db"].is_object());
        assert!(manifest["contents"]["events.jsonl"]["count"].is_number());
        assert_eq!(manifest["stats"]["total_repos"], json!(3));
        assert_eq!(manifest["stats"]["languages"]["Python"], json!(2));
        assert_eq!(manifest["options"]["include_events"], json!(true));
    }

    #[test]
    fn test_event_jsonl_record_shape() {
        let store = seeded_store();
        let out = TempDir::new().unwrap();
        let mut opts = options(out.path());
        opts.include_events = true;
        run_export(&store, &opts).unwrap();

        let content = std::fs::read_to_string(out.path().join("events.jsonl")).unwrap();
        let line = content.lines().next().unwrap();
        assert!(line.starts_with(r#"{"id":"commit_alpha_feedface","type":"commit","timestamp":"#));
        let parsed: Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["repo"], json!("alpha"));
        assert_eq!(parsed["path"], json!("/r/alpha"));
        assert_eq!(parsed["data"]["hash"], json!("feedface0123"));
    }
}
