//! Named views: declarative ordered collections of repositories.
//!
//! Views live in `~/.repoindex/views.yaml` (override with
//! `REPOINDEX_VIEWS`). A view selects repositories through any mix of a
//! DSL query, an explicit repo list, and includes of other views; results
//! compose in that order with first-occurrence dedup by path. The query
//! compiler consumes the same definitions for `@name` references.
//!
//! ```yaml
//! views:
//!   python-active:
//!     description: Actively developed Python
//!     query: "language == 'Python' and has_event('commit', since='30d')"
//!   portfolio:
//!     repos: [repoindex, /home/me/projects/widget]
//!     include: [python-active]
//!     order: "stars desc"
//!     limit: 20
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{QueryCompileError, RepoIndexError, Result};
use crate::query::QueryCompiler;
use crate::store::{JsonMap, Store};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ViewDef {
    pub description: Option<String>,
    /// DSL predicate selecting repositories
    pub query: Option<String>,
    /// Explicit repository names or paths, in order
    pub repos: Vec<String>,
    /// Other views composed after the query results
    pub include: Vec<String>,
    /// Order spec appended to the query (`"stars desc"`)
    pub order: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ViewsFile {
    #[serde(default)]
    views: BTreeMap<String, ViewDef>,
}

/// Loads and resolves view definitions.
#[derive(Debug, Default)]
pub struct ViewService {
    views: BTreeMap<String, ViewDef>,
}

impl ViewService {
    /// Load from a views file; a missing file yields an empty service.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| RepoIndexError::io(path, e))?;
        let file: ViewsFile = serde_yaml_ng::from_str(&content)
            .map_err(|e| RepoIndexError::parse(path, e.to_string()))?;
        Ok(Self { views: file.views })
    }

    pub fn from_defs(views: BTreeMap<String, ViewDef>) -> Self {
        Self { views }
    }

    pub fn names(&self) -> Vec<&str> {
        self.views.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ViewDef> {
        self.views.get(name)
    }

    /// Query predicates by view name, for the compiler's `@name` expansion.
    pub fn predicates(&self) -> HashMap<String, String> {
        self.views
            .iter()
            .filter_map(|(name, def)| def.query.clone().map(|q| (name.clone(), q)))
            .collect()
    }

    /// Resolve a view into an ordered repository list. Selection order is
    /// explicit repos, then query results, then includes; duplicates keep
    /// their first position. Cyclic includes are rejected.
    pub fn resolve(&self, name: &str, store: &Store) -> Result<Vec<JsonMap>> {
        let limit = self.views.get(name).and_then(|def| def.limit);

        let mut stack = Vec::new();
        let mut rows = self.resolve_inner(name, store, &mut stack)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn resolve_inner(
        &self,
        name: &str,
        store: &Store,
        stack: &mut Vec<String>,
    ) -> Result<Vec<JsonMap>> {
        let def = self
            .views
            .get(name)
            .ok_or_else(|| QueryCompileError::UnknownView(name.to_string()))?;

        if stack.iter().any(|seen| seen == name) {
            return Err(QueryCompileError::CyclicView(name.to_string()).into());
        }
        stack.push(name.to_string());

        let mut rows: Vec<JsonMap> = Vec::new();
        let mut seen_paths: Vec<String> = Vec::new();
        let mut push = |row: JsonMap, seen: &mut Vec<String>, out: &mut Vec<JsonMap>| {
            let path = row
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if !seen.contains(&path) {
                seen.push(path);
                out.push(row);
            }
        };

        for repo_ref in &def.repos {
            if let Some(row) = lookup_repo(store, repo_ref)? {
                push(row, &mut seen_paths, &mut rows);
            }
        }

        if let Some(ref query) = def.query {
            let mut expr = query.clone();
            if let Some(ref order) = def.order {
                expr.push_str(&format!(" order by {order}"));
            }
            let compiler = QueryCompiler::with_views(self.predicates());
            let compiled = compiler.compile(&expr)?;
            for row in store.query(&compiled)? {
                push(row, &mut seen_paths, &mut rows);
            }
        }

        for include in &def.include {
            for row in self.resolve_inner(include, store, stack)? {
                push(row, &mut seen_paths, &mut rows);
            }
        }

        stack.pop();
        Ok(rows)
    }
}

/// Look a repository up by path first, then by name.
fn lookup_repo(store: &Store, repo_ref: &str) -> Result<Option<JsonMap>> {
    if let Some(row) = store.get_repo_by_path(repo_ref)? {
        return Ok(Some(row));
    }
    let rows = store.fetch_with_params(
        "SELECT * FROM repos WHERE name = ?1 ORDER BY path LIMIT 1",
        &[crate::query::QueryValue::Text(repo_ref.to_string())],
    )?;
    Ok(rows.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GitHubMetadata, Repository};
    use crate::store::Store;

    fn seeded_store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        for (name, language, stars) in [
            ("alpha", "Python", 5),
            ("beta", "Python", 50),
            ("gamma", "Rust", 10),
        ] {
            let mut repo = Repository {
                path: format!("/r/{name}"),
                name: name.to_string(),
                language: Some(language.to_string()),
                ..Repository::default()
            };
            repo.github = Some(GitHubMetadata {
                owner: "me".into(),
                name: name.to_string(),
                stars,
                ..GitHubMetadata::default()
            });
            store.upsert_repo(&repo).unwrap();
        }
        store
    }

    fn defs(pairs: &[(&str, ViewDef)]) -> ViewService {
        ViewService::from_defs(
            pairs
                .iter()
                .map(|(name, def)| (name.to_string(), def.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_query_view_with_order() {
        let store = seeded_store();
        let service = defs(&[(
            "python",
            ViewDef {
                query: Some("language == 'Python'".into()),
                order: Some("stars desc".into()),
                ..ViewDef::default()
            },
        )]);

        let rows = service.resolve("python", &store).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], serde_json::json!("beta"));
        assert_eq!(rows[1]["name"], serde_json::json!("alpha"));
    }

    #[test]
    fn test_explicit_repos_come_first_and_dedup() {
        let store = seeded_store();
        let service = defs(&[(
            "mixed",
            ViewDef {
                repos: vec!["gamma".into(), "/r/beta".into()],
                query: Some("language == 'Python'".into()),
                ..ViewDef::default()
            },
        )]);

        let rows = service.resolve("mixed", &store).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        // beta appears once, in its explicit position
        assert_eq!(names, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_include_composition_and_limit() {
        let store = seeded_store();
        let service = defs(&[
            (
                "rusty",
                ViewDef {
                    query: Some("language == 'Rust'".into()),
                    ..ViewDef::default()
                },
            ),
            (
                "all",
                ViewDef {
                    query: Some("language == 'Python'".into()),
                    include: vec!["rusty".into()],
                    limit: Some(2),
                    ..ViewDef::default()
                },
            ),
        ]);

        let rows = service.resolve("all", &store).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_cyclic_includes_rejected() {
        let store = seeded_store();
        let service = defs(&[
            (
                "a",
                ViewDef {
                    include: vec!["b".into()],
                    ..ViewDef::default()
                },
            ),
            (
                "b",
                ViewDef {
                    include: vec!["a".into()],
                    ..ViewDef::default()
                },
            ),
        ]);

        let err = service.resolve("a", &store).unwrap_err();
        assert!(err.to_string().contains("Cyclic view"));
    }

    #[test]
    fn test_unknown_view_is_an_error() {
        let store = seeded_store();
        let service = ViewService::default();
        assert!(service.resolve("nope", &store).is_err());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let service = ViewService::load(Path::new("/no/views.yaml")).unwrap();
        assert!(service.names().is_empty());
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.yaml");
        std::fs::write(
            &path,
            "views:\n  active:\n    description: recent work\n    query: \"has_event('commit', since='30d')\"\n",
        )
        .unwrap();

        let service = ViewService::load(&path).unwrap();
        assert_eq!(service.names(), vec!["active"]);
        assert!(service.predicates().contains_key("active"));
        assert_eq!(
            service.get("active").unwrap().description.as_deref(),
            Some("recent work")
        );
    }
}
