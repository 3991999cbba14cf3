//! Repository service: discovery, enrichment, filtering.
//!
//! Read-only facade. The compiler-backed SQL path is the preferred filter
//! surface; a small interpreter covers the legacy short forms
//! (`lang:python`, `tag:work/*`, `owner:`, `name:`).

use std::path::Path;

use crate::citation;
use crate::config::Config;
use crate::detect;
use crate::discovery::{discover_repos, DiscoveryOptions};
use crate::domain::Repository;
use crate::error::Result;
use crate::git::{parse_owner_repo, GitClient};
use crate::query::QueryCompiler;
use crate::store::{JsonMap, Store};
use crate::views::ViewService;

/// Purely local enrichment: git status, license, languages, citation,
/// well-known file flags. No network.
///
/// `git_index_mtime` is observed last: the git invocations above may
/// themselves refresh `.git/index`, and the staleness contract requires
/// the stored value to match the file as it is left on disk.
pub fn enrich_local(path: &Path) -> Repository {
    let git = GitClient::new();
    let mut repository = Repository::from_path(path);

    repository.status = Some(git.status(path));
    repository.remote_url = git.remote_url(path);
    repository.owner = repository
        .remote_url
        .as_deref()
        .and_then(parse_owner_repo)
        .map(|(owner, _)| owner);
    repository.license = detect::detect_license(path);

    let (language, languages) = detect::detect_languages(path);
    repository.language = language;
    repository.languages = languages;

    for readme in ["README.md", "README.rst", "README.txt", "README"] {
        let readme_path = path.join(readme);
        if readme_path.exists() {
            repository.has_readme = true;
            repository.readme_content = std::fs::read_to_string(&readme_path)
                .ok()
                .map(truncate_readme);
            break;
        }
    }
    repository.has_ci = path.join(".github").join("workflows").exists()
        || path.join(".gitlab-ci.yml").exists()
        || path.join(".travis.yml").exists()
        || path.join("Jenkinsfile").exists();

    if let Some(citation_file) = citation::find_citation_file(path) {
        repository.has_citation = true;
        repository.citation_file = Some(citation_file.to_string());
        repository.citation = citation::parse_citation_file(path, citation_file);
    }

    repository.git_index_mtime = GitClient::index_mtime(path);
    repository
}

/// Cap stored README text at 64KB so one pathological file cannot bloat
/// the index. Cuts on a char boundary.
fn truncate_readme(content: String) -> String {
    const MAX_BYTES: usize = 64 * 1024;
    if content.len() <= MAX_BYTES {
        return content;
    }
    let mut end = MAX_BYTES;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

pub struct RepositoryService {
    config: Config,
}

impl RepositoryService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Discover working copies under the given (or configured) roots as
    /// minimal records: path, name, remote, owner.
    pub fn discover(&self, roots: Option<&[String]>, recursive: bool) -> Vec<Repository> {
        let roots: Vec<String> = match roots {
            Some(roots) => roots.to_vec(),
            None => self.config.repository_directories.clone(),
        };
        let git = GitClient::new();

        discover_repos(
            &roots,
            &DiscoveryOptions {
                recursive,
                excludes: self.config.exclude_directories.clone(),
            },
        )
        .into_iter()
        .map(|path| {
            let mut repository = Repository::from_path(&path);
            repository.remote_url = git.remote_url(&path);
            repository.owner = repository
                .remote_url
                .as_deref()
                .and_then(parse_owner_repo)
                .map(|(owner, _)| owner);
            repository.tags = self.config.tags_for(&repository.path);
            repository
        })
        .collect()
    }

    /// Enrich one record with its current local state.
    pub fn get_status(&self, repository: &Repository) -> Repository {
        let mut enriched = enrich_local(Path::new(&repository.path));
        enriched.tags = self.config.tags_for(&enriched.path);
        enriched
    }

    /// Preferred filter surface: compile the DSL expression (with the
    /// user's views available for `@name`) and run it against the store.
    pub fn filter_by_query(&self, store: &Store, expr: &str) -> Result<Vec<JsonMap>> {
        let views = ViewService::load(&self.config.views_path())?;
        let compiler = QueryCompiler::with_views(views.predicates());
        let compiled = compiler.compile(expr)?;
        store.query(&compiled)
    }

    /// Legacy short-form filters over in-memory records.
    pub fn filter_short_form<'a>(
        &self,
        repos: &'a [Repository],
        expr: &str,
    ) -> Vec<&'a Repository> {
        repos
            .iter()
            .filter(|repo| Self::matches_short_form(repo, expr))
            .collect()
    }

    fn matches_short_form(repo: &Repository, expr: &str) -> bool {
        let expr = expr.trim();
        if let Some(lang) = expr.strip_prefix("lang:") {
            return repo
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(lang.trim()));
        }
        if let Some(pattern) = expr.strip_prefix("tag:") {
            return repo.has_tag(pattern.trim());
        }
        if let Some(owner) = expr.strip_prefix("owner:") {
            return repo
                .owner
                .as_deref()
                .is_some_and(|o| o.eq_ignore_ascii_case(owner.trim()));
        }
        if let Some(name) = expr.strip_prefix("name:") {
            let name = name.trim().to_lowercase();
            return repo.name.to_lowercase().contains(&name);
        }
        // default: substring match on the name
        repo.name.to_lowercase().contains(&expr.to_lowercase())
    }

    /// Filter by tag patterns; a repo matching any pattern passes.
    pub fn filter_by_tags<'a>(
        &self,
        repos: &'a [Repository],
        patterns: &[String],
    ) -> Vec<&'a Repository> {
        repos
            .iter()
            .filter(|repo| patterns.iter().any(|p| repo.has_tag(p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, language: &str, owner: &str, tags: &[&str]) -> Repository {
        Repository {
            name: name.to_string(),
            path: format!("/r/{name}"),
            language: Some(language.to_string()),
            owner: Some(owner.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Repository::default()
        }
    }

    #[test]
    fn test_short_form_filters() {
        let repos = vec![
            sample("alpha", "Python", "alice", &["work/clients"]),
            sample("beta", "Rust", "bob", &["personal"]),
        ];
        let service = RepositoryService::new(Config::default());

        let python = service.filter_short_form(&repos, "lang:python");
        assert_eq!(python.len(), 1);
        assert_eq!(python[0].name, "alpha");

        let tagged = service.filter_short_form(&repos, "tag:work/*");
        assert_eq!(tagged.len(), 1);

        let by_owner = service.filter_short_form(&repos, "owner:bob");
        assert_eq!(by_owner.len(), 1);
        assert_eq!(by_owner[0].name, "beta");

        let by_name = service.filter_short_form(&repos, "alph");
        assert_eq!(by_name.len(), 1);
    }

    #[test]
    fn test_filter_by_tags_any_match() {
        let repos = vec![
            sample("alpha", "Python", "alice", &["work/clients", "lang:python"]),
            sample("beta", "Rust", "bob", &["personal"]),
            sample("gamma", "Go", "carol", &[]),
        ];
        let service = RepositoryService::new(Config::default());

        let matched = service.filter_by_tags(
            &repos,
            &["personal".to_string(), "work/*".to_string()],
        );
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_enrich_local_on_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# x").unwrap();
        let repository = enrich_local(dir.path());
        assert!(repository.has_readme);
        assert!(!repository.has_ci);
        assert!(repository.remote_url.is_none());
    }
}
