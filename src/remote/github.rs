//! GitHub API client.
//!
//! Fetches repository metadata plus the remote event sources (releases,
//! PRs, issues, workflow runs). Auth is a bearer token when one is
//! available; unauthenticated requests work within GitHub's anonymous
//! rate limits.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::GitHubMetadata;
use crate::error::{RepoIndexError, Result};

use super::{get_with_retry, http_client};

const API_BASE: &str = "https://api.github.com";

/// Raw repository response (only the fields we use).
#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    owner: ApiOwner,
    description: Option<String>,
    homepage: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    forks_count: i64,
    #[serde(default)]
    watchers_count: i64,
    #[serde(default)]
    open_issues_count: i64,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default = "default_true")]
    has_issues: bool,
    #[serde(default = "default_true")]
    has_wiki: bool,
    #[serde(default)]
    has_pages: bool,
    default_branch: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    pushed_at: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

/// A published release.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub name: Option<String>,
    pub published_at: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
}

/// A pull request or issue (the issues API serves both; `pull_request`
/// distinguishes them).
#[derive(Debug, Clone, Deserialize)]
pub struct IssueInfo {
    pub number: i64,
    pub title: String,
    pub state: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub pull_request: Option<Value>,
    pub user: Option<ApiUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
}

/// One workflow run.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunInfo {
    pub id: i64,
    pub name: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub created_at: Option<String>,
    pub head_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRunInfo>,
}

/// GitHub API client.
pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            token,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(format!("{API_BASE}/{path}"))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(ref token) = self.token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = get_with_retry(|| self.request(path)).await?;
        let status = response.status();

        if status.as_u16() == 404 {
            debug!(path, "not found on GitHub");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepoIndexError::remote(format!(
                "GitHub API returned {status} for {path}: {body}"
            )));
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| RepoIndexError::remote(format!("GitHub response parse error: {e}")))?;
        Ok(Some(parsed))
    }

    /// Repository metadata, or None when the repo is gone/inaccessible.
    pub async fn get_repo(&self, owner: &str, name: &str) -> Result<Option<GitHubMetadata>> {
        let repo: Option<ApiRepo> = self.get_json(&format!("repos/{owner}/{name}")).await?;
        Ok(repo.map(|r| {
            let pages_url = if r.has_pages {
                Some(format!(
                    "https://{}.github.io/{}",
                    r.owner.login.to_lowercase(),
                    r.name
                ))
            } else {
                None
            };
            GitHubMetadata {
                owner: r.owner.login,
                name: r.name,
                description: r.description,
                homepage: r.homepage.filter(|h| !h.is_empty()),
                stars: r.stargazers_count,
                forks: r.forks_count,
                watchers: r.watchers_count,
                open_issues: r.open_issues_count,
                is_fork: r.fork,
                is_private: r.private,
                is_archived: r.archived,
                has_issues: r.has_issues,
                has_wiki: r.has_wiki,
                has_pages: r.has_pages,
                pages_url,
                default_branch: r.default_branch,
                topics: r.topics,
                created_at: r.created_at,
                updated_at: r.updated_at,
                pushed_at: r.pushed_at,
            }
        }))
    }

    pub async fn get_releases(&self, owner: &str, name: &str) -> Result<Vec<ReleaseInfo>> {
        Ok(self
            .get_json(&format!("repos/{owner}/{name}/releases?per_page=50"))
            .await?
            .unwrap_or_default())
    }

    /// Recent PRs and issues. The issues endpoint returns both; callers
    /// split on `pull_request`.
    pub async fn get_issues_and_prs(&self, owner: &str, name: &str) -> Result<Vec<IssueInfo>> {
        Ok(self
            .get_json(&format!(
                "repos/{owner}/{name}/issues?state=all&sort=updated&per_page=50"
            ))
            .await?
            .unwrap_or_default())
    }

    pub async fn get_workflow_runs(&self, owner: &str, name: &str) -> Result<Vec<WorkflowRunInfo>> {
        let response: Option<WorkflowRunsResponse> = self
            .get_json(&format!("repos/{owner}/{name}/actions/runs?per_page=50"))
            .await?;
        Ok(response.map(|r| r.workflow_runs).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_repo_deserializes_minimal_payload() {
        let json = r#"{
            "name": "widget",
            "owner": {"login": "alice"},
            "description": "A widget",
            "stargazers_count": 12,
            "forks_count": 3,
            "fork": false,
            "archived": false,
            "topics": ["cli", "rust"],
            "has_pages": true,
            "default_branch": "main",
            "updated_at": "2024-05-01T00:00:00Z"
        }"#;
        let repo: ApiRepo = serde_json::from_str(json).unwrap();
        assert_eq!(repo.name, "widget");
        assert_eq!(repo.owner.login, "alice");
        assert_eq!(repo.stargazers_count, 12);
        assert!(repo.has_issues); // defaulted
        assert_eq!(repo.topics, vec!["cli", "rust"]);
    }

    #[test]
    fn test_issue_vs_pr_discrimination() {
        let json = r#"[
            {"number": 1, "title": "bug", "state": "open", "created_at": null, "updated_at": null},
            {"number": 2, "title": "feat", "state": "open", "created_at": null, "updated_at": null,
             "pull_request": {"url": "https://api.github.com/..."}}
        ]"#;
        let items: Vec<IssueInfo> = serde_json::from_str(json).unwrap();
        assert!(items[0].pull_request.is_none());
        assert!(items[1].pull_request.is_some());
    }
}
