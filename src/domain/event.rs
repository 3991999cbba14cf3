//! Event record with content-derived stable IDs.
//!
//! An event is something that happened in or about a repository: a commit,
//! a tag, a merge, a release, a package publish. The ID is derived from the
//! event's content and is what makes repeated scans idempotent: the store
//! inserts with `INSERT OR IGNORE` keyed on it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// An event detected in a repository.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event kind (`commit`, `git_tag`, `branch`, `merge`, `github_release`,
    /// `pr`, `issue`, `workflow_run`, `pypi_publish`, `cran_publish`)
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub repo_name: String,
    pub repo_path: String,
    /// Kind-specific payload
    pub data: Value,
}

/// Stable wire shape for JSONL output. Field order is part of the contract.
#[derive(Serialize)]
struct EventRecord<'a> {
    id: String,
    #[serde(rename = "type")]
    kind: &'a str,
    timestamp: String,
    repo: &'a str,
    path: &'a str,
    data: &'a Value,
}

impl Event {
    pub fn new(
        kind: impl Into<String>,
        timestamp: DateTime<Utc>,
        repo_name: impl Into<String>,
        repo_path: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            timestamp,
            repo_name: repo_name.into(),
            repo_path: repo_path.into(),
            data,
        }
    }

    fn data_str(&self, key: &str) -> String {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    }

    /// Derive the stable ID. The discriminator is the tag name, the first
    /// 8 hex digits of a commit hash, a PR/issue number, a workflow run ID,
    /// or a `package_version` pair, depending on the kind.
    pub fn id(&self) -> String {
        match self.kind.as_str() {
            "commit" => {
                let hash = self.data_str("hash");
                let short = &hash[..hash.len().min(8)];
                format!("commit_{}_{}", self.repo_name, short)
            }
            "git_tag" => format!("git_tag_{}_{}", self.repo_name, self.data_str("tag")),
            "branch" => format!(
                "branch_{}_{}_{}",
                self.repo_name,
                self.data_str("branch"),
                self.data.get("action").and_then(Value::as_str).unwrap_or("")
            ),
            "merge" => {
                let hash = self.data_str("hash");
                let short = &hash[..hash.len().min(8)];
                format!("merge_{}_{}", self.repo_name, short)
            }
            "github_release" => {
                format!("github_release_{}_{}", self.repo_name, self.data_str("tag"))
            }
            "pr" => format!("pr_{}_{}", self.repo_name, self.number_or_unknown()),
            "issue" => format!("issue_{}_{}", self.repo_name, self.number_or_unknown()),
            "workflow_run" => format!(
                "workflow_run_{}_{}",
                self.repo_name,
                self.data
                    .get("id")
                    .map(render_scalar)
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            "pypi_publish" => format!(
                "pypi_publish_{}_{}",
                self.data_str("package"),
                self.data_str("version")
            ),
            "cran_publish" => format!(
                "cran_publish_{}_{}",
                self.data_str("package"),
                self.data_str("version")
            ),
            other => format!(
                "{}_{}_{}",
                other,
                self.repo_name,
                self.timestamp.format("%Y%m%d%H%M%S")
            ),
        }
    }

    fn number_or_unknown(&self) -> String {
        self.data
            .get("number")
            .map(render_scalar)
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// The git ref this event is about, when it has one.
    pub fn reference(&self) -> Option<String> {
        for key in ["ref", "tag", "branch"] {
            if let Some(value) = self.data.get(key).and_then(Value::as_str) {
                return Some(value.to_string());
            }
        }
        None
    }

    pub fn message(&self) -> Option<String> {
        self.data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn author(&self) -> Option<String> {
        self.data
            .get("author")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Single-line JSON for streaming output:
    /// `{"id","type","timestamp","repo","path","data"}`.
    pub fn to_jsonl(&self) -> String {
        let record = EventRecord {
            id: self.id(),
            kind: &self.kind,
            timestamp: self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            repo: &self.repo_name,
            path: &self.repo_path,
            data: &self.data,
        };
        serde_json::to_string(&record).expect("event record serializes")
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}
