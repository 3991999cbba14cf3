//! Subprocess git adapter.
//!
//! Invokes the local `git` binary and parses its output. Queries that can
//! legitimately fail on odd repositories (no commits yet, detached HEAD,
//! no upstream) are tolerant: they return None/empty rather than erroring,
//! and the caller records what it could get.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::GitStatus;

/// Unit separator used in `--format` strings; never appears in real fields.
const FIELD_SEP: char = '\u{1f}';

/// One commit parsed from `git log`.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub parent_count: usize,
}

impl CommitInfo {
    /// Merges have two or more parents.
    pub fn is_merge(&self) -> bool {
        self.parent_count >= 2
    }
}

/// One tag parsed from `git for-each-ref`.
#[derive(Debug, Clone)]
pub struct TagInfo {
    pub name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// One branch-affecting reflog entry.
#[derive(Debug, Clone)]
pub struct ReflogEntry {
    pub timestamp: DateTime<Utc>,
    pub branch: String,
    /// `checkout` or `created`
    pub action: String,
}

/// Stateless client over the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitClient;

impl GitClient {
    pub fn new() -> Self {
        Self
    }

    /// A working copy is a directory containing a `.git` entry.
    pub fn is_git_repo(path: &Path) -> bool {
        path.join(".git").exists()
    }

    /// mtime of `.git/index` in fractional seconds since the epoch.
    /// None when the file does not exist (e.g. a repo with no index yet).
    pub fn index_mtime(path: &Path) -> Option<f64> {
        let metadata = std::fs::metadata(path.join(".git").join("index")).ok()?;
        let modified = metadata.modified().ok()?;
        let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
        Some(since_epoch.as_secs_f64())
    }

    /// Run git in `repo`, returning stdout on success and None on any
    /// failure (missing binary, non-zero exit).
    fn run(&self, repo: &Path, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(
                repo = %repo.display(),
                args = ?args,
                "git exited nonzero"
            );
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Current working-copy state.
    pub fn status(&self, path: &Path) -> GitStatus {
        let branch = self
            .run(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let porcelain = self
            .run(path, &["status", "--porcelain"])
            .unwrap_or_default();
        let lines: Vec<&str> = porcelain.lines().filter(|l| !l.is_empty()).collect();
        let untracked_files = lines.iter().filter(|l| l.starts_with("??")).count() as i64;
        let uncommitted_changes = !lines.is_empty();

        let mut has_upstream = false;
        let mut ahead = 0;
        let mut behind = 0;
        if self
            .run(path, &["rev-parse", "--abbrev-ref", "@{u}"])
            .is_some()
        {
            has_upstream = true;
            if let Some(counts) =
                self.run(path, &["rev-list", "--left-right", "--count", "HEAD...@{u}"])
            {
                let parts: Vec<&str> = counts.split_whitespace().collect();
                if parts.len() == 2 {
                    ahead = parts[0].parse().unwrap_or(0);
                    behind = parts[1].parse().unwrap_or(0);
                }
            }
        }

        GitStatus {
            branch,
            clean: !uncommitted_changes,
            ahead,
            behind,
            has_upstream,
            uncommitted_changes,
            untracked_files,
        }
    }

    /// URL of the `origin` remote.
    pub fn remote_url(&self, path: &Path) -> Option<String> {
        self.run(path, &["config", "--get", "remote.origin.url"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Commits in the window, newest first.
    pub fn log(
        &self,
        path: &Path,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<CommitInfo> {
        let format = format!(
            "--pretty=format:%H{sep}%aI{sep}%an{sep}%P{sep}%s",
            sep = FIELD_SEP
        );
        let mut args = vec!["log".to_string(), format];
        if let Some(since) = since {
            args.push(format!("--since={}", since.to_rfc3339()));
        }
        if let Some(until) = until {
            args.push(format!("--until={}", until.to_rfc3339()));
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = match self.run(path, &arg_refs) {
            Some(out) => out,
            None => return Vec::new(),
        };

        output
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.splitn(5, FIELD_SEP).collect();
                if fields.len() < 5 {
                    return None;
                }
                let timestamp = DateTime::parse_from_rfc3339(fields[1])
                    .ok()?
                    .with_timezone(&Utc);
                let parent_count = fields[3].split_whitespace().count();
                Some(CommitInfo {
                    hash: fields[0].to_string(),
                    timestamp,
                    author: fields[2].to_string(),
                    message: fields[4].to_string(),
                    parent_count,
                })
            })
            .collect()
    }

    /// All tags with their creation date and annotation subject.
    pub fn tags(&self, path: &Path) -> Vec<TagInfo> {
        let format = format!(
            "--format=%(refname:short){sep}%(creatordate:iso-strict){sep}%(contents:subject)",
            sep = FIELD_SEP
        );
        let output = match self.run(path, &["for-each-ref", "refs/tags", &format]) {
            Some(out) => out,
            None => return Vec::new(),
        };

        output
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.splitn(3, FIELD_SEP).collect();
                let name = fields.first()?.trim();
                if name.is_empty() {
                    return None;
                }
                let timestamp = fields
                    .get(1)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|ts| ts.with_timezone(&Utc));
                let message = fields
                    .get(2)
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty());
                Some(TagInfo {
                    name: name.to_string(),
                    timestamp,
                    message,
                })
            })
            .collect()
    }

    /// Branch checkout/creation entries from the HEAD reflog, where
    /// available. Repos without a reflog yield nothing.
    pub fn reflog(&self, path: &Path) -> Vec<ReflogEntry> {
        let format = format!("--format=%gd{sep}%gs", sep = FIELD_SEP);
        let output = match self.run(path, &["reflog", "--date=iso-strict", &format]) {
            Some(out) => out,
            None => return Vec::new(),
        };

        output
            .lines()
            .filter_map(|line| {
                let (selector, subject) = line.split_once(FIELD_SEP)?;
                let raw_date = selector.split_once("@{")?.1.strip_suffix('}')?;
                let timestamp = DateTime::parse_from_rfc3339(raw_date)
                    .ok()?
                    .with_timezone(&Utc);

                if let Some(rest) = subject.strip_prefix("checkout: moving from ") {
                    let (_, to) = rest.split_once(" to ")?;
                    return Some(ReflogEntry {
                        timestamp,
                        branch: to.trim().to_string(),
                        action: "checkout".to_string(),
                    });
                }
                if subject.starts_with("branch: Created") {
                    return Some(ReflogEntry {
                        timestamp,
                        branch: current_branch_from_selector(selector)?,
                        action: "created".to_string(),
                    });
                }
                None
            })
            .collect()
    }
}

fn current_branch_from_selector(selector: &str) -> Option<String> {
    // selectors look like `HEAD@{...}` or `refs/heads/name@{...}`
    let name = selector.split("@{").next()?;
    let name = name.strip_prefix("refs/heads/").unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Parse `(owner, repo)` out of a GitHub remote URL (HTTPS or SSH).
pub fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("git@github.com:")
        .or_else(|| {
            url.split_once("github.com/")
                .map(|(_, rest)| rest)
        })?;
    let mut parts = rest.trim_end_matches('/').splitn(2, '/');
    let owner = parts.next()?.to_string();
    // drop anything after the repo segment (tree/v1.0 etc.)
    let repo = parts
        .next()?
        .split('/')
        .next()?
        .trim_end_matches(".git")
        .to_string();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

/// Normalize a GitHub URL to lowercase `https://github.com/owner/repo`.
pub fn normalize_github_url(url: &str) -> String {
    match parse_owner_repo(url) {
        Some((owner, repo)) => {
            format!("https://github.com/{}/{}", owner, repo).to_lowercase()
        }
        None => url.trim_end_matches('/').trim_end_matches(".git").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("git runs");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q", "-b", "main"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        git(dir.path(), &["config", "user.name", "Test"]);
        dir
    }

    fn commit(dir: &Path, file: &str, message: &str) {
        std::fs::write(dir.join(file), message).unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", message]);
    }

    #[test]
    fn test_is_git_repo() {
        let dir = init_repo();
        assert!(GitClient::is_git_repo(dir.path()));
        let plain = TempDir::new().unwrap();
        assert!(!GitClient::is_git_repo(plain.path()));
    }

    #[test]
    fn test_status_clean_and_dirty() {
        let dir = init_repo();
        commit(dir.path(), "a.txt", "initial");

        let client = GitClient::new();
        let status = client.status(dir.path());
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert!(status.clean);
        assert!(!status.has_upstream);

        std::fs::write(dir.path().join("new.txt"), "untracked").unwrap();
        let status = client.status(dir.path());
        assert!(!status.clean);
        assert!(status.uncommitted_changes);
        assert_eq!(status.untracked_files, 1);
    }

    #[test]
    fn test_log_parses_commits() {
        let dir = init_repo();
        commit(dir.path(), "a.txt", "first commit");
        commit(dir.path(), "b.txt", "second commit");

        let client = GitClient::new();
        let commits = client.log(dir.path(), None, None);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].message, "second commit");
        assert_eq!(commits[0].parent_count, 1);
        assert_eq!(commits[1].parent_count, 0);
        assert!(!commits[0].is_merge());
        assert_eq!(commits[0].hash.len(), 40);
    }

    #[test]
    fn test_tags_listing() {
        let dir = init_repo();
        commit(dir.path(), "a.txt", "initial");
        git(dir.path(), &["tag", "-a", "v1.0.0", "-m", "first release"]);
        git(dir.path(), &["tag", "lightweight"]);

        let client = GitClient::new();
        let mut tags = client.tags(dir.path());
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "lightweight");
        assert_eq!(tags[1].name, "v1.0.0");
        assert_eq!(tags[1].message.as_deref(), Some("first release"));
        assert!(tags[1].timestamp.is_some());
    }

    #[test]
    fn test_merge_detection() {
        let dir = init_repo();
        commit(dir.path(), "a.txt", "initial");
        git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        commit(dir.path(), "b.txt", "feature work");
        git(dir.path(), &["checkout", "-q", "main"]);
        commit(dir.path(), "c.txt", "main work");
        git(dir.path(), &["merge", "-q", "--no-ff", "-m", "merge feature", "feature"]);

        let client = GitClient::new();
        let commits = client.log(dir.path(), None, None);
        assert!(commits[0].is_merge());
        assert_eq!(commits[0].message, "merge feature");
    }

    #[test]
    fn test_reflog_checkout_entries() {
        let dir = init_repo();
        commit(dir.path(), "a.txt", "initial");
        git(dir.path(), &["checkout", "-q", "-b", "feature"]);

        let client = GitClient::new();
        let entries = client.reflog(dir.path());
        assert!(entries
            .iter()
            .any(|e| e.branch == "feature" && e.action == "checkout"));
    }

    #[test]
    fn test_index_mtime_present_after_commit() {
        let dir = init_repo();
        commit(dir.path(), "a.txt", "initial");
        assert!(GitClient::index_mtime(dir.path()).is_some());
    }

    #[test]
    fn test_empty_repo_is_tolerated() {
        let dir = init_repo();
        let client = GitClient::new();
        let status = client.status(dir.path());
        assert!(status.clean);
        assert!(client.log(dir.path(), None, None).is_empty());
        assert!(client.tags(dir.path()).is_empty());
    }

    #[test]
    fn test_parse_owner_repo() {
        assert_eq!(
            parse_owner_repo("https://github.com/alice/widget.git"),
            Some(("alice".into(), "widget".into()))
        );
        assert_eq!(
            parse_owner_repo("git@github.com:alice/widget.git"),
            Some(("alice".into(), "widget".into()))
        );
        assert_eq!(
            parse_owner_repo("https://github.com/alice/widget/tree/v1.0"),
            Some(("alice".into(), "widget".into()))
        );
        assert_eq!(parse_owner_repo("https://gitlab.com/alice/widget"), None);
    }

    #[test]
    fn test_normalize_github_url() {
        assert_eq!(
            normalize_github_url("git@github.com:Alice/Widget.git"),
            "https://github.com/alice/widget"
        );
        assert_eq!(
            normalize_github_url("https://github.com/Alice/Widget/tree/v1.0"),
            "https://github.com/alice/widget"
        );
    }
}
