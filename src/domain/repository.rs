//! Repository record and its enrichment sub-records.
//!
//! A repository's identity is the absolute filesystem path of its working
//! copy. Two clones of the same remote are two records; the index never
//! collapses them.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Local git working-copy state, parsed from `git` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitStatus {
    pub branch: Option<String>,
    pub clean: bool,
    pub ahead: i64,
    pub behind: i64,
    pub has_upstream: bool,
    pub uncommitted_changes: bool,
    pub untracked_files: i64,
}

/// Heuristically identified license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseInfo {
    /// SPDX-ish key, lowercased (`mit`, `apache-2.0`, `gpl-3.0`, ...)
    pub key: String,
    pub name: Option<String>,
    /// File the license was read from (`LICENSE`, `COPYING`, ...)
    pub file: Option<String>,
}

/// Hosted-provider metadata. Stored under `github_`-prefixed columns so
/// provenance stays explicit in the schema and the query surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubMetadata {
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub is_fork: bool,
    pub is_private: bool,
    pub is_archived: bool,
    pub has_issues: bool,
    pub has_wiki: bool,
    pub has_pages: bool,
    pub pages_url: Option<String>,
    pub default_branch: Option<String>,
    pub topics: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
}

/// One author entry parsed from a citation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Metadata parsed from `CITATION.cff` or `.zenodo.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationInfo {
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<CitationAuthor>,
    pub version: Option<String>,
    pub repository: Option<String>,
    pub license: Option<String>,
}

/// Package-registry state for one `(repo, registry)` pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicationInfo {
    pub registry: String,
    pub package_name: String,
    pub current_version: Option<String>,
    pub published: bool,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub downloads_total: Option<i64>,
    pub downloads_30d: Option<i64>,
    pub last_published: Option<String>,
}

/// A dependency extracted from a package manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub package_name: String,
    pub registry: Option<String>,
    pub version_spec: Option<String>,
    /// `runtime`, `dev`, or `optional`
    pub dep_type: String,
}

/// A repository record as assembled by the refresh pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    /// Absolute path of the working copy; the sole identity
    pub path: String,
    /// Directory basename
    pub name: String,
    pub remote_url: Option<String>,
    /// Derived from the remote URL
    pub owner: Option<String>,
    pub language: Option<String>,
    pub languages: Vec<String>,
    pub status: Option<GitStatus>,
    pub license: Option<LicenseInfo>,
    pub github: Option<GitHubMetadata>,
    pub citation: Option<CitationInfo>,
    pub publications: Vec<PublicationInfo>,
    pub has_readme: bool,
    /// README text, captured for full-text search
    pub readme_content: Option<String>,
    pub has_ci: bool,
    pub has_citation: bool,
    pub citation_file: Option<String>,
    /// User-configured tags for this path
    pub tags: Vec<String>,
    /// mtime of `.git/index` observed during enrichment
    pub git_index_mtime: Option<f64>,
}

impl Repository {
    /// Minimal record from a discovered path (name = basename).
    pub fn from_path(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Match a tag pattern against this record's tags. `*` in the pattern
    /// matches any run of characters; without it the match is exact.
    pub fn has_tag(&self, pattern: &str) -> bool {
        self.tags
            .iter()
            .any(|t| super::tag::matches_pattern(t, pattern))
    }
}
