//! Package-registry adapters: PyPI and CRAN.
//!
//! Local detection reads the package manifest (`pyproject.toml` /
//! `DESCRIPTION`); the registry lookup then reports whether that package
//! is actually published and at what version.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::domain::{DependencyInfo, PublicationInfo};
use crate::error::{RepoIndexError, Result};

use super::{get_with_retry, http_client};

// ---- local manifest detection ---------------------------------------------

#[derive(Debug, Deserialize)]
struct PyProject {
    project: Option<PyProjectProject>,
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectProject {
    name: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    poetry: Option<PyProjectPoetry>,
}

#[derive(Debug, Deserialize)]
struct PyProjectPoetry {
    name: Option<String>,
}

/// Package name from `pyproject.toml` ([project] or [tool.poetry]).
pub fn detect_pypi_package(repo_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(repo_path.join("pyproject.toml")).ok()?;
    let parsed: PyProject = toml::from_str(&content).ok()?;
    parsed
        .project
        .as_ref()
        .and_then(|p| p.name.clone())
        .or_else(|| parsed.tool?.poetry?.name)
}

/// Runtime dependencies from `pyproject.toml` ([project].dependencies).
/// Specs like `requests>=2.28` split into name and version constraint.
pub fn detect_python_dependencies(repo_path: &Path) -> Vec<DependencyInfo> {
    let Ok(content) = std::fs::read_to_string(repo_path.join("pyproject.toml")) else {
        return Vec::new();
    };
    let Ok(parsed) = toml::from_str::<PyProject>(&content) else {
        return Vec::new();
    };

    parsed
        .project
        .map(|p| p.dependencies)
        .unwrap_or_default()
        .iter()
        .filter_map(|spec| {
            let split_at = spec
                .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == '.'))
                .unwrap_or(spec.len());
            let (name, version) = spec.split_at(split_at);
            if name.is_empty() {
                return None;
            }
            Some(DependencyInfo {
                package_name: name.to_string(),
                registry: Some("pypi".to_string()),
                version_spec: Some(version.trim().to_string()).filter(|v| !v.is_empty()),
                dep_type: "runtime".to_string(),
            })
        })
        .collect()
}

/// Package name from an R `DESCRIPTION` file.
pub fn detect_cran_package(repo_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(repo_path.join("DESCRIPTION")).ok()?;
    content.lines().find_map(|line| {
        line.strip_prefix("Package:")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

// ---- PyPI ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PyPiResponse {
    info: PyPiInfo,
    #[serde(default)]
    releases: HashMap<String, Vec<PyPiFile>>,
}

#[derive(Debug, Deserialize)]
struct PyPiInfo {
    version: String,
    package_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PyPiFile {
    upload_time_iso_8601: Option<String>,
}

/// One published version with its upload time.
#[derive(Debug, Clone)]
pub struct RegistryRelease {
    pub version: String,
    pub published_at: Option<String>,
}

/// Registry state for a package.
#[derive(Debug, Clone)]
pub struct RegistryPackage {
    pub publication: PublicationInfo,
    pub releases: Vec<RegistryRelease>,
}

pub struct PyPiClient {
    client: reqwest::Client,
}

impl PyPiClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    /// Look up a package. None when it is not on PyPI.
    pub async fn fetch(&self, package: &str) -> Result<Option<RegistryPackage>> {
        let url = format!("https://pypi.org/pypi/{package}/json");
        let response = get_with_retry(|| self.client.get(&url)).await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RepoIndexError::remote(format!(
                "PyPI returned {} for {package}",
                response.status()
            )));
        }

        let parsed: PyPiResponse = response
            .json()
            .await
            .map_err(|e| RepoIndexError::remote(format!("PyPI response parse error: {e}")))?;

        let mut releases: Vec<RegistryRelease> = parsed
            .releases
            .into_iter()
            .filter_map(|(version, files)| {
                let published_at = files
                    .iter()
                    .filter_map(|f| f.upload_time_iso_8601.clone())
                    .min();
                Some(RegistryRelease {
                    version,
                    published_at,
                })
            })
            .collect();
        releases.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let last_published = releases.iter().find_map(|r| r.published_at.clone());
        Ok(Some(RegistryPackage {
            publication: PublicationInfo {
                registry: "pypi".to_string(),
                package_name: package.to_string(),
                current_version: Some(parsed.info.version),
                published: true,
                url: parsed
                    .info
                    .package_url
                    .or_else(|| Some(format!("https://pypi.org/project/{package}/"))),
                doi: None,
                downloads_total: None,
                downloads_30d: None,
                last_published,
            },
            releases,
        }))
    }
}

// ---- CRAN ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CranResponse {
    #[serde(rename = "Version")]
    version: Option<String>,
    #[serde(rename = "Date/Publication")]
    date_publication: Option<String>,
}

pub struct CranClient {
    client: reqwest::Client,
}

impl CranClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    /// Look up a package on CRAN (via the crandb mirror API).
    pub async fn fetch(&self, package: &str) -> Result<Option<RegistryPackage>> {
        let url = format!("https://crandb.r-pkg.org/{package}");
        let response = get_with_retry(|| self.client.get(&url)).await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RepoIndexError::remote(format!(
                "CRAN returned {} for {package}",
                response.status()
            )));
        }

        let parsed: CranResponse = response
            .json()
            .await
            .map_err(|e| RepoIndexError::remote(format!("CRAN response parse error: {e}")))?;

        let releases = match (&parsed.version, &parsed.date_publication) {
            (Some(version), published_at) => vec![RegistryRelease {
                version: version.clone(),
                published_at: published_at.clone(),
            }],
            _ => Vec::new(),
        };

        Ok(Some(RegistryPackage {
            publication: PublicationInfo {
                registry: "cran".to_string(),
                package_name: package.to_string(),
                current_version: parsed.version,
                published: true,
                url: Some(format!(
                    "https://cran.r-project.org/package={package}"
                )),
                doi: None,
                downloads_total: None,
                downloads_30d: None,
                last_published: parsed.date_publication,
            },
            releases,
        }))
    }
}
