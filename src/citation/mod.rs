//! Citation file parsing.
//!
//! Parses `CITATION.cff` (YAML, CFF 1.2.0) and `.zenodo.json` (Zenodo
//! deposit metadata) into a common `CitationInfo`: DOI, title, authors,
//! version, repository URL, and license. Parse failures are not errors;
//! a malformed citation file simply yields no metadata.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::domain::{CitationAuthor, CitationInfo};

/// Citation file names checked during enrichment, in priority order.
/// `CITATION.bib` and bare `CITATION` are detected (has_citation) but not
/// parsed.
pub const CITATION_FILES: &[&str] = &["CITATION.cff", ".zenodo.json", "CITATION.bib", "CITATION"];

/// Find the first citation file present in a repository.
pub fn find_citation_file(repo_path: &Path) -> Option<&'static str> {
    CITATION_FILES
        .iter()
        .find(|f| repo_path.join(f).exists())
        .copied()
}

/// Parse a citation file. Returns None when the file is missing, is a
/// format we only detect, or fails to parse.
pub fn parse_citation_file(repo_path: &Path, citation_file: &str) -> Option<CitationInfo> {
    let filepath = repo_path.join(citation_file);
    let content = std::fs::read_to_string(&filepath).ok()?;

    let parsed = match citation_file {
        "CITATION.cff" => parse_citation_cff(&content),
        ".zenodo.json" => parse_zenodo_json(&content),
        _ => None,
    };
    if parsed.is_none() {
        debug!(path = %filepath.display(), "citation file present but not parsed");
    }
    parsed
}

// ---- CITATION.cff ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CffFile {
    title: Option<String>,
    version: Option<VersionField>,
    license: Option<String>,
    #[serde(default)]
    authors: Vec<CffAuthor>,
    #[serde(default)]
    identifiers: Vec<CffIdentifier>,
    doi: Option<String>,
    #[serde(rename = "repository-code")]
    repository_code: Option<String>,
}

/// CFF versions may be written unquoted and parse as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionField {
    Text(String),
    Number(f64),
}

impl VersionField {
    fn into_string(self) -> String {
        match self {
            VersionField::Text(s) => s,
            VersionField::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CffAuthor {
    #[serde(rename = "family-names")]
    family_names: Option<String>,
    #[serde(rename = "given-names")]
    given_names: Option<String>,
    /// Entity name (research group, organization)
    name: Option<String>,
    orcid: Option<String>,
    affiliation: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CffIdentifier {
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<String>,
}

fn parse_citation_cff(content: &str) -> Option<CitationInfo> {
    let file: CffFile = serde_yaml_ng::from_str(content).ok()?;

    // DOI from the identifiers array (CFF 1.2.0), falling back to a bare
    // top-level doi field (older format)
    let doi = file
        .identifiers
        .iter()
        .find(|i| i.kind.as_deref() == Some("doi"))
        .and_then(|i| i.value.clone())
        .or(file.doi);

    let authors = file
        .authors
        .into_iter()
        .filter_map(|author| {
            let name = match (&author.given_names, &author.family_names) {
                (Some(given), Some(family)) => Some(format!("{given} {family}")),
                (Some(given), None) => Some(given.clone()),
                (None, Some(family)) => Some(family.clone()),
                (None, None) => author.name.clone(),
            }?;
            Some(CitationAuthor {
                name,
                orcid: author.orcid,
                affiliation: author.affiliation,
                email: author.email,
            })
        })
        .collect();

    Some(CitationInfo {
        doi,
        title: file.title,
        authors,
        version: file.version.map(VersionField::into_string),
        repository: file.repository_code,
        license: file.license,
    })
}

// ---- .zenodo.json ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ZenodoFile {
    doi: Option<String>,
    title: Option<String>,
    version: Option<String>,
    license: Option<ZenodoLicense>,
    #[serde(default)]
    creators: Vec<ZenodoCreator>,
    #[serde(default)]
    related_identifiers: Vec<ZenodoRelated>,
}

/// The license field is either a string or `{"id": "MIT"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZenodoLicense {
    Id { id: String },
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct ZenodoCreator {
    name: Option<String>,
    orcid: Option<String>,
    affiliation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZenodoRelated {
    identifier: Option<String>,
    relation: Option<String>,
}

fn parse_zenodo_json(content: &str) -> Option<CitationInfo> {
    let file: ZenodoFile = serde_json::from_str(content).ok()?;

    let repository = file
        .related_identifiers
        .iter()
        .find(|rel| {
            matches!(
                rel.relation.as_deref(),
                Some("isSupplementTo") | Some("isPartOf")
            )
        })
        .and_then(|rel| rel.identifier.clone());

    let authors = file
        .creators
        .into_iter()
        .filter_map(|creator| {
            Some(CitationAuthor {
                name: creator.name?,
                orcid: creator.orcid,
                affiliation: creator.affiliation,
                email: None,
            })
        })
        .collect();

    Some(CitationInfo {
        doi: file.doi,
        title: file.title,
        authors,
        version: file.version,
        repository,
        license: file.license.map(|l| match l {
            ZenodoLicense::Id { id } => id,
            ZenodoLicense::Plain(s) => s,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE_CFF: &str = r#"
cff-version: 1.2.0
title: "My Project"
authors:
  - family-names: "Smith"
    given-names: "Jane"
    orcid: "https://orcid.org/0000-0001-2345-6789"
    affiliation: "Example University"
  - name: "Example Research Group"
identifiers:
  - type: doi
    value: "10.5281/zenodo.1234567"
repository-code: "https://github.com/jane/my-project"
license: MIT
version: "1.0.0"
"#;

    const SAMPLE_ZENODO: &str = r#"{
        "doi": "10.5281/zenodo.7654321",
        "title": "My Project",
        "creators": [
            {"name": "Smith, Jane", "orcid": "0000-0001-2345-6789"}
        ],
        "version": "2.0.0",
        "license": {"id": "MIT"},
        "related_identifiers": [
            {"identifier": "https://github.com/jane/my-project", "relation": "isSupplementTo"}
        ]
    }"#;

    #[test]
    fn test_parse_cff() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CITATION.cff"), SAMPLE_CFF).unwrap();

        let info = parse_citation_file(dir.path(), "CITATION.cff").unwrap();
        assert_eq!(info.doi.as_deref(), Some("10.5281/zenodo.1234567"));
        assert_eq!(info.title.as_deref(), Some("My Project"));
        assert_eq!(info.version.as_deref(), Some("1.0.0"));
        assert_eq!(info.license.as_deref(), Some("MIT"));
        assert_eq!(
            info.repository.as_deref(),
            Some("https://github.com/jane/my-project")
        );
        assert_eq!(info.authors.len(), 2);
        assert_eq!(info.authors[0].name, "Jane Smith");
        assert!(info.authors[0].orcid.is_some());
        assert_eq!(info.authors[1].name, "Example Research Group");
    }

    #[test]
    fn test_cff_bare_doi_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("CITATION.cff"),
            "title: X\ndoi: 10.1234/direct\n",
        )
        .unwrap();
        let info = parse_citation_file(dir.path(), "CITATION.cff").unwrap();
        assert_eq!(info.doi.as_deref(), Some("10.1234/direct"));
    }

    #[test]
    fn test_parse_zenodo_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".zenodo.json"), SAMPLE_ZENODO).unwrap();

        let info = parse_citation_file(dir.path(), ".zenodo.json").unwrap();
        assert_eq!(info.doi.as_deref(), Some("10.5281/zenodo.7654321"));
        assert_eq!(info.version.as_deref(), Some("2.0.0"));
        assert_eq!(info.license.as_deref(), Some("MIT"));
        assert_eq!(
            info.repository.as_deref(),
            Some("https://github.com/jane/my-project")
        );
        assert_eq!(info.authors[0].name, "Smith, Jane");
    }

    #[test]
    fn test_zenodo_plain_string_license() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".zenodo.json"),
            r#"{"doi": "10.1/x", "license": "Apache-2.0"}"#,
        )
        .unwrap();
        let info = parse_citation_file(dir.path(), ".zenodo.json").unwrap();
        assert_eq!(info.license.as_deref(), Some("Apache-2.0"));
    }

    #[test]
    fn test_malformed_files_yield_none() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CITATION.cff"), ": : not yaml : [").unwrap();
        assert!(parse_citation_file(dir.path(), "CITATION.cff").is_none());

        std::fs::write(dir.path().join(".zenodo.json"), "{not json").unwrap();
        assert!(parse_citation_file(dir.path(), ".zenodo.json").is_none());
    }

    #[test]
    fn test_bibtex_is_detected_but_not_parsed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CITATION.bib"), "@misc{x}").unwrap();
        assert_eq!(find_citation_file(dir.path()), Some("CITATION.bib"));
        assert!(parse_citation_file(dir.path(), "CITATION.bib").is_none());
    }

    #[test]
    fn test_find_citation_file_priority() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".zenodo.json"), "{}").unwrap();
        std::fs::write(dir.path().join("CITATION.cff"), "title: X").unwrap();
        assert_eq!(find_citation_file(dir.path()), Some("CITATION.cff"));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(find_citation_file(dir.path()).is_none());
        assert!(parse_citation_file(dir.path(), "CITATION.cff").is_none());
    }
}
