//! Zenodo (DOI registry) client.
//!
//! Batch-fetch strategy: one ORCID search returns all the author's
//! records, so a refresh makes a single query regardless of how many
//! local repositories there are. Records carry the concept DOI
//! (version-independent) and any linked GitHub URL for matching.

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{RepoIndexError, Result};
use crate::git::normalize_github_url;

use super::{get_with_retry, http_client};

const API_BASE: &str = "https://zenodo.org/api/records";
const PAGE_SIZE: usize = 25;

/// A Zenodo deposit record.
#[derive(Debug, Clone)]
pub struct ZenodoRecord {
    pub doi: String,
    /// Version-independent DOI; always resolves to the latest version
    pub concept_doi: Option<String>,
    pub title: String,
    pub version: Option<String>,
    pub url: String,
    /// Normalized GitHub URL from related_identifiers, for repo matching
    pub github_url: Option<String>,
}

impl ZenodoRecord {
    /// Prefer the concept DOI over the per-version DOI.
    pub fn preferred_doi(&self) -> &str {
        self.concept_doi.as_deref().unwrap_or(&self.doi)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
    #[serde(default)]
    total: TotalField,
}

/// Zenodo has served both `"total": 7` and `"total": {"value": 7}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalField {
    Count(i64),
    Object { value: i64 },
}

impl Default for TotalField {
    fn default() -> Self {
        TotalField::Count(0)
    }
}

impl TotalField {
    fn value(&self) -> i64 {
        match self {
            TotalField::Count(n) => *n,
            TotalField::Object { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    id: Option<i64>,
    doi: Option<String>,
    conceptdoi: Option<String>,
    #[serde(default)]
    metadata: HitMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct HitMetadata {
    #[serde(default)]
    title: String,
    version: Option<String>,
    #[serde(default)]
    related_identifiers: Vec<RelatedIdentifier>,
}

#[derive(Debug, Deserialize)]
struct RelatedIdentifier {
    #[serde(default)]
    identifier: String,
}

/// Client for the Zenodo public REST API. Open-access records need no
/// authentication.
pub struct ZenodoClient {
    client: reqwest::Client,
}

impl ZenodoClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    /// All records for an ORCID author, paginated.
    pub async fn search_by_orcid(&self, orcid: &str) -> Result<Vec<ZenodoRecord>> {
        let mut records = Vec::new();
        let mut page = 1usize;

        loop {
            let response = get_with_retry(|| {
                self.client.get(API_BASE).query(&[
                    ("q", format!("creators.orcid:{orcid}")),
                    ("size", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                    ("sort", "-mostrecent".to_string()),
                ])
            })
            .await?;

            if !response.status().is_success() {
                return Err(RepoIndexError::remote(format!(
                    "Zenodo returned {} for ORCID {orcid}",
                    response.status()
                )));
            }

            let parsed: SearchResponse = response.json().await.map_err(|e| {
                RepoIndexError::remote(format!("Zenodo response parse error: {e}"))
            })?;

            let total = parsed.hits.total.value();
            let hits = parsed.hits.hits;
            if hits.is_empty() {
                break;
            }

            for hit in hits {
                match record_from_hit(hit) {
                    Some(record) => records.push(record),
                    None => warn!("skipping Zenodo record without a DOI"),
                }
            }

            if (page * PAGE_SIZE) as i64 >= total {
                break;
            }
            page += 1;
        }

        info!(count = records.len(), orcid, "fetched Zenodo records");
        Ok(records)
    }
}

fn record_from_hit(hit: Hit) -> Option<ZenodoRecord> {
    let doi = hit.doi?;
    let github_url = hit
        .metadata
        .related_identifiers
        .iter()
        .find(|rel| rel.identifier.contains("github.com"))
        .map(|rel| normalize_github_url(&rel.identifier));
    let url = hit
        .id
        .map(|id| format!("https://zenodo.org/records/{id}"))
        .unwrap_or_default();

    Some(ZenodoRecord {
        doi,
        concept_doi: hit.conceptdoi,
        title: hit.metadata.title,
        version: hit.metadata.version,
        url,
        github_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_hit() {
        let hit: Hit = serde_json::from_str(
            r#"{
                "id": 18345659,
                "doi": "10.5281/zenodo.18345659",
                "conceptdoi": "10.5281/zenodo.18345658",
                "metadata": {
                    "title": "My Tool",
                    "version": "1.2.0",
                    "related_identifiers": [
                        {"identifier": "https://github.com/Alice/my-tool/tree/v1.2.0",
                         "relation": "isSupplementTo", "scheme": "url"}
                    ]
                }
            }"#,
        )
        .unwrap();

        let record = record_from_hit(hit).unwrap();
        assert_eq!(record.doi, "10.5281/zenodo.18345659");
        assert_eq!(record.preferred_doi(), "10.5281/zenodo.18345658");
        assert_eq!(
            record.github_url.as_deref(),
            Some("https://github.com/alice/my-tool")
        );
        assert_eq!(record.url, "https://zenodo.org/records/18345659");
    }

    #[test]
    fn test_record_without_doi_is_skipped() {
        let hit: Hit = serde_json::from_str(r#"{"id": 1, "metadata": {"title": "x"}}"#).unwrap();
        assert!(record_from_hit(hit).is_none());
    }

    #[test]
    fn test_preferred_doi_falls_back_to_version_doi() {
        let record = ZenodoRecord {
            doi: "10.5281/zenodo.1".into(),
            concept_doi: None,
            title: String::new(),
            version: None,
            url: String::new(),
            github_url: None,
        };
        assert_eq!(record.preferred_doi(), "10.5281/zenodo.1");
    }

    #[test]
    fn test_total_field_both_shapes() {
        let a: TotalField = serde_json::from_str("7").unwrap();
        assert_eq!(a.value(), 7);
        let b: TotalField = serde_json::from_str(r#"{"value": 9}"#).unwrap();
        assert_eq!(b.value(), 9);
    }
}
