//! The refresh pipeline.
//!
//! discovery → staleness check → per-repo enrichment → upsert → event
//! insert → cleanup of missing repos. Enrichment runs on a bounded worker
//! pool; all store writes happen on the coordinating task so a single
//! writer holds the database lock. Any per-repo failure lands in
//! `scan_errors` and the stats; it never aborts the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::MAX_REFRESH_WORKERS;
use crate::discovery::{discover_repos, DiscoveryOptions};
use crate::domain::{DependencyInfo, Event, PublicationInfo, Repository, TagSource};
use crate::error::{RepoIndexError, Result};
use crate::events::{registry_publish_events, scan_github_events, EventScanner, ScanOptions};
use crate::git::{parse_owner_repo, GitClient};
use crate::query::parse_since;
use crate::remote::{CranClient, GitHubClient, PyPiClient, ZenodoClient, ZenodoRecord};
use crate::service::repository::enrich_local;
use crate::store::Store;

/// What a refresh should fetch beyond the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Ignore the staleness check and re-enrich everything
    pub full: bool,
    /// Event scan window (duration spec, e.g. "90d")
    pub since: Option<String>,
    pub github: bool,
    pub pypi: bool,
    pub cran: bool,
    pub zenodo: bool,
    /// Explicit roots, overriding the configured ones
    pub dirs: Vec<String>,
    pub dry_run: bool,
}

/// Refresh statistics. `scanned = updated + skipped + errors`; removed
/// counts separately.
#[derive(Debug, Default, Serialize)]
pub struct RefreshStats {
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
    pub events_added: usize,
    pub removed: usize,
    pub errors: usize,
    pub total_repos: i64,
    pub start_time: String,
    pub end_time: String,
}

/// Everything gathered for one repository, ready to persist.
struct Enriched {
    repository: Repository,
    local_events: Vec<Event>,
    remote_events: Vec<Event>,
    publications: Vec<PublicationInfo>,
    dependencies: Vec<DependencyInfo>,
    implicit_tags: Vec<String>,
    github_tags: Vec<String>,
    /// (stars, forks, open_issues) when hosted metadata was fetched
    snapshot: Option<(i64, i64, i64)>,
}

enum Outcome {
    Done(Box<Enriched>),
    Failed { path: String, message: String },
    Cancelled,
}

struct RemoteClients {
    github: Option<GitHubClient>,
    pypi: Option<PyPiClient>,
    cran: Option<CranClient>,
}

/// Run a refresh over the configured (or given) roots.
pub async fn run_refresh(
    store: &mut Store,
    config: &Config,
    options: &RefreshOptions,
    cancel: CancellationToken,
) -> Result<RefreshStats> {
    let mut stats = RefreshStats {
        start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ..RefreshStats::default()
    };

    let roots = if options.dirs.is_empty() {
        config.repository_directories.clone()
    } else {
        options.dirs.clone()
    };
    if roots.is_empty() {
        return Err(RepoIndexError::config(
            "no repository directories configured (use --dir or set repository_directories)",
        ));
    }

    let candidates = discover_repos(
        &roots,
        &DiscoveryOptions {
            recursive: true,
            excludes: config.exclude_directories.clone(),
        },
    );
    info!(candidates = candidates.len(), "discovered working copies");

    let since = parse_since(
        options
            .since
            .as_deref()
            .unwrap_or(crate::constants::DEFAULT_EVENT_WINDOW),
    );

    // One Zenodo query serves every repository in this refresh.
    let zenodo_records: Arc<Vec<ZenodoRecord>> = Arc::new(if options.zenodo {
        match config.zenodo.orcid.as_deref() {
            Some(orcid) => match ZenodoClient::new() {
                Ok(client) => client.search_by_orcid(orcid).await.unwrap_or_else(|e| {
                    warn!(error = %e, "Zenodo enrichment unavailable");
                    Vec::new()
                }),
                Err(e) => {
                    warn!(error = %e, "Zenodo client unavailable");
                    Vec::new()
                }
            },
            None => {
                warn!("--zenodo requested but no zenodo.orcid configured");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    });

    let clients = Arc::new(RemoteClients {
        github: if options.github {
            Some(GitHubClient::new(config.github_token())?)
        } else {
            None
        },
        pypi: if options.pypi {
            Some(PyPiClient::new()?)
        } else {
            None
        },
        cran: if options.cran {
            Some(CranClient::new()?)
        } else {
            None
        },
    });

    let workers = MAX_REFRESH_WORKERS.min(num_cpus::get().max(1));
    let semaphore = Arc::new(Semaphore::new(workers));
    let scan_options = Arc::new(ScanOptions {
        since: Some(since),
        ..ScanOptions::default()
    });
    let config = Arc::new(config.clone());

    let mut join_set: JoinSet<Outcome> = JoinSet::new();

    for candidate in candidates {
        if cancel.is_cancelled() {
            break;
        }

        let path_str = candidate.to_string_lossy().into_owned();
        let mtime = GitClient::index_mtime(&candidate);

        // Staleness check: unchanged .git/index means nothing to redo.
        if !options.full && !store.needs_refresh(&path_str, mtime)? {
            stats.scanned += 1;
            stats.skipped += 1;
            continue;
        }

        if options.dry_run {
            crate::info_print!("would refresh: {path_str}");
            stats.scanned += 1;
            stats.updated += 1;
            continue;
        }

        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let clients = Arc::clone(&clients);
        let zenodo_records = Arc::clone(&zenodo_records);
        let scan_options = Arc::clone(&scan_options);
        let config = Arc::clone(&config);

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Outcome::Cancelled,
            };
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            match enrich(
                candidate.clone(),
                &config,
                &clients,
                &zenodo_records,
                &scan_options,
            )
            .await
            {
                Ok(enriched) => Outcome::Done(Box::new(enriched)),
                Err(e) => Outcome::Failed {
                    path: candidate.to_string_lossy().into_owned(),
                    message: e.to_string(),
                },
            }
        });
    }

    // All writes happen here, one transaction batch per repository.
    while let Some(joined) = join_set.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "enrichment task panicked");
                continue;
            }
        };

        match outcome {
            Outcome::Cancelled => {}
            Outcome::Failed { path, message } => {
                stats.scanned += 1;
                stats.errors += 1;
                warn!(%path, %message, "repository refresh failed");
                store.record_scan_error(&path, &message)?;
            }
            Outcome::Done(enriched) => {
                stats.scanned += 1;
                match persist(store, &enriched) {
                    Ok(events_added) => {
                        stats.updated += 1;
                        stats.events_added += events_added;
                        crate::info_print!("refreshed: {}", enriched.repository.name);
                    }
                    Err(e) => {
                        stats.errors += 1;
                        store
                            .record_scan_error(&enriched.repository.path, &e.to_string())?;
                    }
                }
            }
        }
    }

    // Remove rows for repositories no longer on disk, after all upserts.
    // A cancelled run keeps partial progress and defers removal.
    if !options.dry_run && !cancel.is_cancelled() {
        stats.removed = store.cleanup_missing_repos()?;
    }

    stats.total_repos = store.repo_count()?;
    stats.end_time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    Ok(stats)
}

fn persist(store: &mut Store, enriched: &Enriched) -> Result<usize> {
    let repo_id = store.upsert_repo(&enriched.repository)?;

    store.sync_tags(repo_id, &enriched.repository.tags, TagSource::User)?;
    store.sync_tags(repo_id, &enriched.implicit_tags, TagSource::Implicit)?;
    store.sync_tags(repo_id, &enriched.github_tags, TagSource::Github)?;

    let mut events_added = store.insert_events(repo_id, &enriched.local_events)?;
    events_added += store.insert_events(repo_id, &enriched.remote_events)?;

    for publication in &enriched.publications {
        store.upsert_publication(repo_id, publication)?;
    }
    if !enriched.dependencies.is_empty() {
        store.replace_dependencies(repo_id, &enriched.dependencies)?;
    }
    if let Some((stars, forks, open_issues)) = enriched.snapshot {
        store.record_snapshot(repo_id, stars, forks, open_issues)?;
    }

    Ok(events_added)
}

/// Gather everything about one repository: local state, local events, and
/// any opted-in remote metadata.
async fn enrich(
    path: PathBuf,
    config: &Config,
    clients: &RemoteClients,
    zenodo_records: &[ZenodoRecord],
    scan_options: &ScanOptions,
) -> Result<Enriched> {
    // Local filesystem and git work is blocking; keep it off the runtime.
    let local_path = path.clone();
    let local_scan = scan_options.clone();
    let (mut repository, local_events) = tokio::task::spawn_blocking(move || {
        let repository = enrich_local(&local_path);
        let events = EventScanner::new().scan_local(std::slice::from_ref(&local_path), &local_scan);
        (repository, events)
    })
    .await
    .map_err(|e| RepoIndexError::git(&path, format!("enrichment task panicked: {e}")))?;

    repository.tags = config.tags_for(&repository.path);

    let mut implicit_tags = Vec::new();
    if let Some(ref language) = repository.language {
        implicit_tags.push(format!("lang:{}", language.to_lowercase()));
    }

    let mut remote_events = Vec::new();
    let mut publications = Vec::new();
    let mut dependencies = Vec::new();
    let mut github_tags = Vec::new();
    let mut snapshot = None;

    let owner_repo = repository
        .remote_url
        .as_deref()
        .and_then(parse_owner_repo);

    if let (Some(github), Some((owner, name))) = (clients.github.as_ref(), owner_repo.as_ref()) {
        match github.get_repo(owner, name).await? {
            Some(metadata) => {
                snapshot = Some((metadata.stars, metadata.forks, metadata.open_issues));
                github_tags = metadata
                    .topics
                    .iter()
                    .map(|t| format!("topic:{t}"))
                    .collect();
                repository.github = Some(metadata);

                let remote_scan = ScanOptions {
                    types: crate::events::GITHUB_EVENT_TYPES
                        .iter()
                        .map(|t| t.to_string())
                        .collect(),
                    ..scan_options.clone()
                };
                remote_events.extend(
                    scan_github_events(
                        github,
                        owner,
                        name,
                        &repository.name,
                        &repository.path,
                        &remote_scan,
                    )
                    .await?,
                );
            }
            None => debug!(%owner, %name, "repository not found on GitHub"),
        }
    }

    if let Some(pypi) = clients.pypi.as_ref() {
        if let Some(package) = crate::remote::registry::detect_pypi_package(&path) {
            dependencies.extend(crate::remote::registry::detect_python_dependencies(&path));
            match pypi.fetch(&package).await? {
                Some(found) => {
                    let publish_scan = ScanOptions {
                        types: vec!["pypi_publish".to_string()],
                        ..scan_options.clone()
                    };
                    remote_events.extend(registry_publish_events(
                        "pypi_publish",
                        &found,
                        &repository.name,
                        &repository.path,
                        &publish_scan,
                    ));
                    publications.push(found.publication);
                }
                None => publications.push(unpublished("pypi", &package)),
            }
        }
    }

    if let Some(cran) = clients.cran.as_ref() {
        if let Some(package) = crate::remote::registry::detect_cran_package(&path) {
            match cran.fetch(&package).await? {
                Some(found) => {
                    let publish_scan = ScanOptions {
                        types: vec!["cran_publish".to_string()],
                        ..scan_options.clone()
                    };
                    remote_events.extend(registry_publish_events(
                        "cran_publish",
                        &found,
                        &repository.name,
                        &repository.path,
                        &publish_scan,
                    ));
                    publications.push(found.publication);
                }
                None => publications.push(unpublished("cran", &package)),
            }
        }
    }

    if !zenodo_records.is_empty() {
        if let Some(record) = match_zenodo_record(&repository, zenodo_records) {
            publications.push(PublicationInfo {
                registry: "zenodo".to_string(),
                package_name: repository.name.clone(),
                current_version: record.version.clone(),
                published: true,
                url: Some(record.url.clone()),
                doi: Some(record.preferred_doi().to_string()),
                downloads_total: None,
                downloads_30d: None,
                last_published: None,
            });
        }
    }

    Ok(Enriched {
        repository,
        local_events,
        remote_events,
        publications,
        dependencies,
        implicit_tags,
        github_tags,
        snapshot,
    })
}

fn unpublished(registry: &str, package: &str) -> PublicationInfo {
    PublicationInfo {
        registry: registry.to_string(),
        package_name: package.to_string(),
        published: false,
        ..PublicationInfo::default()
    }
}

/// Match a repository to one of the author's Zenodo records: first by
/// normalized GitHub URL, then by exact lowercased title.
fn match_zenodo_record<'a>(
    repository: &Repository,
    records: &'a [ZenodoRecord],
) -> Option<&'a ZenodoRecord> {
    if let Some(ref remote_url) = repository.remote_url {
        let normalized = crate::git::normalize_github_url(remote_url);
        if let Some(record) = records
            .iter()
            .find(|r| r.github_url.as_deref() == Some(normalized.as_str()))
        {
            return Some(record);
        }
    }

    let name = repository.name.to_lowercase();
    records.iter().find(|r| r.title.to_lowercase() == name)
}
