//! Command-line interface.
//!
//! Thin collaborator layer: parses arguments, invokes the core, renders
//! results. Exit codes: 0 success, 1 store/query runtime errors, 2 user
//! input errors (clap uses 2 for argument errors on its own).

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{RepoIndexError, Result};
use crate::events::ScanOptions;
use crate::export::{run_export, ExportOptions};
use crate::query::{parse_since, QueryCompiler};
use crate::refresh::{run_refresh, RefreshOptions};
use crate::service::EventService;
use crate::store::{EventFilter, Store};
use crate::views::ViewService;
use crate::{info_print, output};

/// Collection-aware metadata index for local git repositories
#[derive(Parser, Debug)]
#[command(name = "repoindex")]
#[command(author, version = env!("CARGO_PKG_VERSION_FULL"), about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub loglevel: String,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan configured roots and sync the index with the filesystem
    Refresh {
        /// Force re-enrichment of every repo (skip the staleness check)
        #[arg(long)]
        full: bool,

        /// How far back to scan for events (e.g. 7d, 30d, 90d)
        #[arg(long)]
        since: Option<String>,

        /// Fetch GitHub metadata and remote events
        #[arg(long)]
        github: bool,

        /// Check PyPI publication state
        #[arg(long)]
        pypi: bool,

        /// Check CRAN publication state
        #[arg(long)]
        cran: bool,

        /// Match repos against the configured ORCID's Zenodo records
        #[arg(long)]
        zenodo: bool,

        /// All external sources (equivalent to --github --pypi --cran --zenodo)
        #[arg(long)]
        external: bool,

        /// Refresh a specific directory instead of the configured roots
        #[arg(short = 'd', long = "dir")]
        directory: Option<PathBuf>,

        /// Show what would be refreshed without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a DSL query against the index
    Query {
        /// Query expression (e.g. "language == 'Python' and stars > 10")
        expr: Option<String>,

        /// Maximum rows to return
        #[arg(short = 'n', long)]
        limit: Option<u32>,

        /// Order by this field (append "desc" for descending)
        #[arg(short = 'o', long)]
        order: Option<String>,

        /// Output JSONL instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Read events from the index
    Events {
        /// Filter by event type (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Events after this time (e.g. 1h, 7d, 2024-01-01)
        #[arg(short = 's', long, default_value = "7d")]
        since: String,

        /// Events before this time
        #[arg(short = 'u', long)]
        until: Option<String>,

        /// Filter by repository name
        #[arg(short = 'r', long)]
        repo: Option<String>,

        /// Maximum events to return (0 for unlimited)
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,

        /// Show summary statistics instead of individual events
        #[arg(long)]
        stats: bool,

        /// Output JSONL (default: table)
        #[arg(long)]
        json: bool,

        /// Re-scan periodically, printing only new events
        #[arg(long)]
        watch: bool,

        /// Seconds between watch-mode rescans
        #[arg(long, default_value = "300")]
        interval: u64,
    },

    /// Export the index in a durable, self-describing layout
    Export {
        /// Output directory
        dir: PathBuf,

        /// Optional query restricting which repos are exported
        expr: Option<String>,

        /// Also export events.jsonl
        #[arg(long)]
        include_events: bool,
    },

    /// Dashboard summarizing the index
    Status,

    /// Database diagnostics and maintenance
    Db {
        /// Show database info
        #[arg(long)]
        info: bool,

        /// Print the database path
        #[arg(long)]
        path: bool,

        /// Delete and recreate the database
        #[arg(long)]
        reset: bool,
    },

    /// Execute raw SQL against a read-only handle
    Sql {
        /// SQL to execute
        query: Option<String>,

        /// Read SQL from a file
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = SqlFormat::Json)]
        format: SqlFormat,

        /// Interactive SQL shell
        #[arg(short = 'i', long)]
        interactive: bool,
    },

    /// List or show named views
    View {
        #[command(subcommand)]
        command: ViewCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ViewCommands {
    /// List configured views
    List,
    /// Resolve a view and print its repositories
    Show {
        name: String,

        /// Output JSONL instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SqlFormat {
    Json,
    Csv,
    Table,
}

/// Parse arguments and dispatch. The caller maps errors onto exit codes.
pub async fn run(cancel: CancellationToken) -> Result<()> {
    let cli = Cli::parse();
    output::set_quiet(cli.quiet);

    let config = Config::load()?;

    match cli.command {
        Commands::Refresh {
            full,
            since,
            github,
            pypi,
            cran,
            zenodo,
            external,
            directory,
            dry_run,
        } => {
            let options = RefreshOptions {
                full,
                since,
                github: github || external,
                pypi: pypi || external,
                cran: cran || external,
                zenodo: zenodo || external,
                dirs: directory
                    .map(|d| vec![d.to_string_lossy().into_owned()])
                    .unwrap_or_default(),
                dry_run,
            };
            let mut store = Store::open(&config.db_path())?;
            let stats = run_refresh(&mut store, &config, &options, cancel).await?;
            println!("{}", serde_json::to_string(&stats).unwrap_or_default());
            Ok(())
        }

        Commands::Query {
            expr,
            limit,
            order,
            json,
        } => {
            let mut expr = expr.unwrap_or_default();
            if let Some(order) = order {
                expr.push_str(&format!(" order by {order}"));
            }
            if let Some(limit) = limit {
                expr.push_str(&format!(" limit {limit}"));
            }

            let views = ViewService::load(&config.views_path())?;
            let compiled = QueryCompiler::with_views(views.predicates()).compile(&expr)?;

            let store = Store::open_read_only(&config.db_path())?;
            let rows = store.query(&compiled)?;
            if json {
                for row in &rows {
                    println!("{}", serde_json::to_string(row).unwrap_or_default());
                }
            } else {
                info_print!("{} repositories", rows.len());
                let slim = slim_repo_rows(&rows);
                output::print_table(&slim);
            }
            Ok(())
        }

        Commands::Events {
            types,
            since,
            until,
            repo,
            limit,
            stats,
            json,
            watch,
            interval,
        } => {
            if watch {
                return watch_events(&config, types, interval, cancel).await;
            }

            let store = Store::open_read_only(&config.db_path())?;
            if stats {
                let days = (chrono::Utc::now() - parse_since(&since)).num_days().max(1);
                let summary = store.event_summary(days)?;
                println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
                return Ok(());
            }

            let filter = EventFilter {
                repo,
                kinds: types,
                since: Some(parse_since(&since)),
                until: until.as_deref().map(parse_since),
                limit: if limit == 0 { None } else { Some(limit) },
            };
            let events = store.get_events(&filter)?;
            if json {
                for event in &events {
                    println!("{}", event.to_jsonl());
                }
            } else {
                info_print!("{} events", events.len());
                let rows: Vec<serde_json::Map<String, serde_json::Value>> = events
                    .iter()
                    .map(|e| {
                        let mut row = serde_json::Map::new();
                        row.insert("timestamp".into(), e.timestamp.to_rfc3339().into());
                        row.insert("type".into(), e.kind.clone().into());
                        row.insert("repo".into(), e.repo_name.clone().into());
                        row.insert(
                            "detail".into(),
                            e.reference()
                                .or_else(|| e.message())
                                .unwrap_or_default()
                                .into(),
                        );
                        row
                    })
                    .collect();
                output::print_table(&rows);
            }
            Ok(())
        }

        Commands::Export {
            dir,
            expr,
            include_events,
        } => {
            let store = Store::open_read_only(&config.db_path())?;
            let result = run_export(
                &store,
                &ExportOptions {
                    output_dir: dir,
                    query: expr,
                    include_events,
                    views_path: Some(config.views_path()),
                },
            )?;
            println!("{}", serde_json::to_string(&result).unwrap_or_default());
            Ok(())
        }

        Commands::Status => show_status(&config),

        Commands::Db { info, path, reset } => {
            let db_path = config.db_path();
            if path {
                println!("{}", db_path.display());
                return Ok(());
            }
            if reset {
                Store::reset(&db_path)?;
                info_print!("database reset: {}", db_path.display());
                return Ok(());
            }
            let _ = info; // default action
            let db_info = Store::database_info(&db_path)?;
            println!("{}", serde_json::to_string_pretty(&db_info).unwrap_or_default());
            Ok(())
        }

        Commands::Sql {
            query,
            file,
            format,
            interactive,
        } => {
            let store = Store::open_read_only(&config.db_path())?;
            if interactive {
                return sql_shell(&store);
            }

            let sql = match (query, file) {
                (Some(query), _) => query,
                (None, Some(file)) => std::fs::read_to_string(&file)
                    .map_err(|e| RepoIndexError::io(&file, e))?,
                (None, None) => {
                    return Err(RepoIndexError::validation(
                        "query required (or use -i for interactive mode)",
                    ))
                }
            };
            let rows = store.fetch(&sql)?;
            print_sql_rows(&rows, format);
            Ok(())
        }

        Commands::View { command } => {
            let views = ViewService::load(&config.views_path())?;
            match command {
                ViewCommands::List => {
                    for name in views.names() {
                        let description = views
                            .get(name)
                            .and_then(|v| v.description.as_deref())
                            .unwrap_or("");
                        println!("{name}\t{description}");
                    }
                    Ok(())
                }
                ViewCommands::Show { name, json } => {
                    let store = Store::open_read_only(&config.db_path())?;
                    let rows = views.resolve(&name, &store)?;
                    if json {
                        for row in &rows {
                            println!("{}", serde_json::to_string(row).unwrap_or_default());
                        }
                    } else {
                        info_print!("{}: {} repositories", name, rows.len());
                        let slim = slim_repo_rows(&rows);
                        output::print_table(&slim);
                    }
                    Ok(())
                }
            }
        }
    }
}

/// Narrow full repo rows to the columns worth showing in a table.
fn slim_repo_rows(
    rows: &[serde_json::Map<String, serde_json::Value>],
) -> Vec<serde_json::Map<String, serde_json::Value>> {
    const COLUMNS: &[&str] = &["name", "language", "branch", "github_stars", "path"];
    rows.iter()
        .map(|row| {
            let mut slim = serde_json::Map::new();
            for column in COLUMNS {
                if let Some(value) = row.get(*column) {
                    slim.insert((*column).to_string(), value.clone());
                }
            }
            slim
        })
        .collect()
}

fn print_sql_rows(rows: &[serde_json::Map<String, serde_json::Value>], format: SqlFormat) {
    match format {
        SqlFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(rows).unwrap_or_default()
            );
        }
        SqlFormat::Csv => output::print_csv(rows),
        SqlFormat::Table => output::print_table(rows),
    }
}

/// Watch mode: scan the configured roots directly (stateless), printing
/// each previously unseen event as JSONL.
async fn watch_events(
    config: &Config,
    types: Vec<String>,
    interval: u64,
    cancel: CancellationToken,
) -> Result<()> {
    let service = crate::service::RepositoryService::new(config.clone());
    let repos: Vec<PathBuf> = service
        .discover(None, true)
        .into_iter()
        .map(|r| PathBuf::from(r.path))
        .collect();
    if repos.is_empty() {
        return Err(RepoIndexError::config(
            "no repositories found under the configured roots",
        ));
    }
    info_print!(
        "watching {} repositories every {}s (ctrl-c to stop)",
        repos.len(),
        interval
    );

    let events = EventService::new();
    events
        .watch(
            repos,
            ScanOptions {
                types,
                ..ScanOptions::default()
            },
            Duration::from_secs(interval),
            cancel,
            |event| println!("{}", event.to_jsonl()),
        )
        .await;
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let db_path = config.db_path();
    let store = Store::open_read_only(&db_path)?;

    let count = |sql: &str| -> Result<i64> {
        Ok(store
            .conn()
            .query_row(sql, [], |row| row.get(0))?)
    };

    let total = store.repo_count()?;
    let active = count("SELECT COUNT(*) FROM v_active_repos")?;
    let stale = count("SELECT COUNT(*) FROM v_stale_repos")?;
    let dirty = count("SELECT COUNT(*) FROM repos WHERE uncommitted_changes = 1")?;
    let with_doi = count(
        "SELECT COUNT(*) FROM repos r WHERE
           (r.citation_doi IS NOT NULL AND r.citation_doi != '')
           OR EXISTS (SELECT 1 FROM publications p
                      WHERE p.repo_id = r.id AND p.doi IS NOT NULL AND p.doi != '')",
    )?;
    let errors = count("SELECT COUNT(*) FROM scan_errors")?;
    let summary = store.event_summary(7)?;

    let languages = store.fetch(
        "SELECT language, COUNT(*) as repos FROM repos
         WHERE language IS NOT NULL GROUP BY language
         ORDER BY repos DESC LIMIT 5",
    )?;

    let status = serde_json::json!({
        "database": db_path.display().to_string(),
        "repos": {
            "total": total,
            "active": active,
            "stale": stale,
            "dirty": dirty,
            "with_doi": with_doi,
        },
        "events_7d": summary.total_events,
        "scan_errors": errors,
        "top_languages": languages,
    });
    println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
    Ok(())
}

/// Minimal interactive SQL shell over the read-only handle.
fn sql_shell(store: &Store) -> Result<()> {
    eprintln!("Connected to: {}", store.path().display());
    eprintln!("Type SQL, or '.tables', '.schema', '.quit'.");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        eprint!("sql> ");
        let _ = stdout.flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            ".quit" | ".exit" | "quit" | "exit" => break,
            ".tables" => {
                let rows = store.fetch(
                    "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                )?;
                for row in rows {
                    if let Some(name) = row.get("name").and_then(|v| v.as_str()) {
                        println!("{name}");
                    }
                }
            }
            ".schema" => {
                let rows = store
                    .fetch("SELECT sql FROM sqlite_master WHERE type='table' ORDER BY name")?;
                for row in rows {
                    if let Some(sql) = row.get("sql").and_then(|v| v.as_str()) {
                        println!("{sql}\n");
                    }
                }
            }
            sql => match store.fetch(sql) {
                Ok(rows) => output::print_table(&rows),
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_refresh_flags_parse() {
        let cli = Cli::parse_from(["repoindex", "refresh", "--full", "--github", "--since", "30d"]);
        match cli.command {
            Commands::Refresh {
                full,
                github,
                since,
                pypi,
                ..
            } => {
                assert!(full);
                assert!(github);
                assert!(!pypi);
                assert_eq!(since.as_deref(), Some("30d"));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_query_expression_parses() {
        let cli = Cli::parse_from([
            "repoindex",
            "query",
            "language == 'Python'",
            "--limit",
            "5",
            "--order",
            "stars desc",
        ]);
        match cli.command {
            Commands::Query {
                expr,
                limit,
                order,
                ..
            } => {
                assert_eq!(expr.as_deref(), Some("language == 'Python'"));
                assert_eq!(limit, Some(5));
                assert_eq!(order.as_deref(), Some("stars desc"));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_events_type_flag_repeats() {
        let cli = Cli::parse_from([
            "repoindex", "events", "-t", "commit", "-t", "git_tag", "--since", "24h",
        ]);
        match cli.command {
            Commands::Events { types, since, .. } => {
                assert_eq!(types, vec!["commit", "git_tag"]);
                assert_eq!(since, "24h");
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_slim_rows_keep_known_columns() {
        let mut row = serde_json::Map::new();
        row.insert("name".into(), "x".into());
        row.insert("readme_content".into(), "enormous".into());
        let slim = slim_repo_rows(&[row]);
        assert!(slim[0].contains_key("name"));
        assert!(!slim[0].contains_key("readme_content"));
    }
}
