mod citation;
mod cli;
mod config;
mod constants;
mod detect;
mod discovery;
mod domain;
mod error;
mod events;
mod export;
mod git;
mod output;
mod query;
mod refresh;
mod remote;
mod service;
mod store;
mod views;

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Peek at the args before clap runs: tracing must be installed first.
    let args: Vec<String> = std::env::args().collect();
    let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
    let loglevel = args
        .iter()
        .position(|a| a == "-l" || a == "--loglevel")
        .and_then(|pos| args.get(pos + 1))
        .cloned()
        .unwrap_or_else(|| "info".to_string());

    if !is_quiet {
        // IMPORTANT: log to stderr, stdout is reserved for program output
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| format!("repoindex={loglevel}").into()),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // First ctrl-c: graceful shutdown via CancellationToken (the refresh
    // pipeline finishes its in-flight repo and persists). Second: force.
    let cancel_token = CancellationToken::new();
    let cancel_clone = cancel_token.clone();
    ctrlc::set_handler(move || {
        if constants::SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            eprintln!("force shutdown");
            std::process::exit(130);
        }
        eprintln!("shutting down gracefully... (press ctrl-c again to force)");
        constants::SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        cancel_clone.cancel();
    })
    .expect("failed to set ctrl-c handler");

    match cli::run(cancel_token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_usage_error() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
