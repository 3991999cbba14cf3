//! Event service: a stateless wrapper over the scanner.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::Event;
use crate::events::{watch, EventScanner, ScanOptions};

pub struct EventService {
    scanner: EventScanner,
}

impl Default for EventService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventService {
    pub fn new() -> Self {
        Self {
            scanner: EventScanner::new(),
        }
    }

    /// Materialize events for the given repositories, newest first.
    pub fn scan(&self, repos: &[PathBuf], options: &ScanOptions) -> Vec<Event> {
        self.scanner.scan_local(repos, options)
    }

    /// Convenience over a computed `since`.
    pub fn get_recent(&self, repos: &[PathBuf], days: i64, types: Vec<String>) -> Vec<Event> {
        self.scan(
            repos,
            &ScanOptions {
                types,
                since: Some(Utc::now() - ChronoDuration::days(days)),
                ..ScanOptions::default()
            },
        )
    }

    /// Long-running form: periodically re-scan, invoking the callback for
    /// events not seen before in this process. Returns when cancelled.
    pub async fn watch<F>(
        &self,
        repos: Vec<PathBuf>,
        options: ScanOptions,
        interval: Duration,
        cancel: CancellationToken,
        on_event: F,
    ) where
        F: FnMut(&Event),
    {
        watch(&self.scanner, repos, options, interval, cancel, on_event).await;
    }
}
