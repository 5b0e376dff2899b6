//! Polling watcher for a fabric's raw intake directories.
//!
//! Every scan interval the watcher lists manifests directly under `raw/`
//! and `raw/pending/`, drops files that may still be written (younger than
//! the debounce delay) or that are stale orphans (older than the maximum
//! age), and hands the rest to a [`RawIngestor`]. A tick takes the fabric's
//! lock without waiting; a busy fabric makes the tick a no-op.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::error::{GitOpsError, Result};
use super::layout::{is_manifest_file, DirectoryLayout};
use super::orchestrator::FabricLocks;
use crate::config::WatcherConfig;
use crate::ingest::{IngestError, IngestionResult};

/// Consecutive failed ticks after which a watcher reports unhealthy.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Feeds watcher-selected files into ingestion.
///
/// Called with the fabric's lock already held.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RawIngestor: Send + Sync {
    async fn ingest_files(
        &self,
        fabric_id: i64,
        files: Vec<PathBuf>,
    ) -> std::result::Result<IngestionResult, IngestError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStats {
    pub scans: u64,
    pub busy_ticks: u64,
    pub files_ingested: u64,
    pub files_failed: u64,
    pub skipped_debounce: u64,
    pub skipped_stale: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub fabric_id: i64,
    pub is_watching: bool,
    pub scan_interval_secs: u64,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub stats: WatcherStats,
    pub healthy: bool,
    pub health_issues: Vec<String>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another sync or ingestion held the fabric.
    Busy,
    /// No eligible files.
    Idle,
    /// Files were handed to ingestion.
    Ingested { files: usize },
    Failed,
}

#[derive(Debug, Default)]
struct WatcherState {
    last_scan: Option<DateTime<Utc>>,
    stats: WatcherStats,
    consecutive_errors: u32,
    last_error: Option<String>,
}

/// The part of a watcher that runs inside the background task.
#[derive(Clone)]
struct Scanner {
    fabric_id: i64,
    dirs: [PathBuf; 2],
    debounce_delay: Duration,
    max_file_age: Duration,
    ingestor: Arc<dyn RawIngestor>,
    locks: FabricLocks,
    state: Arc<StdMutex<WatcherState>>,
}

impl Scanner {
    fn with_state<T>(&self, f: impl FnOnce(&mut WatcherState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Lists eligible files, counting the ones filtered out.
    fn eligible_files(&self, now: SystemTime) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let (mut debounced, mut stale) = (0u64, 0u64);

        for dir in &self.dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Cannot list {}: {}", dir.display(), e);
                    continue;
                }
            };
            let mut found: Vec<PathBuf> = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if !metadata.is_file() || !is_manifest_file(&path.to_string_lossy()) {
                    continue;
                }
                let age = metadata
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                if age < self.debounce_delay {
                    debounced += 1;
                } else if age > self.max_file_age {
                    stale += 1;
                } else {
                    found.push(path);
                }
            }
            found.sort();
            files.extend(found);
        }

        self.with_state(|s| {
            s.stats.skipped_debounce += debounced;
            s.stats.skipped_stale += stale;
        });
        files
    }

    async fn tick(&self) -> TickOutcome {
        let Some(_guard) = self.locks.try_acquire(self.fabric_id) else {
            debug!(fabric_id = self.fabric_id, "Watcher tick skipped: fabric busy");
            self.with_state(|s| s.stats.busy_ticks += 1);
            return TickOutcome::Busy;
        };

        let files = self.eligible_files(SystemTime::now());
        self.with_state(|s| {
            s.stats.scans += 1;
            s.last_scan = Some(Utc::now());
        });
        if files.is_empty() {
            return TickOutcome::Idle;
        }

        let count = files.len();
        info!(fabric_id = self.fabric_id, files = count, "Ingesting raw files");
        match self.ingestor.ingest_files(self.fabric_id, files).await {
            Ok(result) => {
                let failed = result.files.iter().filter(|f| !f.succeeded()).count() as u64;
                self.with_state(|s| {
                    s.stats.files_ingested += result.files.len() as u64 - failed;
                    s.stats.files_failed += failed;
                    s.consecutive_errors = 0;
                    s.last_error = None;
                });
                TickOutcome::Ingested { files: count }
            }
            Err(e) => {
                error!(fabric_id = self.fabric_id, "Raw ingestion failed: {}", e);
                self.with_state(|s| {
                    s.stats.errors += 1;
                    s.consecutive_errors += 1;
                    s.last_error = Some(e.to_string());
                });
                TickOutcome::Failed
            }
        }
    }

    async fn run(self, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *stop_rx.borrow() {
                break;
            }
            let span = info_span!("watcher_tick", fabric_id = self.fabric_id);
            self.tick().instrument(span).await;
        }
        debug!(fabric_id = self.fabric_id, "Watcher loop exited");
    }
}

/// Watches one fabric's raw intake directories.
pub struct RawDirectoryWatcher {
    scanner: Scanner,
    scan_interval: Duration,
    stop_timeout: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl RawDirectoryWatcher {
    pub fn new(
        fabric_id: i64,
        layout: &DirectoryLayout,
        config: &WatcherConfig,
        ingestor: Arc<dyn RawIngestor>,
        locks: FabricLocks,
    ) -> Self {
        Self {
            scanner: Scanner {
                fabric_id,
                dirs: [layout.raw_dir(), layout.pending_dir()],
                debounce_delay: config.debounce_delay(),
                max_file_age: config.max_file_age(),
                ingestor,
                locks,
                state: Arc::new(StdMutex::new(WatcherState::default())),
            },
            scan_interval: config.scan_interval(),
            stop_timeout: config.stop_timeout(),
            running: None,
        }
    }

    pub fn fabric_id(&self) -> i64 {
        self.scanner.fabric_id
    }

    pub fn raw_dir(&self) -> &Path {
        &self.scanner.dirs[0]
    }

    pub fn is_watching(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Starts the polling loop on the current tokio runtime.
    pub fn start(&mut self, scan_interval: Option<Duration>) -> Result<()> {
        if self.is_watching() {
            return Err(GitOpsError::AlreadyExists(format!(
                "watcher for fabric {}",
                self.fabric_id()
            )));
        }
        let interval = scan_interval.unwrap_or(self.scan_interval);
        if interval.is_zero() {
            return Err(GitOpsError::Configuration(
                "scan interval must be greater than zero".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            GitOpsError::Configuration(format!("watcher needs a tokio runtime: {}", e))
        })?;

        self.scan_interval = interval;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = runtime.spawn(self.scanner.clone().run(interval, stop_rx));
        self.running = Some((stop_tx, handle));
        info!(
            fabric_id = self.fabric_id(),
            interval_secs = interval.as_secs(),
            "Raw directory watcher started"
        );
        Ok(())
    }

    /// Stops the loop, waiting at most the stop timeout.
    ///
    /// Returns false when the loop had to be aborted.
    pub async fn stop(&mut self) -> Result<bool> {
        let Some((stop_tx, mut handle)) = self.running.take() else {
            return Ok(true);
        };
        // Receiver may already be gone if the loop exited.
        let _ = stop_tx.send(true);

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(_) => {
                info!(fabric_id = self.fabric_id(), "Raw directory watcher stopped");
                Ok(true)
            }
            Err(_) => {
                handle.abort();
                warn!(
                    fabric_id = self.fabric_id(),
                    timeout_secs = self.stop_timeout.as_secs(),
                    "Raw directory watcher did not stop gracefully; task aborted"
                );
                Ok(false)
            }
        }
    }

    /// Runs one scan now, outside the polling loop.
    pub async fn scan_now(&self) -> TickOutcome {
        self.scanner.tick().await
    }

    pub fn status(&self) -> WatcherStatus {
        let is_watching = self.is_watching();
        let interval = self.scan_interval;
        self.scanner.with_state(|s| {
            let mut issues = Vec::new();
            if s.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                issues.push(format!(
                    "{} consecutive ingestion failures, last: {}",
                    s.consecutive_errors,
                    s.last_error.as_deref().unwrap_or("unknown")
                ));
            }
            if is_watching {
                if let Some(last) = s.last_scan {
                    let overdue = chrono::Duration::seconds(interval.as_secs().max(1) as i64 * 3);
                    if Utc::now() - last > overdue {
                        issues.push(format!("no scan since {}", last.to_rfc3339()));
                    }
                }
            }
            WatcherStatus {
                fabric_id: self.scanner.fabric_id,
                is_watching,
                scan_interval_secs: interval.as_secs(),
                last_scan_time: s.last_scan,
                stats: s.stats.clone(),
                healthy: issues.is_empty(),
                health_issues: issues,
            }
        })
    }
}

/// One watcher per fabric.
pub struct WatcherManager {
    watchers: StdMutex<HashMap<i64, RawDirectoryWatcher>>,
    config: WatcherConfig,
    ingestor: Arc<dyn RawIngestor>,
    locks: FabricLocks,
}

impl WatcherManager {
    pub fn new(config: WatcherConfig, ingestor: Arc<dyn RawIngestor>, locks: FabricLocks) -> Self {
        Self {
            watchers: StdMutex::new(HashMap::new()),
            config,
            ingestor,
            locks,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<i64, RawDirectoryWatcher>> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts watching a fabric. Fails if it is already watched.
    pub fn start_watching(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
        scan_interval: Option<Duration>,
    ) -> Result<()> {
        let mut watchers = self.registry();
        if watchers.get(&fabric_id).is_some_and(|w| w.is_watching()) {
            return Err(GitOpsError::AlreadyExists(format!(
                "watcher for fabric {}",
                fabric_id
            )));
        }
        let mut watcher = RawDirectoryWatcher::new(
            fabric_id,
            layout,
            &self.config,
            Arc::clone(&self.ingestor),
            self.locks.clone(),
        );
        watcher.start(scan_interval)?;
        watchers.insert(fabric_id, watcher);
        Ok(())
    }

    /// Stops and removes a fabric's watcher. Returns whether it stopped gracefully.
    pub async fn stop_watching(&self, fabric_id: i64) -> Result<bool> {
        let watcher = self.registry().remove(&fabric_id);
        match watcher {
            Some(mut watcher) => watcher.stop().await,
            None => Err(GitOpsError::NotFound(format!(
                "no watcher for fabric {}",
                fabric_id
            ))),
        }
    }

    pub async fn stop_all(&self) {
        let watchers: Vec<RawDirectoryWatcher> = self.registry().drain().map(|(_, w)| w).collect();
        for mut watcher in watchers {
            if let Err(e) = watcher.stop().await {
                warn!(fabric_id = watcher.fabric_id(), "Stopping watcher failed: {}", e);
            }
        }
    }

    pub fn is_watching(&self, fabric_id: i64) -> bool {
        self.registry()
            .get(&fabric_id)
            .is_some_and(RawDirectoryWatcher::is_watching)
    }

    pub fn status(&self, fabric_id: i64) -> Option<WatcherStatus> {
        self.registry().get(&fabric_id).map(RawDirectoryWatcher::status)
    }

    /// Status of every registered watcher, ordered by fabric.
    pub fn all_status(&self) -> Vec<WatcherStatus> {
        let mut all: Vec<WatcherStatus> = self.registry().values().map(|w| w.status()).collect();
        all.sort_by_key(|s| s.fabric_id);
        all
    }
}
