//! Periodic sync of every initialized, repository-bound fabric.
//!
//! Runs bidirectional syncs on a fixed interval, a bounded number of
//! fabrics at a time, and supports manual trigger via broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use super::orchestrator::{SyncDirectionParam, SyncService};
use super::service::{publish_synced, ResourceChangeEvent};
use crate::config::SchedulerConfig;
use crate::db::{fabric_repo, Database, DatabaseError};

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerRun {
    pub fabrics: usize,
    pub succeeded: usize,
    /// Fabric was busy with another sync or ingestion.
    pub skipped: usize,
    pub failed: usize,
}

/// Periodic sync scheduler over all fabrics.
pub struct SyncScheduler {
    db: Database,
    sync: Arc<SyncService>,
    interval: Duration,
    max_concurrent: usize,
    events: Option<broadcast::Sender<ResourceChangeEvent>>,
    shutdown: Arc<AtomicBool>,
}

impl SyncScheduler {
    pub fn new(db: Database, sync: Arc<SyncService>, config: &SchedulerConfig) -> Self {
        Self {
            db,
            sync,
            interval: Duration::from_secs(config.sync_interval_secs.max(1)),
            max_concurrent: config.max_concurrent_syncs.max(1),
            events: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overrides the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Publishes a `Synced` event for every scheduled run that changed records.
    pub fn with_events(mut self, events: broadcast::Sender<ResourceChangeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Syncs every initialized fabric that has a repository binding.
    pub async fn run_once(&self) -> Result<SchedulerRun, DatabaseError> {
        run_pass(&self.db, &self.sync, self.max_concurrent, self.events.as_ref()).await
    }

    /// Start the sync loop in a background thread.
    /// Accepts a trigger receiver for manual sync requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let db = self.db.clone();
        let sync = Arc::clone(&self.sync);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;
        let max_concurrent = self.max_concurrent;
        let events = self.events.clone();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Sync scheduler could not start its runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual fabric sync triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match run_pass(&db, &sync, max_concurrent, events.as_ref()).await {
                        Ok(run) if run.fabrics > 0 => {
                            log::info!(
                                "Scheduled sync: {} fabrics, {} succeeded, {} skipped, {} failed",
                                run.fabrics,
                                run.succeeded,
                                run.skipped,
                                run.failed
                            );
                        }
                        Err(e) => log::error!("Scheduled sync failed: {}", e),
                        _ => {}
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

async fn run_pass(
    db: &Database,
    sync: &SyncService,
    max_concurrent: usize,
    events: Option<&broadcast::Sender<ResourceChangeEvent>>,
) -> Result<SchedulerRun, DatabaseError> {
    let fabrics: Vec<_> = fabric_repo::list_initialized(db)?
        .into_iter()
        .filter(|f| f.git_repository_id.is_some())
        .collect();

    let mut run = SchedulerRun {
        fabrics: fabrics.len(),
        ..Default::default()
    };

    let results: Vec<_> = stream::iter(fabrics)
        .map(|fabric| async move {
            let result = sync
                .sync(fabric.id, SyncDirectionParam::Bidirectional, false)
                .await;
            (fabric, result)
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    for (fabric, result) in results {
        if let (Some(events), Ok(r)) = (events, &result) {
            publish_synced(events, fabric.id, r);
        }
        match result {
            Ok(r) if r.skipped => run.skipped += 1,
            Ok(r) if r.success => run.succeeded += 1,
            Ok(r) => {
                log::warn!("Sync of fabric '{}' finished with errors: {}", fabric.name, r.message);
                run.failed += 1;
            }
            Err(e) => {
                log::warn!("Sync of fabric '{}' failed: {}", fabric.name, e);
                run.failed += 1;
            }
        }
    }
    Ok(run)
}
