//! Entry point used by schedulers and the UI layer.
//!
//! [`GitOpsService`] wires the record store, policy engine, ingestion
//! pipeline, sync orchestrator and watcher registry together. Sync,
//! ingestion, initialization and conflict resolution always return result
//! values; failures are reported inside them. Committed changes are
//! published as [`ResourceChangeEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::audit;
use super::conflict::{ConflictService, ConflictStrategy};
use super::error::{GitOpsError, Result};
use super::git::{GitProviderFactory, ProviderResolver};
use super::layout::{self, is_manifest_file, DirectoryLayout, InitializeResult};
use super::model::{
    ConflictStatus, Fabric, OnboardingStatus, OperationCounters, OperationStatus, OperationType,
    SyncOperation,
};
use super::orchestrator::{
    ExternalChanges, FabricLocks, ResolveSummary, SyncDirectionParam, SyncResult, SyncService,
};
use super::sync_scheduler::SyncScheduler;
use super::validation::PolicyEngine;
use super::watcher::{RawIngestor, WatcherManager, WatcherStatus};
use crate::config::EngineConfig;
use crate::db::resource_repo::{self, ResourceFilter};
use crate::db::{fabric_repo, operation_repo, Database};
use crate::ingest::{IngestError, IngestionResult, Ingestor};
use crate::secrets::TokenEncryptor;

const EVENT_CAPACITY: usize = 256;

/// Actor recorded for resolutions applied as part of a sync.
const SYNC_ACTOR: &str = "sync";

/// A committed change to a fabric's records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceChangeEvent {
    Initialized {
        fabric_id: i64,
    },
    Ingested {
        fabric_id: i64,
        resource_ids: Vec<i64>,
        created: u32,
        updated: u32,
    },
    Synced {
        fabric_id: i64,
        direction: SyncDirectionParam,
        resource_ids: Vec<i64>,
        commit_sha: Option<String>,
    },
    ConflictsResolved {
        fabric_id: i64,
        resolved: u32,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStatus {
    /// Manifests waiting in `raw/` and `raw/pending/`.
    pub pending_files: usize,
    pub processed_files: usize,
    pub error_files: usize,
    pub last_ingestion: Option<SyncOperation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsStatus {
    pub fabric_id: i64,
    pub initialized: bool,
    pub onboarding_status: OnboardingStatus,
    pub ingestion_status: IngestionStatus,
    pub watcher_status: Option<WatcherStatus>,
    pub busy: bool,
    pub open_conflicts: usize,
    pub drift_count: i64,
    pub desired_state_commit: Option<String>,
    pub last_directory_sync: Option<DateTime<Utc>>,
}

/// Publishes a `Synced` event when the run changed any record.
pub(crate) fn publish_synced(
    events: &broadcast::Sender<ResourceChangeEvent>,
    fabric_id: i64,
    result: &SyncResult,
) {
    if result.resource_ids.is_empty() {
        return;
    }
    let _ = events.send(ResourceChangeEvent::Synced {
        fabric_id,
        direction: result.direction,
        resource_ids: result.resource_ids.clone(),
        commit_sha: result.commit_sha.clone(),
    });
}

fn count_manifests(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .filter(|e| is_manifest_file(&e.file_name().to_string_lossy()))
                .count()
        })
        .unwrap_or(0)
}

/// Which raw files an ingestion run takes.
enum Intake {
    All,
    Files(Vec<PathBuf>),
}

/// Audited ingestion for one fabric. Callers hold the fabric's lock.
struct RawIntake {
    db: Database,
    workspace_dir: PathBuf,
    ingestor: Arc<Ingestor>,
    events: broadcast::Sender<ResourceChangeEvent>,
}

impl RawIntake {
    fn layout(&self, fabric: &Fabric) -> Result<DirectoryLayout> {
        DirectoryLayout::for_fabric(&self.workspace_dir, fabric)
    }

    fn run(
        &self,
        fabric_id: i64,
        intake: Intake,
    ) -> std::result::Result<IngestionResult, IngestError> {
        let fabric = fabric_repo::require(&self.db, fabric_id)?;
        let layout = self.layout(&fabric)?;

        let mut op = audit::begin(&self.db, fabric_id, OperationType::Ingestion);
        let outcome = match intake {
            Intake::All => self.ingestor.ingest_directory(fabric_id, &layout),
            Intake::Files(files) => self.ingestor.ingest_files(fabric_id, &layout, &files),
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                audit::finish(
                    &self.db,
                    &mut op,
                    OperationStatus::Failed,
                    OperationCounters::default(),
                    None,
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        let counters = OperationCounters {
            files_processed: result.files.len() as u32,
            files_created: result.resources_created,
            files_updated: result.resources_updated,
            conflicts_detected: result.conflicts.len() as u32,
            ..Default::default()
        };
        let (status, error) = if result.success {
            (OperationStatus::Completed, None)
        } else {
            (OperationStatus::Failed, result.errors().into_iter().next())
        };
        audit::finish(&self.db, &mut op, status, counters, None, error);
        result.operation_id = Some(op.id);

        if !result.files.is_empty() {
            fabric_repo::touch_directory_sync(&self.db, fabric_id, Utc::now())?;
        }
        if !result.touched_resource_ids.is_empty() {
            if fabric.onboarding_status != OnboardingStatus::Ingested {
                fabric_repo::set_onboarding_status(
                    &self.db,
                    fabric_id,
                    OnboardingStatus::Ingested,
                )?;
            }
            let _ = self.events.send(ResourceChangeEvent::Ingested {
                fabric_id,
                resource_ids: result.touched_resource_ids.clone(),
                created: result.resources_created,
                updated: result.resources_updated,
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl RawIngestor for RawIntake {
    async fn ingest_files(
        &self,
        fabric_id: i64,
        files: Vec<PathBuf>,
    ) -> std::result::Result<IngestionResult, IngestError> {
        self.run(fabric_id, Intake::Files(files))
    }
}

/// GitOps operations over all fabrics.
pub struct GitOpsService {
    db: Database,
    config: EngineConfig,
    providers: Arc<dyn ProviderResolver>,
    sync: Arc<SyncService>,
    intake: Arc<RawIntake>,
    watchers: WatcherManager,
    locks: FabricLocks,
    events: broadcast::Sender<ResourceChangeEvent>,
}

impl GitOpsService {
    /// Builds the service around an open record store.
    pub fn new(
        db: Database,
        config: EngineConfig,
        providers: Arc<dyn ProviderResolver>,
    ) -> Result<Self> {
        let policy = Arc::new(PolicyEngine::new(config.policy.clone())?);
        let ingestor = Arc::new(Ingestor::new(db.clone(), policy));
        let conflicts = ConflictService::new(db.clone(), config.conflicts.clock_skew_tolerance());
        let locks = FabricLocks::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let sync = Arc::new(SyncService::new(
            db.clone(),
            config.workspace_dir.clone(),
            Arc::clone(&providers),
            Arc::clone(&ingestor),
            conflicts,
            locks.clone(),
        ));
        let intake = Arc::new(RawIntake {
            db: db.clone(),
            workspace_dir: config.workspace_dir.clone(),
            ingestor,
            events: events.clone(),
        });
        let watchers = WatcherManager::new(
            config.watcher.clone(),
            Arc::clone(&intake) as Arc<dyn RawIngestor>,
            locks.clone(),
        );

        Ok(Self {
            db,
            config,
            providers,
            sync,
            intake,
            watchers,
            locks,
            events,
        })
    }

    /// Opens the configured record store and talks to the configured Git host.
    pub fn from_config(
        config: EngineConfig,
        encryptor: Option<Arc<TokenEncryptor>>,
    ) -> crate::error::Result<Self> {
        let db = Database::open(&config.database_path)?;
        let providers = Arc::new(GitProviderFactory::new(
            db.clone(),
            config.git.clone(),
            encryptor,
        ));
        Ok(Self::new(db, config, providers)?)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn sync_service(&self) -> Arc<SyncService> {
        Arc::clone(&self.sync)
    }

    pub fn watchers(&self) -> &WatcherManager {
        &self.watchers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceChangeEvent> {
        self.events.subscribe()
    }

    /// A scheduler over this service's fabrics, not yet started.
    pub fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::new(self.db.clone(), self.sync_service(), &self.config.scheduler)
            .with_events(self.events.clone())
    }

    fn layout(&self, fabric: &Fabric) -> Result<DirectoryLayout> {
        DirectoryLayout::for_fabric(&self.config.workspace_dir, fabric)
    }

    /// Creates the directory layout locally and in the bound repository.
    pub async fn initialize(&self, fabric_id: i64, force: bool) -> InitializeResult {
        let Some(_guard) = self.locks.try_acquire(fabric_id) else {
            return InitializeResult {
                message: "Fabric is busy with another sync or ingestion".to_string(),
                errors: vec![GitOpsError::LockContention(fabric_id).to_string()],
                ..Default::default()
            };
        };

        match self.try_initialize(fabric_id, force).await {
            Ok(result) => {
                if result.success && !result.already_initialized {
                    let _ = self.events.send(ResourceChangeEvent::Initialized { fabric_id });
                }
                result
            }
            Err(e) => {
                warn!(fabric_id, "Initialization failed: {}", e);
                InitializeResult {
                    message: format!("Initialization failed: {}", e),
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        }
    }

    async fn try_initialize(&self, fabric_id: i64, force: bool) -> Result<InitializeResult> {
        let fabric = fabric_repo::require(&self.db, fabric_id)?;
        let layout = self.layout(&fabric)?;
        let provider = self.providers.resolve(&fabric)?;
        layout::initialize(&self.db, fabric_id, &layout, provider.as_deref(), force).await
    }

    /// Runs a sync, then applies `strategy` to the conflicts it found.
    ///
    /// Both steps run under one hold of the fabric's lock. `UserGuided`
    /// leaves conflicts for a person to resolve.
    pub async fn sync(
        &self,
        fabric_id: i64,
        direction: SyncDirectionParam,
        force: bool,
        strategy: ConflictStrategy,
    ) -> SyncResult {
        let outcome = self
            .sync
            .sync_and_resolve(fabric_id, direction, force, strategy, SYNC_ACTOR)
            .await;
        let (mut result, summary) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(fabric_id, direction = direction.as_str(), "Sync failed: {}", e);
                return SyncResult::failed(direction, &e);
            }
        };

        if let Some(summary) = summary {
            info!(
                fabric_id,
                resolved = summary.resolved_count,
                strategy = strategy.as_str(),
                "Applied conflict strategy after sync"
            );
            if summary.resolved_count > 0 {
                let _ = self.events.send(ResourceChangeEvent::ConflictsResolved {
                    fabric_id,
                    resolved: summary.resolved_count,
                });
            }
            if !summary.errors.is_empty() {
                result.success = false;
                result.errors.extend(summary.errors);
            }
        }

        publish_synced(&self.events, fabric_id, &result);
        result
    }

    pub async fn detect_external_changes(&self, fabric_id: i64) -> Result<ExternalChanges> {
        self.sync.detect_external_changes(fabric_id).await
    }

    fn ingest(&self, fabric_id: i64, intake: Intake) -> IngestionResult {
        let Some(_guard) = self.locks.try_acquire(fabric_id) else {
            let op = audit::cancelled(
                &self.db,
                fabric_id,
                OperationType::Ingestion,
                "another sync or ingestion is in progress",
            );
            let mut result =
                IngestionResult::failed("Skipped: another sync or ingestion is in progress");
            result.operation_id = Some(op.id);
            return result;
        };

        match self.intake.run(fabric_id, intake) {
            Ok(result) => {
                info!(fabric_id, "{}", result.message);
                result
            }
            Err(e) => {
                warn!(fabric_id, "Ingestion failed: {}", e);
                IngestionResult::failed(format!("Ingestion failed: {}", e))
            }
        }
    }

    /// Ingests everything waiting in the fabric's raw intake directories.
    pub async fn ingest_raw_directory(&self, fabric_id: i64) -> IngestionResult {
        self.ingest(fabric_id, Intake::All)
    }

    /// Ingests one raw file. Relative paths are taken from the fabric root.
    pub async fn ingest_single_file(&self, fabric_id: i64, path: &Path) -> IngestionResult {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match fabric_repo::require(&self.db, fabric_id)
                .map_err(GitOpsError::from)
                .and_then(|fabric| self.layout(&fabric))
            {
                Ok(layout) => layout.root().join(path),
                Err(e) => return IngestionResult::failed(format!("Ingestion failed: {}", e)),
            }
        };
        self.ingest(fabric_id, Intake::Files(vec![path]))
    }

    pub async fn resolve_conflicts(
        &self,
        fabric_id: i64,
        strategy: ConflictStrategy,
        actor: &str,
    ) -> ResolveSummary {
        match self.sync.resolve_conflicts(fabric_id, strategy, actor).await {
            Ok(summary) => {
                if summary.resolved_count > 0 {
                    let _ = self.events.send(ResourceChangeEvent::ConflictsResolved {
                        fabric_id,
                        resolved: summary.resolved_count,
                    });
                }
                summary
            }
            Err(e) => {
                warn!(fabric_id, "Conflict resolution failed: {}", e);
                ResolveSummary {
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        }
    }

    pub fn get_status(&self, fabric_id: i64) -> Result<GitOpsStatus> {
        let fabric = fabric_repo::require(&self.db, fabric_id)?;
        let layout = self.layout(&fabric)?;

        let last_ingestion = operation_repo::list_for_fabric(&self.db, fabric_id, 50)?
            .into_iter()
            .find(|op| op.operation_type == OperationType::Ingestion);
        let open_conflicts = resource_repo::list(
            &self.db,
            fabric_id,
            &ResourceFilter::with_conflict_status(ConflictStatus::Detected),
        )?
        .len();

        Ok(GitOpsStatus {
            fabric_id,
            initialized: fabric.gitops_initialized,
            onboarding_status: fabric.onboarding_status,
            ingestion_status: IngestionStatus {
                pending_files: count_manifests(&layout.raw_dir())
                    + count_manifests(&layout.pending_dir()),
                processed_files: count_manifests(&layout.processed_dir()),
                error_files: count_manifests(&layout.errors_dir()),
                last_ingestion,
            },
            watcher_status: self.watchers.status(fabric_id),
            busy: self.locks.is_locked(fabric_id),
            open_conflicts,
            drift_count: fabric.drift_count,
            desired_state_commit: fabric.desired_state_commit,
            last_directory_sync: fabric.last_directory_sync,
        })
    }

    /// Starts polling the fabric's raw directories. The fabric must be initialized.
    pub fn start_watcher(&self, fabric_id: i64, scan_interval: Option<Duration>) -> Result<()> {
        let fabric = fabric_repo::require(&self.db, fabric_id)?;
        if !fabric.gitops_initialized {
            return Err(GitOpsError::Configuration(format!(
                "fabric '{}' has no GitOps directory structure yet",
                fabric.name
            )));
        }
        let layout = self.layout(&fabric)?;
        self.watchers.start_watching(fabric_id, &layout, scan_interval)
    }

    pub async fn stop_watcher(&self, fabric_id: i64) -> Result<bool> {
        self.watchers.stop_watching(fabric_id).await
    }

    /// Stops every watcher.
    pub async fn shutdown(&self) {
        self.watchers.stop_all().await;
    }
}
