//! Bidirectional sync between the record store and a fabric's repository.
//!
//! Push writes GUI-side records to managed files through the [`GitProvider`];
//! pull fetches changed files, stages them for ingestion and records
//! conflicts for records that changed on both sides. Every run is audited
//! and holds the fabric's lock; a run that finds the lock taken is skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, info_span, warn, Instrument};

use super::audit;
use super::codec;
use super::conflict::{
    ConflictDetector, ConflictInfo, ConflictService, ConflictStrategy, ConflictType,
    ResolutionOutcome,
};
use super::error::{GitOpsError, Result};
use super::git::{CommitDiff, GitProvider, ProviderResolver};
use super::layout::{
    is_manifest_file, resource_path, DirectoryLayout, ERRORS_DIR, MANAGED_DIR, PROCESSED_DIR,
    RAW_DIR,
};
use super::model::{
    ConflictStatus, ExternalModification, Fabric, OperationCounters, OperationStatus, OperationType,
    ResourceRecord,
};
use crate::db::resource_repo::{self, PushedFile, ResourceFilter};
use crate::db::{fabric_repo, repository_repo, Database};
use crate::ingest::{self, Ingestor, RemoteOrigin};

/// Source tag of modifications observed in the repository.
const GIT_SOURCE: &str = "github";

/// Direction of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirectionParam {
    GuiToGithub,
    GithubToGui,
    #[default]
    Bidirectional,
}

impl SyncDirectionParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirectionParam::GuiToGithub => "gui_to_github",
            SyncDirectionParam::GithubToGui => "github_to_gui",
            SyncDirectionParam::Bidirectional => "bidirectional",
        }
    }

    fn operation_type(&self) -> OperationType {
        match self {
            SyncDirectionParam::GuiToGithub => OperationType::GuiToGithub,
            SyncDirectionParam::GithubToGui => OperationType::GithubToGui,
            SyncDirectionParam::Bidirectional => OperationType::Bidirectional,
        }
    }

    fn pulls(&self) -> bool {
        !matches!(self, SyncDirectionParam::GuiToGithub)
    }

    fn pushes(&self) -> bool {
        !matches!(self, SyncDirectionParam::GithubToGui)
    }
}

impl std::str::FromStr for SyncDirectionParam {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gui_to_github" => Ok(SyncDirectionParam::GuiToGithub),
            "github_to_gui" => Ok(SyncDirectionParam::GithubToGui),
            "bidirectional" => Ok(SyncDirectionParam::Bidirectional),
            other => Err(format!("invalid sync direction: {}", other)),
        }
    }
}

/// Per-direction detail beyond the audit counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub pushed: u32,
    pub pulled: u32,
    pub unchanged: u32,
    pub skipped_in_conflict: u32,
    pub ingested: u32,
    pub deleted: u32,
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    /// The fabric was busy and nothing ran.
    pub skipped: bool,
    pub message: String,
    pub direction: SyncDirectionParam,
    pub operation_id: Option<String>,
    pub commit_sha: Option<String>,
    pub counters: OperationCounters,
    pub stats: SyncStats,
    pub conflicts: Vec<ConflictInfo>,
    pub errors: Vec<String>,
    /// Records created, updated or deleted by this run.
    pub resource_ids: Vec<i64>,
}

impl SyncResult {
    fn skipped(direction: SyncDirectionParam, operation_id: String) -> Self {
        Self {
            success: true,
            skipped: true,
            message: "Skipped: another sync or ingestion is in progress".to_string(),
            direction,
            operation_id: Some(operation_id),
            ..Default::default()
        }
    }

    /// A run that could not start or was aborted by `error`.
    pub fn failed(direction: SyncDirectionParam, error: &GitOpsError) -> Self {
        Self {
            success: false,
            message: format!("{} failed: {}", direction.as_str(), error),
            direction,
            errors: vec![error.to_string()],
            ..Default::default()
        }
    }
}

/// Repository changes since the last synced commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalChanges {
    pub changes_detected: bool,
    pub base: Option<String>,
    pub head: String,
    pub diff: CommitDiff,
}

/// Outcome of a bulk conflict resolution.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveSummary {
    pub resolved_count: u32,
    pub deferred_count: u32,
    pub pushed_count: u32,
    pub errors: Vec<String>,
}

/// Per-fabric locks shared by sync, ingestion and the raw directory watcher.
#[derive(Clone, Default)]
pub struct FabricLocks {
    locks: Arc<StdMutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl FabricLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, fabric_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(fabric_id).or_default().clone()
    }

    /// Takes the fabric's lock without waiting. `None` when it is held.
    pub fn try_acquire(&self, fabric_id: i64) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(fabric_id).try_lock_owned().ok()
    }

    pub fn is_locked(&self, fabric_id: i64) -> bool {
        self.lock_for(fabric_id).try_lock().is_err()
    }
}

/// Fabric, local layout and repository access for one run.
struct SyncContext {
    fabric: Fabric,
    layout: DirectoryLayout,
    provider: Arc<dyn GitProvider>,
}

/// Accumulates the effects of one run.
#[derive(Default)]
struct Pass {
    counters: OperationCounters,
    stats: SyncStats,
    conflicts: Vec<ConflictInfo>,
    errors: Vec<String>,
    last_commit: Option<String>,
    resource_ids: Vec<i64>,
}

impl Pass {
    fn conflict(&mut self, info: ConflictInfo) {
        self.counters.conflicts_detected += 1;
        self.conflicts.push(info);
    }

    fn touched(&mut self, id: i64) {
        if !self.resource_ids.contains(&id) {
            self.resource_ids.push(id);
        }
    }
}

enum PushOutcome {
    Created(String),
    Updated(String),
    Unchanged,
    Conflict(ConflictInfo),
}

/// Runs push, pull and bulk resolution for fabrics.
pub struct SyncService {
    db: Database,
    workspace_dir: PathBuf,
    providers: Arc<dyn ProviderResolver>,
    ingestor: Arc<Ingestor>,
    conflicts: ConflictService,
    locks: FabricLocks,
}

impl SyncService {
    pub fn new(
        db: Database,
        workspace_dir: PathBuf,
        providers: Arc<dyn ProviderResolver>,
        ingestor: Arc<Ingestor>,
        conflicts: ConflictService,
        locks: FabricLocks,
    ) -> Self {
        Self {
            db,
            workspace_dir,
            providers,
            ingestor,
            conflicts,
            locks,
        }
    }

    pub fn locks(&self) -> &FabricLocks {
        &self.locks
    }

    fn context(&self, fabric_id: i64) -> Result<SyncContext> {
        let fabric = fabric_repo::require(&self.db, fabric_id)?;
        let layout = DirectoryLayout::for_fabric(&self.workspace_dir, &fabric)?;
        let provider = self.providers.resolve(&fabric)?.ok_or_else(|| {
            GitOpsError::Configuration(format!(
                "fabric '{}' has no repository binding",
                fabric.name
            ))
        })?;
        Ok(SyncContext {
            fabric,
            layout,
            provider,
        })
    }

    /// Compares the last synced commit with the repository head.
    pub async fn detect_external_changes(&self, fabric_id: i64) -> Result<ExternalChanges> {
        let ctx = self.context(fabric_id)?;
        let head = ctx.provider.get_latest_commit().await?;
        let base = ctx.fabric.desired_state_commit.clone();
        let diff = self.changes_between(&ctx, base.as_deref(), &head).await?;
        Ok(ExternalChanges {
            changes_detected: !diff.is_empty(),
            base,
            head,
            diff,
        })
    }

    async fn changes_between(
        &self,
        ctx: &SyncContext,
        base: Option<&str>,
        head: &str,
    ) -> Result<CommitDiff> {
        let prefix = ctx.fabric.repo_path("");
        let mut diff = match base {
            Some(base) if base == head => CommitDiff::default(),
            Some(base) => ctx.provider.diff_commits(base, head, &prefix).await?,
            None => CommitDiff {
                added: ctx.provider.list_files(&prefix).await?,
                ..Default::default()
            },
        };
        diff.normalize();
        Ok(diff)
    }

    /// GUI to repository.
    pub async fn push(&self, fabric_id: i64, force: bool) -> Result<SyncResult> {
        self.sync(fabric_id, SyncDirectionParam::GuiToGithub, force).await
    }

    /// Repository to GUI.
    pub async fn pull(&self, fabric_id: i64) -> Result<SyncResult> {
        self.sync(fabric_id, SyncDirectionParam::GithubToGui, false).await
    }

    /// Runs a sync in the given direction. Bidirectional pulls first.
    ///
    /// `force` pushes over remote changes and ignores detected conflicts.
    pub async fn sync(
        &self,
        fabric_id: i64,
        direction: SyncDirectionParam,
        force: bool,
    ) -> Result<SyncResult> {
        let Some(_guard) = self.locks.try_acquire(fabric_id) else {
            return Ok(self.busy(fabric_id, direction));
        };
        self.sync_locked(fabric_id, direction, force).await
    }

    /// Runs a sync and then, under the same fabric lock, applies `strategy`
    /// to the conflicts found by that sync.
    ///
    /// `UserGuided` leaves them detected. Records that were already in
    /// conflict before the sync are not touched.
    pub async fn sync_and_resolve(
        &self,
        fabric_id: i64,
        direction: SyncDirectionParam,
        force: bool,
        strategy: ConflictStrategy,
        actor: &str,
    ) -> Result<(SyncResult, Option<ResolveSummary>)> {
        let Some(_guard) = self.locks.try_acquire(fabric_id) else {
            return Ok((self.busy(fabric_id, direction), None));
        };
        let result = self.sync_locked(fabric_id, direction, force).await?;
        if result.conflicts.is_empty() || strategy == ConflictStrategy::UserGuided {
            return Ok((result, None));
        }

        let found: Vec<i64> = result.conflicts.iter().map(|c| c.resource_id).collect();
        let summary = self
            .resolve_locked(fabric_id, strategy, actor, Some(&found))
            .await
            .unwrap_or_else(|e| {
                warn!(fabric_id, "Conflict resolution after sync failed: {}", e);
                ResolveSummary {
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            });
        Ok((result, Some(summary)))
    }

    fn busy(&self, fabric_id: i64, direction: SyncDirectionParam) -> SyncResult {
        info!(fabric_id, "Sync skipped: fabric is busy");
        let op = audit::cancelled(
            &self.db,
            fabric_id,
            direction.operation_type(),
            "another sync or ingestion is in progress",
        );
        SyncResult::skipped(direction, op.id)
    }

    async fn sync_locked(
        &self,
        fabric_id: i64,
        direction: SyncDirectionParam,
        force: bool,
    ) -> Result<SyncResult> {
        let span = info_span!("sync", fabric_id, direction = direction.as_str(), force);
        async move {
            let mut op = audit::begin(&self.db, fabric_id, direction.operation_type());
            let ready = self.context(fabric_id).and_then(|ctx| {
                if direction.pushes() {
                    self.check_push_allowed(&ctx.fabric)?;
                }
                Ok(ctx)
            });
            let ctx = match ready {
                Ok(ctx) => ctx,
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

            let mut pass = Pass::default();
            let outcome = self.run_passes(&ctx, direction, force, &mut pass).await;

            let (status, error_message) = match &outcome {
                Ok(()) if pass.errors.is_empty() => (OperationStatus::Completed, None),
                Ok(()) => (OperationStatus::Failed, Some(pass.errors.join("; "))),
                Err(e) => (OperationStatus::Failed, Some(e.to_string())),
            };
            audit::finish(
                &self.db,
                &mut op,
                status,
                pass.counters,
                pass.last_commit.clone(),
                error_message,
            );
            outcome?;

            let success = pass.errors.is_empty();
            let message = format!(
                "{}: {} pushed, {} pulled, {} deleted, {} conflicts, {} errors",
                direction.as_str(),
                pass.stats.pushed,
                pass.stats.pulled,
                pass.stats.deleted,
                pass.conflicts.len(),
                pass.errors.len()
            );
            info!("{}", message);
            Ok(SyncResult {
                success,
                skipped: false,
                message,
                direction,
                operation_id: Some(op.id),
                commit_sha: pass.last_commit,
                counters: pass.counters,
                stats: pass.stats,
                conflicts: pass.conflicts,
                errors: pass.errors,
                resource_ids: pass.resource_ids,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_passes(
        &self,
        ctx: &SyncContext,
        direction: SyncDirectionParam,
        force: bool,
        pass: &mut Pass,
    ) -> Result<()> {
        if direction.pulls() {
            self.pull_pass(ctx, pass).await?;
        }
        if direction.pushes() {
            let mut records =
                resource_repo::list(&self.db, ctx.fabric.id, &ResourceFilter::pushable())?;
            if !force {
                let before = records.len();
                records.retain(|r| r.conflict_status != ConflictStatus::Detected);
                pass.stats.skipped_in_conflict += (before - records.len()) as u32;
            }
            self.push_records(ctx, &records, force, pass).await;
            if let Some(commit) = &pass.last_commit {
                fabric_repo::set_desired_state_commit(&self.db, ctx.fabric.id, Some(commit))?;
            }
        }
        fabric_repo::touch_directory_sync(&self.db, ctx.fabric.id, Utc::now())?;
        Ok(())
    }

    fn check_push_allowed(&self, fabric: &Fabric) -> Result<()> {
        let Some(repository_id) = fabric.git_repository_id else {
            return Ok(());
        };
        let binding = repository_repo::get(&self.db, repository_id)?.ok_or_else(|| {
            GitOpsError::Configuration(format!("repository {} not found", repository_id))
        })?;
        binding
            .check_push_allowed()
            .map_err(GitOpsError::Configuration)
    }

    async fn push_records(
        &self,
        ctx: &SyncContext,
        records: &[ResourceRecord],
        force: bool,
        pass: &mut Pass,
    ) {
        for record in records {
            pass.counters.files_processed += 1;
            match self.push_record(ctx, record, force).await {
                Ok(PushOutcome::Created(commit)) => {
                    pass.counters.files_created += 1;
                    pass.stats.pushed += 1;
                    pass.last_commit = Some(commit);
                    pass.touched(record.id);
                }
                Ok(PushOutcome::Updated(commit)) => {
                    pass.counters.files_updated += 1;
                    pass.stats.pushed += 1;
                    pass.last_commit = Some(commit);
                    pass.touched(record.id);
                }
                Ok(PushOutcome::Unchanged) => pass.stats.unchanged += 1,
                Ok(PushOutcome::Conflict(info)) => pass.conflict(info),
                Err(e) => {
                    warn!(resource = %record.identity(), "Push failed: {}", e);
                    pass.errors.push(format!("{}: {}", record.identity(), e));
                    if matches!(e, GitOpsError::Auth(_)) {
                        break;
                    }
                }
            }
        }
    }

    async fn push_record(
        &self,
        ctx: &SyncContext,
        record: &ResourceRecord,
        force: bool,
    ) -> Result<PushOutcome> {
        let (yaml, hash) = codec::encode_with_hash(&record.to_manifest())?;
        let relative = record
            .managed_file_path
            .clone()
            .unwrap_or_else(|| resource_path(record.kind, &record.namespace, &record.name));
        let repo_path = ctx.fabric.repo_path(&relative);

        if !force {
            let acknowledged = record.file_hash.as_deref() == Some(hash.as_str())
                && record.remote_sha.is_some()
                && record.last_file_sync.is_some()
                && !record.modified_since_sync();
            if acknowledged {
                return Ok(PushOutcome::Unchanged);
            }
            if let Some(info) = ConflictDetector::detect(record) {
                // A GUI edit after the last sync is a normal push unless the
                // remote moved too, which the SHA check below catches.
                if info.conflict_type != ConflictType::ConcurrentModification {
                    self.conflicts.record(record, &info)?;
                    return Ok(PushOutcome::Conflict(info));
                }
            }
        }

        let remote = ctx.provider.get_file(&repo_path).await?;
        let now = Utc::now();
        let write = match remote {
            Some(file) if codec::content_hash(&file.content) == hash => {
                debug!(path = %repo_path, "Remote already up to date");
                ctx.layout.write_managed(&relative, &yaml)?;
                resource_repo::mark_pushed(
                    &self.db,
                    record.id,
                    &PushedFile {
                        managed_file_path: relative,
                        file_hash: hash,
                        remote_sha: Some(file.sha),
                        synced_at: now,
                    },
                )?;
                return Ok(PushOutcome::Unchanged);
            }
            Some(file) if !force && record.remote_sha.as_deref() != Some(file.sha.as_str()) => {
                let info = self.record_remote_change(
                    record,
                    &repo_path,
                    &file.content,
                    &file.sha,
                    "repository file changed since the last sync",
                )?;
                return Ok(PushOutcome::Conflict(info));
            }
            Some(file) => {
                let message = format!("Update {} {}", record.kind, record.name);
                let result = ctx
                    .provider
                    .update_file(&repo_path, &yaml, &message, &file.sha)
                    .await?;
                (result, false)
            }
            None => {
                let message = format!("Add {} {}", record.kind, record.name);
                let result = ctx.provider.create_file(&repo_path, &yaml, &message).await?;
                (result, true)
            }
        };

        let (result, created) = write;
        ctx.layout.write_managed(&relative, &yaml)?;
        resource_repo::mark_pushed(
            &self.db,
            record.id,
            &PushedFile {
                managed_file_path: relative,
                file_hash: hash,
                remote_sha: Some(result.content_sha),
                synced_at: now,
            },
        )?;
        debug!(resource = %record.identity(), commit = %result.commit_sha, created, "Pushed");
        Ok(if created {
            PushOutcome::Created(result.commit_sha)
        } else {
            PushOutcome::Updated(result.commit_sha)
        })
    }

    /// Stores Git-side content and an external modification, then records the conflict.
    fn record_remote_change(
        &self,
        record: &ResourceRecord,
        repo_path: &str,
        content: &str,
        sha: &str,
        description: &str,
    ) -> Result<ConflictInfo> {
        let concurrent = record.modified_since_sync();
        if let Some(manifest) = codec::decode_manifests(content.as_bytes(), Path::new(repo_path))
            .ok()
            .and_then(|m| m.into_iter().next())
        {
            resource_repo::set_desired_spec(&self.db, record.id, &manifest.spec, Some(repo_path))?;
        }
        let now = Utc::now();
        let updated = resource_repo::append_external_modification(
            &self.db,
            record.id,
            &ExternalModification {
                detected_at: now,
                source: GIT_SOURCE.to_string(),
                description: description.to_string(),
                path: Some(repo_path.to_string()),
                remote_sha: Some(sha.to_string()),
            },
        )?;

        let info = if concurrent {
            ConflictInfo::concurrent(record, repo_path, Some(sha))
        } else {
            ConflictDetector::detect(&updated).ok_or_else(|| GitOpsError::Conflict {
                path: repo_path.to_string(),
                message: "external modification was not recorded".to_string(),
            })?
        };
        self.conflicts.record(&updated, &info)?;
        Ok(info)
    }

    async fn pull_pass(&self, ctx: &SyncContext, pass: &mut Pass) -> Result<()> {
        let head = ctx.provider.get_latest_commit().await?;
        let diff = self
            .changes_between(ctx, ctx.fabric.desired_state_commit.as_deref(), &head)
            .await?;
        if diff.is_empty() {
            debug!(head = %head, "No repository changes");
            fabric_repo::set_desired_state_commit(&self.db, ctx.fabric.id, Some(&head))?;
            return Ok(());
        }

        let mut staged = Vec::new();
        for repo_path in diff.upserted() {
            let Some(relative) = ctx.fabric.relative_path(repo_path) else {
                continue;
            };
            if !is_pulled_path(relative) {
                continue;
            }
            match self.fetch_for_ingest(ctx, repo_path, relative, pass).await {
                Ok(Some(entry)) => staged.push(entry),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %repo_path, "Pull failed: {}", e);
                    pass.errors.push(format!("{}: {}", repo_path, e));
                }
            }
        }

        if !staged.is_empty() {
            let ingestion = self.ingestor.ingest_staged(ctx.fabric.id, &ctx.layout, staged);
            pass.counters.files_created += ingestion.resources_created;
            pass.counters.files_updated += ingestion.resources_updated;
            pass.stats.ingested += ingestion.resources_created + ingestion.resources_updated;
            pass.errors.extend(ingestion.errors());
            for info in ingestion.conflicts {
                pass.conflict(info);
            }
            for id in &ingestion.touched_resource_ids {
                pass.touched(*id);
                let record = resource_repo::require(&self.db, *id)?;
                if record.conflict_status != ConflictStatus::Detected {
                    if let Some(info) = self.conflicts.detect_and_record(&record)? {
                        pass.conflict(info);
                    }
                }
            }
        }

        for repo_path in &diff.deleted {
            let Some(relative) = ctx.fabric.relative_path(repo_path) else {
                continue;
            };
            if !is_managed_path(relative) {
                continue;
            }
            pass.counters.files_processed += 1;
            if let Err(e) = self.apply_remote_delete(ctx, repo_path, relative, pass) {
                warn!(path = %repo_path, "Applying remote delete failed: {}", e);
                pass.errors.push(format!("{}: {}", repo_path, e));
            }
        }

        fabric_repo::set_desired_state_commit(&self.db, ctx.fabric.id, Some(&head))?;
        if pass.last_commit.is_none() {
            pass.last_commit = Some(head);
        }
        Ok(())
    }

    /// Fetches one changed file. Returns it staged for ingestion, or `None`
    /// when it is unchanged or held back as a conflict.
    async fn fetch_for_ingest(
        &self,
        ctx: &SyncContext,
        repo_path: &str,
        relative: &str,
        pass: &mut Pass,
    ) -> Result<Option<(PathBuf, RemoteOrigin)>> {
        let Some(file) = ctx.provider.get_file(repo_path).await? else {
            return Ok(None);
        };
        pass.counters.files_processed += 1;
        pass.stats.pulled += 1;

        if is_managed_path(relative) {
            if let Some(record) =
                resource_repo::find_by_managed_path(&self.db, ctx.fabric.id, relative)?
            {
                let same_blob = record.remote_sha.as_deref() == Some(file.sha.as_str());
                let hash = codec::content_hash(&file.content);
                let same_content = record.file_hash.as_deref() == Some(hash.as_str());
                if same_blob || same_content {
                    pass.stats.unchanged += 1;
                    return Ok(None);
                }
                if record.conflict_status == ConflictStatus::Detected
                    || record.modified_since_sync()
                {
                    let info = self.record_remote_change(
                        &record,
                        repo_path,
                        &file.content,
                        &file.sha,
                        "repository file changed while the resource had local changes",
                    )?;
                    pass.conflict(info);
                    return Ok(None);
                }
            }
        }

        let staged = ingest::stage_remote_file(&ctx.layout, repo_path, &file.content)?;
        Ok(Some((
            staged,
            RemoteOrigin {
                path: repo_path.to_string(),
                relative: relative.to_string(),
                sha: file.sha,
            },
        )))
    }

    fn apply_remote_delete(
        &self,
        ctx: &SyncContext,
        repo_path: &str,
        relative: &str,
        pass: &mut Pass,
    ) -> Result<()> {
        let Some(record) = resource_repo::find_by_managed_path(&self.db, ctx.fabric.id, relative)?
        else {
            ctx.layout.remove_managed(relative)?;
            return Ok(());
        };

        if record.conflict_status == ConflictStatus::Detected || record.modified_since_sync() {
            let updated = resource_repo::append_external_modification(
                &self.db,
                record.id,
                &ExternalModification {
                    detected_at: Utc::now(),
                    source: GIT_SOURCE.to_string(),
                    description: "deleted in repository".to_string(),
                    path: Some(repo_path.to_string()),
                    remote_sha: None,
                },
            )?;
            if let Some(info) = ConflictDetector::detect(&updated) {
                self.conflicts.record(&updated, &info)?;
                pass.conflict(info);
            }
            return Ok(());
        }

        if resource_repo::delete(&self.db, record.id)? {
            ctx.layout.remove_managed(relative)?;
            pass.counters.files_deleted += 1;
            pass.stats.deleted += 1;
            pass.touched(record.id);
            info!(resource = %record.identity(), "Deleted after removal from repository");
        }
        Ok(())
    }

    /// Applies a strategy to every detected conflict of a fabric.
    ///
    /// Records that keep the GUI spec are force-pushed; records that adopt
    /// the Git-side spec get their local managed file rewritten.
    pub async fn resolve_conflicts(
        &self,
        fabric_id: i64,
        strategy: ConflictStrategy,
        actor: &str,
    ) -> Result<ResolveSummary> {
        let _guard = self
            .locks
            .try_acquire(fabric_id)
            .ok_or(GitOpsError::LockContention(fabric_id))?;
        self.resolve_locked(fabric_id, strategy, actor, None).await
    }

    /// Resolution body; the caller holds the fabric's lock. `only` limits
    /// it to the given records.
    async fn resolve_locked(
        &self,
        fabric_id: i64,
        strategy: ConflictStrategy,
        actor: &str,
        only: Option<&[i64]>,
    ) -> Result<ResolveSummary> {
        let span = info_span!("resolve_conflicts", fabric_id, strategy = strategy.as_str());
        async move {
            let fabric = fabric_repo::require(&self.db, fabric_id)?;
            let layout = DirectoryLayout::for_fabric(&self.workspace_dir, &fabric)?;
            let mut detected = resource_repo::list(
                &self.db,
                fabric_id,
                &ResourceFilter::with_conflict_status(ConflictStatus::Detected),
            )?;
            if let Some(ids) = only {
                detected.retain(|r| ids.contains(&r.id));
            }

            let mut op = audit::begin(&self.db, fabric_id, OperationType::ConflictResolution);
            let mut summary = ResolveSummary::default();
            let mut to_push = Vec::new();

            for record in &detected {
                match self.conflicts.resolve(record, strategy, actor) {
                    Ok(result) => match (result.outcome, result.record) {
                        (ResolutionOutcome::Deferred, _) => summary.deferred_count += 1,
                        (ResolutionOutcome::KeepGui, Some(stored)) => {
                            summary.resolved_count += 1;
                            to_push.push(stored);
                        }
                        (ResolutionOutcome::AdoptGit, Some(stored)) => {
                            summary.resolved_count += 1;
                            if let Err(e) = write_local(&layout, &stored) {
                                summary.errors.push(format!("{}: {}", stored.identity(), e));
                            }
                        }
                        _ => summary.resolved_count += 1,
                    },
                    Err(e) => summary.errors.push(format!("{}: {}", record.identity(), e)),
                }
            }

            let mut pass = Pass::default();
            if !to_push.is_empty() {
                match self.providers.resolve(&fabric)? {
                    Some(provider) => {
                        let ctx = SyncContext {
                            fabric,
                            layout,
                            provider,
                        };
                        self.push_records(&ctx, &to_push, true, &mut pass).await;
                        summary.pushed_count = pass.stats.pushed + pass.stats.unchanged;
                        summary.errors.append(&mut pass.errors);
                        if let Some(commit) = &pass.last_commit {
                            fabric_repo::set_desired_state_commit(
                                &self.db,
                                fabric_id,
                                Some(commit),
                            )?;
                        }
                    }
                    None => {
                        for stored in &to_push {
                            if let Err(e) = write_local(&layout, stored) {
                                summary.errors.push(format!("{}: {}", stored.identity(), e));
                            }
                        }
                    }
                }
            }

            pass.counters.conflicts_detected = detected.len() as u32;
            let status = if summary.errors.is_empty() {
                OperationStatus::Completed
            } else {
                OperationStatus::Failed
            };
            let error_message = (!summary.errors.is_empty()).then(|| summary.errors.join("; "));
            audit::finish(
                &self.db,
                &mut op,
                status,
                pass.counters,
                pass.last_commit,
                error_message,
            );
            info!(
                resolved = summary.resolved_count,
                deferred = summary.deferred_count,
                "Conflict resolution finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}

/// Managed and intake paths are pulled; archives are not.
fn is_pulled_path(relative: &str) -> bool {
    if !is_manifest_file(relative) {
        return false;
    }
    if is_managed_path(relative) {
        return true;
    }
    let Some(rest) = relative.strip_prefix(&format!("{}/", RAW_DIR)) else {
        return false;
    };
    !rest.starts_with(&format!("{}/", PROCESSED_DIR))
        && !rest.starts_with(&format!("{}/", ERRORS_DIR))
}

fn is_managed_path(relative: &str) -> bool {
    relative
        .strip_prefix(MANAGED_DIR)
        .is_some_and(|rest| rest.starts_with('/'))
        && is_manifest_file(relative)
}

/// Rewrites a record's local managed file from its stored spec.
fn write_local(layout: &DirectoryLayout, record: &ResourceRecord) -> Result<()> {
    let relative = record
        .managed_file_path
        .clone()
        .unwrap_or_else(|| resource_path(record.kind, &record.namespace, &record.name));
    let yaml = codec::encode(&record.to_manifest())?;
    layout.write_managed(&relative, &yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trips_through_str() {
        for direction in [
            SyncDirectionParam::GuiToGithub,
            SyncDirectionParam::GithubToGui,
            SyncDirectionParam::Bidirectional,
        ] {
            assert_eq!(direction.as_str().parse::<SyncDirectionParam>().unwrap(), direction);
        }
        assert!("sideways".parse::<SyncDirectionParam>().is_err());
    }

    #[test]
    fn test_pulled_paths() {
        assert!(is_pulled_path("managed/vpcs/prod.yaml"));
        assert!(is_pulled_path("raw/new.yml"));
        assert!(is_pulled_path("raw/pending/new.yaml"));
        assert!(!is_pulled_path("raw/processed/old_20260101_000000.yaml"));
        assert!(!is_pulled_path("raw/errors/bad.yaml"));
        assert!(!is_pulled_path("managed/vpcs/.gitkeep"));
        assert!(!is_pulled_path("unmanaged/notes.yaml"));
    }

    #[tokio::test]
    async fn test_fabric_lock_is_exclusive() {
        let locks = FabricLocks::new();
        let guard = locks.try_acquire(7).unwrap();
        assert!(locks.is_locked(7));
        assert!(locks.try_acquire(7).is_none());
        assert!(locks.try_acquire(8).is_some());
        drop(guard);
        assert!(!locks.is_locked(7));
    }
}
